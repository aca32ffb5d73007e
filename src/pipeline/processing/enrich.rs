//! Joins validated expense rows with the operator registry.
//!
//! The registry is a loosely specified CSV whose column names drift between
//! releases, so columns are located through a table of header patterns per
//! logical field. The table ships with defaults and can be extended from the
//! `[registry]` section of the configuration file.

use crate::app::ports::HttpClientPort;
use crate::common::tax_id;
use crate::constants::{ENRICHED_HEADER, MISSING_REGION, UNMATCHED_LEGAL_NAME};
use crate::error::{PipelineError, Result};
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::ingestion::listing::{extract_hrefs, file_name_of, resolve_href};
use crate::pipeline::processing::consolidate::read_consolidated;
use crate::pipeline::utils::{create_output, decode_field, delimited_reader, read_first_line};
use crate::types::{ConsolidatedRecord, EnrichedRecord, RegistryEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Logical registry columns the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryField {
    RegistryId,
    TaxId,
    LegalName,
    TradeName,
    Category,
    Region,
    Municipality,
    RegistrationDate,
}

/// How a lower-cased header is compared against a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "match", content = "value", rename_all = "snake_case")]
pub enum HeaderPattern {
    Exact(String),
    Contains(String),
}

impl HeaderPattern {
    pub fn matches(&self, header: &str) -> bool {
        match self {
            HeaderPattern::Exact(p) => header == p.to_lowercase(),
            HeaderPattern::Contains(p) => header.contains(&p.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRule {
    pub field: RegistryField,
    pub patterns: Vec<HeaderPattern>,
}

impl ColumnRule {
    fn new(field: RegistryField, patterns: Vec<HeaderPattern>) -> Self {
        Self { field, patterns }
    }
}

/// Ordered rules; a header belongs to the first rule with a matching pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    rules: Vec<ColumnRule>,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        use HeaderPattern::{Contains, Exact};
        use RegistryField::*;
        let s = |v: &str| v.to_string();
        Self {
            rules: vec![
                // registro_operadora is the operator code; data_registro_ans is a date.
                ColumnRule::new(
                    RegistryId,
                    vec![Exact(s("registro_operadora")), Exact(s("registro_ans")), Exact(s("reg_ans"))],
                ),
                ColumnRule::new(
                    TaxId,
                    vec![Exact(s("cnpj")), Contains(s("cd_cnpj")), Contains(s("nr_cnpj"))],
                ),
                ColumnRule::new(LegalName, vec![Contains(s("razao")), Contains(s("razão"))]),
                ColumnRule::new(Category, vec![Contains(s("modalidade"))]),
                ColumnRule::new(
                    Region,
                    vec![Exact(s("uf")), Contains(s("estado")), Contains(s("sigla_uf"))],
                ),
                ColumnRule::new(TradeName, vec![Contains(s("fantasia"))]),
                ColumnRule::new(
                    Municipality,
                    vec![Contains(s("cidade")), Contains(s("municipio"))],
                ),
                ColumnRule::new(
                    RegistrationDate,
                    vec![Exact(s("data_registro_ans")), Contains(s("data_registro"))],
                ),
            ],
        }
    }
}

impl ColumnMapping {
    /// Default rules followed by `extra`.
    pub fn with_extra(extra: &[ColumnRule]) -> Self {
        let mut mapping = Self::default();
        mapping.rules.extend(extra.iter().cloned());
        mapping
    }

    pub fn field_for(&self, header: &str) -> Option<RegistryField> {
        let header = header.trim_start_matches('\u{feff}').trim().to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| p.matches(&header)))
            .map(|rule| rule.field)
    }

    /// Column index per field. When several headers map to one field the last wins.
    pub fn map_headers(&self, headers: &[String]) -> HashMap<RegistryField, usize> {
        let mut columns = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            if let Some(field) = self.field_for(header) {
                columns.insert(field, i);
            }
        }
        debug!("Registry column mapping: {:?}", columns);
        columns
    }
}

/// `;` when present in the header line, else tab, else `,`.
pub fn detect_registry_delimiter(line: &str) -> u8 {
    if line.contains(';') {
        b';'
    } else if line.contains('\t') {
        b'\t'
    } else {
        b','
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub rows_read: usize,
    pub entries: usize,
    pub skipped_blank_id: usize,
    pub row_errors: usize,
    pub invalid_tax_ids: usize,
    pub conflicting_tax_ids: usize,
}

/// Registry entries keyed by operator code.
#[derive(Debug, Clone, Default)]
pub struct RegistryLookup {
    entries: HashMap<String, RegistryEntry>,
}

impl RegistryLookup {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, registry_id: &str) -> Option<&RegistryEntry> {
        self.entries.get(&lookup_key(registry_id))
    }

    fn insert(&mut self, entry: RegistryEntry) {
        self.entries.insert(lookup_key(&entry.registry_id), entry);
    }
}

fn lookup_key(id: &str) -> String {
    let digits = tax_id::digits_only(id);
    if digits.is_empty() {
        id.trim().to_string()
    } else {
        digits
    }
}

/// Builds the lookup from a registry stream. Rows without an operator code are
/// skipped; unreadable rows are logged and skipped.
pub fn load_registry<R: Read>(
    reader: R,
    delimiter: u8,
    mapping: &ColumnMapping,
) -> Result<(RegistryLookup, RegistryStats)> {
    let mut rdr = delimited_reader(reader, delimiter);
    let headers: Vec<String> = rdr.byte_headers()?.iter().map(decode_field).collect();
    let columns = mapping.map_headers(&headers);
    if !columns.contains_key(&RegistryField::RegistryId) {
        warn!("Registry header has no operator code column: {:?}", headers);
    }

    let mut lookup = RegistryLookup::default();
    let mut stats = RegistryStats::default();
    let mut names_by_tax_id: HashMap<String, String> = HashMap::new();

    for row in rdr.byte_records() {
        stats.rows_read += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!("Skipping registry row {}: {}", stats.rows_read, e);
                stats.row_errors += 1;
                continue;
            }
        };
        let value = |field: RegistryField| {
            columns
                .get(&field)
                .and_then(|i| row.get(*i))
                .map(decode_field)
                .unwrap_or_default()
        };

        let entry = RegistryEntry {
            registry_id: value(RegistryField::RegistryId),
            tax_id: value(RegistryField::TaxId),
            legal_name: value(RegistryField::LegalName),
            trade_name: value(RegistryField::TradeName),
            category: value(RegistryField::Category),
            region: value(RegistryField::Region),
            municipality: value(RegistryField::Municipality),
            registration_date: value(RegistryField::RegistrationDate),
        };
        if entry.registry_id.is_empty() {
            stats.skipped_blank_id += 1;
            continue;
        }

        if !entry.tax_id.is_empty() {
            if !tax_id::is_valid(&entry.tax_id) {
                debug!("Operator {} has an invalid CNPJ {}", entry.registry_id, entry.tax_id);
                stats.invalid_tax_ids += 1;
            }
            let normalized = entry.normalized_tax_id();
            match names_by_tax_id.get(&normalized) {
                Some(name) if !name.eq_ignore_ascii_case(&entry.legal_name) => {
                    debug!(
                        "CNPJ {} is shared by '{}' and '{}'",
                        tax_id::format(&normalized),
                        name,
                        entry.legal_name
                    );
                    stats.conflicting_tax_ids += 1;
                }
                Some(_) => {}
                None => {
                    names_by_tax_id.insert(normalized, entry.legal_name.clone());
                }
            }
        }
        lookup.insert(entry);
    }

    stats.entries = lookup.len();
    metrics::increment(MetricName::EnrichRegistryRowErrors, stats.row_errors as u64);
    info!(
        "Registry loaded: {} operators from {} rows ({} invalid CNPJs, {} conflicting)",
        stats.entries, stats.rows_read, stats.invalid_tax_ids, stats.conflicting_tax_ids
    );
    Ok((lookup, stats))
}

pub fn load_registry_file(
    path: &Path,
    mapping: &ColumnMapping,
) -> Result<(RegistryLookup, RegistryStats)> {
    let delimiter = detect_registry_delimiter(&read_first_line(path)?);
    load_registry(BufReader::new(File::open(path)?), delimiter, mapping)
}

/// The CSV link to download from the registry listing: the first one naming a
/// marker token, else the first CSV.
pub fn pick_registry_link(hrefs: &[String], markers: &[String]) -> Option<String> {
    let csv_links: Vec<&String> = hrefs
        .iter()
        .filter(|h| h.to_lowercase().ends_with(".csv"))
        .collect();
    csv_links
        .iter()
        .find(|h| {
            let lower = h.to_lowercase();
            markers.iter().any(|m| lower.contains(&m.to_lowercase()))
        })
        .or_else(|| csv_links.first())
        .map(|h| h.to_string())
}

/// Locates and downloads the registry snapshot, reusing a cached copy.
pub struct RegistrySource<'a> {
    http: &'a dyn HttpClientPort,
    index_url: String,
    cache_dir: PathBuf,
    markers: Vec<String>,
}

impl<'a> RegistrySource<'a> {
    pub fn new(
        http: &'a dyn HttpClientPort,
        index_url: &str,
        cache_dir: &Path,
        markers: &[String],
    ) -> Self {
        Self {
            http,
            index_url: index_url.to_string(),
            cache_dir: cache_dir.to_path_buf(),
            markers: markers.to_vec(),
        }
    }

    pub fn locate(&self) -> Result<String> {
        let listing = self.http.get_text(&self.index_url)?;
        let href = pick_registry_link(&extract_hrefs(&listing), &self.markers).ok_or_else(|| {
            PipelineError::Registry {
                message: format!("no registry CSV linked from {}", self.index_url),
            }
        })?;
        Ok(resolve_href(&self.index_url, &href))
    }

    #[instrument(skip(self), fields(index = %self.index_url))]
    pub fn fetch(&self) -> Result<PathBuf> {
        let url = self.locate()?;
        fs::create_dir_all(&self.cache_dir)?;
        let dest = self.cache_dir.join(file_name_of(&url));
        if dest.exists() {
            info!("Using cached registry {}", dest.display());
            return Ok(dest);
        }
        info!("Downloading registry from {}", url);
        self.http.download(&url, &dest).map_err(|e| PipelineError::Registry {
            message: format!("download of {} failed: {}", url, e),
        })?;
        Ok(dest)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub matched: usize,
    pub unmatched: usize,
}

/// Attaches registry attributes to every record. Misses keep the record with
/// the "not found" label.
pub fn join(
    records: Vec<ConsolidatedRecord>,
    lookup: &RegistryLookup,
) -> (Vec<EnrichedRecord>, JoinStats) {
    let mut stats = JoinStats::default();
    let enriched = records
        .into_iter()
        .map(|record| match lookup.get(&record.entity_id) {
            Some(entry) => {
                stats.matched += 1;
                EnrichedRecord {
                    tax_id: entry.tax_id.clone(),
                    legal_name: entry.legal_name.clone(),
                    category: entry.category.clone(),
                    region: entry.region.clone(),
                    matched: true,
                    record,
                }
            }
            None => {
                stats.unmatched += 1;
                EnrichedRecord {
                    tax_id: String::new(),
                    legal_name: UNMATCHED_LEGAL_NAME.to_string(),
                    category: String::new(),
                    region: String::new(),
                    matched: false,
                    record,
                }
            }
        })
        .collect();
    metrics::increment(MetricName::EnrichMatched, stats.matched as u64);
    metrics::increment(MetricName::EnrichUnmatched, stats.unmatched as u64);
    (enriched, stats)
}

pub fn write_enriched(records: &[EnrichedRecord], path: &Path) -> Result<()> {
    let mut wtr = create_output(path)?;
    wtr.write_record(ENRICHED_HEADER)?;
    for r in records {
        wtr.write_record(&[
            r.tax_id.clone(),
            r.record.entity_id.clone(),
            r.legal_name.clone(),
            r.category.clone(),
            r.region.clone(),
            r.record.period.clone(),
            r.record.year.to_string(),
            r.record.amount.to_string(),
        ])?;
    }
    wtr.flush()?;
    info!("Wrote {} ({} rows)", path.display(), records.len());
    Ok(())
}

/// Region used for grouping; blank regions collapse to a sentinel.
pub fn region_or_default(region: &str) -> &str {
    if region.trim().is_empty() {
        MISSING_REGION
    } else {
        region.trim()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentStats {
    pub registry: RegistryStats,
    pub join: JoinStats,
}

pub struct Enricher {
    mapping: ColumnMapping,
}

impl Enricher {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self { mapping }
    }

    /// Enriches the validated file against a local registry snapshot.
    #[instrument(skip_all, fields(validated = %validated.display()))]
    pub fn enrich_file(
        &self,
        validated: &Path,
        registry: &Path,
        output: &Path,
    ) -> Result<EnrichmentStats> {
        let (lookup, registry_stats) = load_registry_file(registry, &self.mapping)?;
        let records = read_consolidated(validated)?;
        let (enriched, join_stats) = join(records, &lookup);
        write_enriched(&enriched, output)?;
        info!(
            "Enrichment: {} matched, {} unmatched",
            join_stats.matched, join_stats.unmatched
        );
        Ok(EnrichmentStats {
            registry: registry_stats,
            join: join_stats,
        })
    }
}
