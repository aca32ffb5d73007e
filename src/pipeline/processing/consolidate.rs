use crate::common::amount::{parse_locale_amount, parse_plain_amount};
use crate::constants::{
    COL_ACCOUNT_CODE, COL_CLOSING_BALANCE, COL_ENTITY_ID, CONSOLIDATED_HEADER, FALLBACK_PERIOD,
    HDR_AMOUNT, HDR_ENTITY_ID, HDR_PERIOD, HDR_YEAR, OUTPUT_DELIMITER,
};
use crate::error::{PipelineError, Result};
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::processing::filter::{detect_delimiter, file_format};
use crate::pipeline::utils::{create_output, delimited_reader, field, HeaderIndex};
use crate::types::{ConsolidatedRecord, Period};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

static FILE_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([1-4])T(\d{4})").expect("static regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub rows_processed: usize,
    pub rows_discarded: usize,
    pub unrecognized_periods: usize,
    pub distinct_entities: usize,
}

/// Period label and year taken from a file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePeriod {
    pub label: String,
    pub year: i32,
    pub recognized: bool,
}

/// Accumulated amounts keyed by record identity; iteration order is the key order.
pub type Accumulator = BTreeMap<(String, String, i32), ConsolidatedRecord>;

/// Sums the in-scope account of every filing into one row per
/// (entity, period, year).
pub struct Consolidator {
    account_code: String,
    fallback_year: i32,
}

impl Consolidator {
    pub fn new(account_code: &str, fallback_year: i32) -> Self {
        Self {
            account_code: account_code.trim().to_string(),
            fallback_year,
        }
    }

    pub fn period_from_file_name(&self, path: &Path) -> FilePeriod {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parsed = FILE_PERIOD.captures(&name).and_then(|caps| {
            let quarter = caps[1].parse::<u8>().ok()?;
            let year = caps[2].parse::<i32>().ok()?;
            Period::new(year, quarter).ok()
        });
        if let Some(period) = parsed {
            return FilePeriod {
                label: period.label(),
                year: period.year(),
                recognized: true,
            };
        }
        warn!("Could not derive quarter/year from file name {}", name);
        FilePeriod {
            label: FALLBACK_PERIOD.to_string(),
            year: self.fallback_year,
            recognized: false,
        }
    }

    /// Consolidates every file. A file that cannot be read is logged and skipped.
    #[instrument(skip(self, files), fields(files = files.len(), account = %self.account_code))]
    pub fn consolidate_files(
        &self,
        files: &[PathBuf],
    ) -> (Vec<ConsolidatedRecord>, ConsolidationStats) {
        info!("Consolidating {} files", files.len());
        let mut acc = Accumulator::new();
        let mut stats = ConsolidationStats::default();

        for path in files {
            if !file_format(path).is_delimited() {
                warn!("Skipping spreadsheet {}: only delimited text is consolidated", path.display());
                stats.files_skipped += 1;
                continue;
            }
            let period = self.period_from_file_name(path);
            if !period.recognized {
                stats.unrecognized_periods += 1;
            }
            match self.process_file(path, &period, &mut acc, &mut stats) {
                Ok(rows) => {
                    stats.files_processed += 1;
                    info!("Consolidated {} rows from {}", rows, path.display());
                }
                Err(e) => {
                    stats.files_failed += 1;
                    error!("Failed to process {}: {}", path.display(), e);
                }
            }
        }

        let records: Vec<ConsolidatedRecord> = acc.into_values().collect();
        stats.distinct_entities = records
            .iter()
            .map(|r| r.normalized_entity_id())
            .collect::<HashSet<_>>()
            .len();

        metrics::increment(MetricName::ConsolidateRowsProcessed, stats.rows_processed as u64);
        metrics::increment(MetricName::ConsolidateRowsDiscarded, stats.rows_discarded as u64);
        metrics::increment(MetricName::ConsolidateFileErrors, stats.files_failed as u64);
        info!(
            "Consolidation: {} rows processed, {} discarded, {} entities, {} keys",
            stats.rows_processed,
            stats.rows_discarded,
            stats.distinct_entities,
            records.len()
        );
        (records, stats)
    }

    fn process_file(
        &self,
        path: &Path,
        period: &FilePeriod,
        acc: &mut Accumulator,
        stats: &mut ConsolidationStats,
    ) -> Result<usize> {
        let delimiter = detect_delimiter(path)?;
        let reader = BufReader::new(File::open(path)?);
        self.process_reader(reader, delimiter, period, acc, stats)
    }

    /// Folds one delimited stream into `acc`. Row-level problems are counted as
    /// discards; only an unusable header fails the stream.
    pub fn process_reader<R: Read>(
        &self,
        reader: R,
        delimiter: u8,
        period: &FilePeriod,
        acc: &mut Accumulator,
        stats: &mut ConsolidationStats,
    ) -> Result<usize> {
        let mut rdr = delimited_reader(reader, delimiter);
        let headers = HeaderIndex::new(rdr.byte_headers()?);
        let entity_col = headers.require(COL_ENTITY_ID)?;
        let account_col = headers.require(COL_ACCOUNT_CODE)?;
        let amount_col = headers.require(COL_CLOSING_BALANCE)?;

        let mut accepted = 0;
        for (line, row) in rdr.byte_records().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    debug!("Discarding malformed row {}: {}", line + 2, e);
                    stats.rows_discarded += 1;
                    continue;
                }
            };
            let parsed = field(&row, entity_col, COL_ENTITY_ID).and_then(|entity| {
                let account = field(&row, account_col, COL_ACCOUNT_CODE)?;
                let amount = field(&row, amount_col, COL_CLOSING_BALANCE)?;
                Ok((entity, account, amount))
            });
            let (entity, account, raw_amount) = match parsed {
                Ok(values) => values,
                Err(e) => {
                    debug!("Discarding row {}: {}", line + 2, e);
                    stats.rows_discarded += 1;
                    continue;
                }
            };

            if account != self.account_code {
                continue;
            }
            if entity.is_empty() {
                stats.rows_discarded += 1;
                continue;
            }

            let record = ConsolidatedRecord {
                entity_id: entity,
                period: period.label.clone(),
                year: period.year,
                amount: parse_locale_amount(&raw_amount),
            };
            if let Err(e) = merge(acc, record) {
                warn!("Discarding row {}: {}", line + 2, e);
                stats.rows_discarded += 1;
                continue;
            }
            stats.rows_processed += 1;
            accepted += 1;
        }
        Ok(accepted)
    }
}

/// Adds `record` into the accumulator, summing amounts on a key collision.
/// A sum that leaves the decimal range is refused and the accumulator keeps
/// its previous total.
pub fn merge(acc: &mut Accumulator, record: ConsolidatedRecord) -> Result<()> {
    let key = (
        record.normalized_entity_id(),
        record.period.clone(),
        record.year,
    );
    match acc.entry(key) {
        Entry::Occupied(mut slot) => {
            let current = slot.get().amount;
            let total = current.checked_add(record.amount).ok_or_else(|| {
                PipelineError::AmountOverflow(format!(
                    "{} {}/{}: {} + {}",
                    record.entity_id, record.year, record.period, current, record.amount
                ))
            })?;
            slot.get_mut().amount = total;
        }
        Entry::Vacant(slot) => {
            slot.insert(record);
        }
    }
    Ok(())
}

pub fn write_consolidated(records: &[ConsolidatedRecord], path: &Path) -> Result<()> {
    let mut wtr = create_output(path)?;
    wtr.write_record(CONSOLIDATED_HEADER)?;
    for r in records {
        wtr.write_record(&[
            r.entity_id.clone(),
            r.period.clone(),
            r.year.to_string(),
            r.amount.to_string(),
        ])?;
    }
    wtr.flush()?;
    info!("Wrote {} ({} rows)", path.display(), records.len());
    Ok(())
}

/// Reads a file written by [`write_consolidated`]. Rows whose year or amount
/// no longer parse are skipped.
pub fn read_consolidated(path: &Path) -> Result<Vec<ConsolidatedRecord>> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.display().to_string()));
    }
    let mut rdr = delimited_reader(BufReader::new(File::open(path)?), OUTPUT_DELIMITER);
    let headers = HeaderIndex::new(rdr.byte_headers()?);
    let mut records = Vec::new();
    for row in rdr.byte_records() {
        let row = row?;
        let year = headers.get_or_empty(&row, HDR_YEAR).parse::<i32>();
        let amount = parse_plain_amount(&headers.get_or_empty(&row, HDR_AMOUNT));
        match (year, amount) {
            (Ok(year), Some(amount)) => records.push(ConsolidatedRecord {
                entity_id: headers.get_or_empty(&row, HDR_ENTITY_ID),
                period: headers.get_or_empty(&row, HDR_PERIOD),
                year,
                amount,
            }),
            _ => warn!("Skipping unreadable row in {}", path.display()),
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const HEADER: &str = "DATA;REG_ANS;CD_CONTA_CONTABIL;DESCRICAO;VL_SALDO_INICIAL;VL_SALDO_FINAL";

    fn q1() -> FilePeriod {
        FilePeriod {
            label: "Q1".to_string(),
            year: 2024,
            recognized: true,
        }
    }

    fn run(consolidator: &Consolidator, body: &str) -> (Accumulator, ConsolidationStats) {
        let mut acc = Accumulator::new();
        let mut stats = ConsolidationStats::default();
        consolidator
            .process_reader(body.as_bytes(), b';', &q1(), &mut acc, &mut stats)
            .unwrap();
        (acc, stats)
    }

    fn amount_of(acc: &Accumulator, entity: &str) -> Decimal {
        acc.get(&(entity.to_string(), "Q1".to_string(), 2024))
            .map(|r| r.amount)
            .unwrap()
    }

    #[test]
    fn test_period_from_file_name() {
        let c = Consolidator::new("41", 2025);
        let p = c.period_from_file_name(Path::new("extraidos/2024_3T/3T2024.csv"));
        assert_eq!(p, FilePeriod { label: "Q3".into(), year: 2024, recognized: true });
        let fallback = c.period_from_file_name(Path::new("despesas.csv"));
        assert_eq!(fallback, FilePeriod { label: "Q1".into(), year: 2025, recognized: false });
    }

    #[test]
    fn test_exact_account_code_and_summing() {
        let body = format!(
            "{}\n\
             2024-03-31;123456;41;Eventos;0;\"1.000,50\"\n\
             2024-03-31;123456;41;Eventos;0;200,25\n\
             2024-03-31;123456;411;Sub;0;999,00\n\
             2024-03-31;654321;41;Eventos;0;abc\n",
            HEADER
        );
        let (acc, stats) = run(&Consolidator::new("41", 2024), &body);
        assert_eq!(acc.len(), 2);
        assert_eq!(amount_of(&acc, "123456"), Decimal::from_str("1200.75").unwrap());
        assert_eq!(amount_of(&acc, "654321"), Decimal::ZERO);
        assert_eq!(stats.rows_processed, 3);
        assert_eq!(stats.rows_discarded, 0);
    }

    #[test]
    fn test_blank_entity_and_short_rows_are_discarded() {
        let body = format!(
            "{}\n2024-03-31;;41;Eventos;0;10,00\n2024-03-31;123456;41\n\n2024-03-31;123456;41;E;0;5,00\n",
            HEADER
        );
        let (acc, stats) = run(&Consolidator::new("41", 2024), &body);
        assert_eq!(acc.len(), 1);
        assert_eq!(stats.rows_discarded, 2);
        assert_eq!(stats.rows_processed, 1);
    }

    #[test]
    fn test_row_order_does_not_change_totals() {
        let rows = [
            "2024-03-31;1;41;E;0;10,10",
            "2024-03-31;2;41;E;0;1.000,00",
            "2024-03-31;1;41;E;0;-3,05",
            "2024-03-31;2;41;E;0;0,01",
            "2024-03-31;1;41;E;0;7,00",
        ];
        let c = Consolidator::new("41", 2024);
        let forward = format!("{}\n{}\n", HEADER, rows.join("\n"));
        let mut reversed_rows = rows.to_vec();
        reversed_rows.reverse();
        reversed_rows.swap(0, 2);
        let shuffled = format!("{}\n{}\n", HEADER, reversed_rows.join("\n"));

        let (a, _) = run(&c, &forward);
        let (b, _) = run(&c, &shuffled);
        let totals = |acc: &Accumulator| acc.values().map(|r| (r.entity_id.clone(), r.amount)).collect::<Vec<_>>();
        assert_eq!(totals(&a), totals(&b));
        assert_eq!(amount_of(&a, "1"), Decimal::from_str("14.05").unwrap());
    }

    #[test]
    fn test_overflowing_sum_discards_the_row() {
        let body = format!(
            "{}\n\
             2024-03-31;1;41;E;0;79.228.162.514.264.337.593.543.950.335\n\
             2024-03-31;1;41;E;0;79.228.162.514.264.337.593.543.950.335\n\
             2024-03-31;2;41;E;0;5,00\n",
            HEADER
        );
        let (acc, stats) = run(&Consolidator::new("41", 2024), &body);
        assert_eq!(amount_of(&acc, "1"), Decimal::MAX);
        assert_eq!(amount_of(&acc, "2"), Decimal::from_str("5.00").unwrap());
        assert_eq!(stats.rows_processed, 2);
        assert_eq!(stats.rows_discarded, 1);
    }

    #[test]
    fn test_missing_column_fails_the_stream() {
        let c = Consolidator::new("41", 2024);
        let mut acc = Accumulator::new();
        let mut stats = ConsolidationStats::default();
        let result = c.process_reader("REG_ANS;VALOR\n1;2\n".as_bytes(), b';', &q1(), &mut acc, &mut stats);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_consolidated_header_and_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("out").join("consolidado_despesas.csv");
        let records = vec![ConsolidatedRecord {
            entity_id: "123456".into(),
            period: "Q2".into(),
            year: 2024,
            amount: Decimal::from_str("150.00").unwrap(),
        }];
        write_consolidated(&records, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "RegistroANS;Trimestre;Ano;ValorDespesas\n123456;Q2;2024;150.00\n");
    }
}
