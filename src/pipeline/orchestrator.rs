use crate::app::ports::HttpClientPort;
use crate::config::Config;
use crate::constants::{AGGREGATED_FILE, CONSOLIDATED_FILE, ENRICHED_FILE, VALIDATED_FILE};
use crate::error::Result;
use crate::observability::metrics;
use crate::pipeline::bundle::{compress_single, write_bundle};
use crate::pipeline::ingestion::{ArchiveFetcher, PeriodDiscovery};
use crate::pipeline::processing::aggregate::aggregate_file;
use crate::pipeline::processing::consolidate::{write_consolidated, Consolidator};
use crate::pipeline::processing::enrich::{ColumnMapping, Enricher, RegistrySource};
use crate::pipeline::processing::filter::filter_relevant;
use crate::pipeline::processing::validate::validate_file;
use crate::pipeline::report::RunReport;
use std::fs;
use std::time::Instant;
use tracing::{info, instrument};

/// Runs the stages in order against one configuration. Each stage reads the
/// previous stage's output from disk, so `ingest` and `transform` can run
/// separately.
pub struct PipelineOrchestrator<'a> {
    config: &'a Config,
    http: &'a dyn HttpClientPort,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(config: &'a Config, http: &'a dyn HttpClientPort) -> Self {
        Self { config, http }
    }

    /// Identifiers of the most recent configured number of periods.
    pub fn discover(&self, report: &mut RunReport) -> Result<Vec<String>> {
        let t = Instant::now();
        let discovery = PeriodDiscovery::new(self.http, &self.config.sources.base_url);
        let (periods, stats) = discovery.latest_periods(self.config.processing.periods)?;
        metrics::stage_duration("discover", t.elapsed().as_secs_f64());

        let identifiers: Vec<String> = periods.iter().map(|p| p.period.identifier()).collect();
        report.periods = identifiers.clone();
        report.discovery = Some(stats);
        Ok(identifiers)
    }

    /// Discovery, download, extraction, filtering and consolidation.
    #[instrument(skip_all, fields(run_id = %report.run_id))]
    pub fn run_ingest(&self, report: &mut RunReport) -> Result<()> {
        let paths = &self.config.paths;
        fs::create_dir_all(&paths.output_dir)?;

        info!("🔎 Discovering the latest {} periods", self.config.processing.periods);
        let identifiers = self.discover(report)?;

        info!("📦 Fetching archives for {:?}", identifiers);
        let t = Instant::now();
        let fetcher = ArchiveFetcher::new(
            self.http,
            &self.config.sources.base_url,
            &paths.download_dir,
            &paths.extract_dir,
        );
        let outcome = fetcher.fetch_and_extract(&identifiers)?;
        metrics::stage_duration("fetch", t.elapsed().as_secs_f64());
        report.fetch = Some(outcome.stats);

        let t = Instant::now();
        let relevant = filter_relevant(&outcome.files);
        let consolidator = Consolidator::new(
            &self.config.processing.account_code,
            self.config.processing.fallback_year,
        );
        let (records, stats) = consolidator.consolidate_files(&relevant);
        let consolidated = paths.output_dir.join(CONSOLIDATED_FILE);
        write_consolidated(&records, &consolidated)?;
        let archive = compress_single(&consolidated)?;
        metrics::stage_duration("consolidate", t.elapsed().as_secs_f64());

        report.inconsistencies.record_consolidation(&stats);
        report.consolidation = Some(stats);
        report.outputs.push(consolidated);
        report.outputs.push(archive);
        info!("✅ Ingestion finished: {} consolidated rows", records.len());
        Ok(())
    }

    /// Validation, registry enrichment, aggregation and the final bundle.
    #[instrument(skip_all, fields(run_id = %report.run_id))]
    pub fn run_transform(&self, report: &mut RunReport) -> Result<()> {
        let paths = &self.config.paths;
        let consolidated = paths.output_dir.join(CONSOLIDATED_FILE);
        let validated = paths.output_dir.join(VALIDATED_FILE);
        let enriched = paths.output_dir.join(ENRICHED_FILE);
        let aggregated = paths.output_dir.join(AGGREGATED_FILE);

        info!("🧪 Validating {}", consolidated.display());
        let t = Instant::now();
        let validation = validate_file(&consolidated, &validated)?;
        metrics::stage_duration("validate", t.elapsed().as_secs_f64());
        report.inconsistencies.record_validation(&validation);
        report.validation = Some(validation);
        report.outputs.push(validated.clone());

        info!("🏢 Enriching with the operator registry");
        let t = Instant::now();
        let registry = RegistrySource::new(
            self.http,
            &self.config.sources.registry_url,
            &paths.temp_dir,
            &self.config.registry.marker_tokens,
        )
        .fetch()?;
        let enricher = Enricher::new(ColumnMapping::with_extra(&self.config.registry.extra_columns));
        let enrichment = enricher.enrich_file(&validated, &registry, &enriched)?;
        metrics::stage_duration("enrich", t.elapsed().as_secs_f64());
        report.inconsistencies.record_registry(&enrichment.registry);
        report.enrichment = Some(enrichment);
        report.outputs.push(enriched.clone());

        info!("📊 Aggregating by operator and state");
        let t = Instant::now();
        let (_, aggregation) = aggregate_file(&enriched, &aggregated)?;
        metrics::stage_duration("aggregate", t.elapsed().as_secs_f64());
        report.aggregation = Some(aggregation);
        report.outputs.push(aggregated);

        let (bundle, entries) = write_bundle(&paths.output_dir, &self.config.processing.bundle_name)?;
        info!("🗜️ Bundled {:?} into {}", entries, bundle.display());
        report.outputs.push(bundle);
        Ok(())
    }

    pub fn run_all(&self, report: &mut RunReport) -> Result<()> {
        self.run_ingest(report)?;
        self.run_transform(report)
    }
}
