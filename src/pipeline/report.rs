use crate::error::Result;
use crate::pipeline::ingestion::discovery::DiscoveryStats;
use crate::pipeline::ingestion::fetch::FetchStats;
use crate::pipeline::processing::aggregate::AggregationStats;
use crate::pipeline::processing::consolidate::ConsolidationStats;
use crate::pipeline::processing::enrich::{EnrichmentStats, RegistryStats};
use crate::pipeline::processing::validate::ValidationStats;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Data-quality counters for one run, built from the stage statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InconsistencyReport {
    pub records_processed: usize,
    pub records_discarded: usize,
    pub zero_amounts: usize,
    pub negative_amounts: usize,
    pub unrecognized_period_files: usize,
    pub invalid_tax_ids: usize,
    pub conflicting_tax_ids: usize,
}

impl InconsistencyReport {
    pub fn record_consolidation(&mut self, stats: &ConsolidationStats) {
        self.records_processed += stats.rows_processed;
        self.records_discarded += stats.rows_discarded;
        self.unrecognized_period_files += stats.unrecognized_periods;
    }

    pub fn record_validation(&mut self, stats: &ValidationStats) {
        self.zero_amounts += stats.zero_amounts;
        self.negative_amounts += stats.negative_amounts;
    }

    pub fn record_registry(&mut self, stats: &RegistryStats) {
        self.invalid_tax_ids += stats.invalid_tax_ids;
        self.conflicting_tax_ids += stats.conflicting_tax_ids;
    }

    pub fn log_summary(&self) {
        info!("=== Inconsistency report ===");
        info!("Records processed:         {}", self.records_processed);
        info!("Records discarded:         {}", self.records_discarded);
        info!("Zero amounts:              {}", self.zero_amounts);
        info!("Negative amounts:          {}", self.negative_amounts);
        info!("Unrecognized period files: {}", self.unrecognized_period_files);
        info!("Invalid CNPJs:             {}", self.invalid_tax_ids);
        info!("Conflicting CNPJs:         {}", self.conflicting_tax_ids);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub periods: Vec<String>,
    pub discovery: Option<DiscoveryStats>,
    pub fetch: Option<FetchStats>,
    pub consolidation: Option<ConsolidationStats>,
    pub validation: Option<ValidationStats>,
    pub enrichment: Option<EnrichmentStats>,
    pub aggregation: Option<AggregationStats>,
    pub inconsistencies: InconsistencyReport,
    pub outputs: Vec<PathBuf>,
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            periods: Vec::new(),
            discovery: None,
            fetch: None,
            consolidation: None,
            validation: None,
            enrichment: None,
            aggregation: None,
            inconsistencies: InconsistencyReport::default(),
            outputs: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
