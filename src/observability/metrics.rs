//! Pipeline metrics using Prometheus naming conventions.
//!
//! Recording is a no-op until [`init`] installs the recorder, so library code
//! and tests can call these functions freely.

use crate::error::{PipelineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Every metric the pipeline records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    DiscoveryPeriodsFound,
    DiscoveryYearErrors,
    FetchCacheHits,
    FetchDownloads,
    FetchDownloadErrors,
    FetchEntriesExtracted,
    FetchEntriesRejected,
    ConsolidateRowsProcessed,
    ConsolidateRowsDiscarded,
    ConsolidateFileErrors,
    ValidateRowsValid,
    ValidateRowsInvalid,
    EnrichMatched,
    EnrichUnmatched,
    EnrichRegistryRowErrors,
    AggregateGroups,
    StageDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::DiscoveryPeriodsFound => "ans_discovery_periods_found_total",
            MetricName::DiscoveryYearErrors => "ans_discovery_year_errors_total",
            MetricName::FetchCacheHits => "ans_fetch_cache_hits_total",
            MetricName::FetchDownloads => "ans_fetch_downloads_total",
            MetricName::FetchDownloadErrors => "ans_fetch_download_errors_total",
            MetricName::FetchEntriesExtracted => "ans_fetch_entries_extracted_total",
            MetricName::FetchEntriesRejected => "ans_fetch_entries_rejected_total",
            MetricName::ConsolidateRowsProcessed => "ans_consolidate_rows_processed_total",
            MetricName::ConsolidateRowsDiscarded => "ans_consolidate_rows_discarded_total",
            MetricName::ConsolidateFileErrors => "ans_consolidate_file_errors_total",
            MetricName::ValidateRowsValid => "ans_validate_rows_valid_total",
            MetricName::ValidateRowsInvalid => "ans_validate_rows_invalid_total",
            MetricName::EnrichMatched => "ans_enrich_matched_total",
            MetricName::EnrichUnmatched => "ans_enrich_unmatched_total",
            MetricName::EnrichRegistryRowErrors => "ans_enrich_registry_row_errors_total",
            MetricName::AggregateGroups => "ans_aggregate_groups_total",
            MetricName::StageDuration => "ans_stage_duration_seconds",
        }
    }
}

/// Installs the Prometheus recorder. Idempotent.
pub fn init() -> Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PipelineError::Config(format!("Failed to install Prometheus recorder: {}", e)))?;
    let _ = HANDLE.set(handle);
    info!("Metrics recorder installed");
    Ok(())
}

/// Renders the current metrics in Prometheus text format, if a recorder is installed.
pub fn render() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// Writes the rendered metrics to `path`. Returns `None` when no recorder is installed.
pub fn write_snapshot(path: &Path) -> Result<Option<PathBuf>> {
    match render() {
        Some(text) => {
            fs::write(path, text)?;
            Ok(Some(path.to_path_buf()))
        }
        None => Ok(None),
    }
}

pub fn increment(name: MetricName, count: u64) {
    if count > 0 {
        ::metrics::counter!(name.as_str()).increment(count);
    }
}

pub fn stage_duration(stage: &'static str, secs: f64) {
    ::metrics::histogram!(MetricName::StageDuration.as_str(), "stage" => stage).record(secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_follow_prometheus_conventions() {
        let names = [
            MetricName::DiscoveryPeriodsFound,
            MetricName::FetchEntriesRejected,
            MetricName::EnrichUnmatched,
            MetricName::StageDuration,
        ];
        for name in names {
            let s = name.as_str();
            assert!(s.starts_with("ans_"));
            assert!(s.ends_with("_total") || s.ends_with("_seconds"));
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment(MetricName::FetchDownloads, 3);
        stage_duration("consolidate", 0.5);
    }
}
