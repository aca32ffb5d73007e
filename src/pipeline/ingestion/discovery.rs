use crate::app::ports::HttpClientPort;
use crate::constants::{MAX_YEAR, MIN_YEAR};
use crate::error::Result;
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::ingestion::listing::{directory_url, extract_hrefs, resolve_href};
use crate::types::Period;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, instrument, warn};

static YEAR_DIR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})/").expect("static regex"));
static QUARTER_ARCHIVE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)([1-4])T(\d{4})\.zip").expect("static regex"));

/// A period found in a year listing, with the direct URL of its archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPeriod {
    pub period: Period,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub years_listed: usize,
    pub year_failures: usize,
    pub periods_found: usize,
    pub periods_selected: usize,
}

/// Finds the most recent quarters published under the filings index.
pub struct PeriodDiscovery<'a> {
    http: &'a dyn HttpClientPort,
    base_url: String,
}

impl<'a> PeriodDiscovery<'a> {
    pub fn new(http: &'a dyn HttpClientPort, base_url: &str) -> Self {
        Self {
            http,
            base_url: directory_url(base_url),
        }
    }

    /// The `n` most recent periods, newest first. Returns fewer when fewer exist.
    /// Only a failure to read the top-level index is an error.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub fn latest_periods(&self, n: usize) -> Result<(Vec<DiscoveredPeriod>, DiscoveryStats)> {
        info!("Listing available years");
        let index = self.http.get_text(&self.base_url)?;
        let years = parse_years(&index);
        info!("Years found: {:?}", years);

        let mut stats = DiscoveryStats {
            years_listed: years.len(),
            ..Default::default()
        };

        let mut found = Vec::new();
        for year in years {
            let year_url = format!("{}{}/", self.base_url, year);
            match self.http.get_text(&year_url) {
                Ok(listing) => {
                    let periods = parse_year_archives(&listing, &year_url);
                    debug!("Year {} lists {} quarterly archives", year, periods.len());
                    found.extend(periods);
                }
                Err(e) => {
                    warn!("Could not list quarters for year {}: {}", year, e);
                    stats.year_failures += 1;
                }
            }
        }

        stats.periods_found = found.len();
        let selected = select_latest(found, n);
        stats.periods_selected = selected.len();

        metrics::increment(MetricName::DiscoveryPeriodsFound, stats.periods_found as u64);
        metrics::increment(MetricName::DiscoveryYearErrors, stats.year_failures as u64);
        info!(
            "Selected {} of {} requested periods: {:?}",
            selected.len(),
            n,
            selected.iter().map(|d| d.period.identifier()).collect::<Vec<_>>()
        );
        Ok((selected, stats))
    }

    /// Identifiers (`"2024/3T"`) of the `n` most recent periods, newest first.
    pub fn latest_identifiers(&self, n: usize) -> Result<Vec<String>> {
        let (periods, _) = self.latest_periods(n)?;
        Ok(periods.iter().map(|d| d.period.identifier()).collect())
    }
}

/// Distinct years in `[MIN_YEAR, MAX_YEAR]` linked from the index, ascending.
pub fn parse_years(html: &str) -> Vec<i32> {
    let years: BTreeSet<i32> = extract_hrefs(html)
        .iter()
        .filter_map(|href| YEAR_DIR.captures(href))
        .filter_map(|caps| caps[1].parse::<i32>().ok())
        .filter(|year| (MIN_YEAR..=MAX_YEAR).contains(year))
        .collect();
    years.into_iter().collect()
}

/// Quarterly archives linked from one year listing.
pub fn parse_year_archives(html: &str, year_url: &str) -> Vec<DiscoveredPeriod> {
    extract_hrefs(html)
        .into_iter()
        .filter_map(|href| {
            let caps = QUARTER_ARCHIVE.captures(&href)?;
            let quarter: u8 = caps[1].parse().ok()?;
            let year: i32 = caps[2].parse().ok()?;
            let period = Period::new(year, quarter).ok()?;
            Some(DiscoveredPeriod {
                period,
                url: resolve_href(year_url, &href),
            })
        })
        .collect()
}

/// Newest first, one entry per period, at most `n`.
pub fn select_latest(mut periods: Vec<DiscoveredPeriod>, n: usize) -> Vec<DiscoveredPeriod> {
    periods.sort_by(|a, b| b.period.cmp(&a.period));
    periods.dedup_by(|a, b| a.period == b.period);
    periods.truncate(n);
    periods
}
