use crate::common::amount::{parse_plain_amount, round_half_up};
use crate::constants::{AGGREGATED_HEADER, HDR_AMOUNT, HDR_LEGAL_NAME, HDR_REGION, OUTPUT_DELIMITER};
use crate::error::{PipelineError, Result};
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::processing::enrich::region_or_default;
use crate::pipeline::utils::{create_output, delimited_reader, HeaderIndex};
use crate::types::AggregatedGroup;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregationStats {
    pub rows_read: usize,
    pub groups: usize,
}

/// Amount lists per (legal name, region), in first-seen group order.
#[derive(Debug, Default)]
pub struct GroupAccumulator {
    index: HashMap<(String, String), usize>,
    groups: Vec<((String, String), Vec<Decimal>)>,
}

impl GroupAccumulator {
    pub fn add(&mut self, legal_name: &str, region: &str, amount: Decimal) {
        let key = (legal_name.to_string(), region_or_default(region).to_string());
        match self.index.get(&key) {
            Some(&i) => self.groups[i].1.push(amount),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![amount]));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Statistics per group, largest total first. Equal totals keep
    /// first-seen order. Fails when a group total leaves the decimal range.
    pub fn finish(self) -> Result<Vec<AggregatedGroup>> {
        let mut result = self
            .groups
            .into_iter()
            .map(|((legal_name, region), amounts)| summarize(legal_name, region, &amounts))
            .collect::<Result<Vec<AggregatedGroup>>>()?;
        result.sort_by(|a, b| b.total_amount.cmp(&a.total_amount));
        Ok(result)
    }
}

fn summarize(legal_name: String, region: String, amounts: &[Decimal]) -> Result<AggregatedGroup> {
    let total = amounts
        .iter()
        .try_fold(Decimal::ZERO, |sum, amount| sum.checked_add(*amount))
        .ok_or_else(|| {
            PipelineError::AmountOverflow(format!("total for {} ({})", legal_name, region))
        })?;
    let count = amounts.len();
    let mean = if count == 0 {
        Decimal::ZERO
    } else {
        total / Decimal::from(count)
    };
    Ok(AggregatedGroup {
        legal_name,
        region,
        total_amount: total,
        mean_amount: round_half_up(mean),
        std_dev: round_half_up(sample_std_dev(amounts)),
        sample_count: count,
    })
}

/// Sample (n - 1) standard deviation; zero for fewer than two values.
pub fn sample_std_dev(amounts: &[Decimal]) -> Decimal {
    if amounts.len() < 2 {
        return Decimal::ZERO;
    }
    let values: Vec<f64> = amounts.iter().map(|a| a.to_f64().unwrap_or(0.0)).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Decimal::from_f64(variance.sqrt()).unwrap_or(Decimal::ZERO)
}

/// Groups enriched rows. Unparsable amounts count as zero.
pub fn aggregate_reader<R: Read>(reader: R) -> Result<(Vec<AggregatedGroup>, AggregationStats)> {
    let mut rdr = delimited_reader(reader, OUTPUT_DELIMITER);
    let headers = HeaderIndex::new(rdr.byte_headers()?);
    let mut acc = GroupAccumulator::default();
    let mut stats = AggregationStats::default();

    for row in rdr.byte_records() {
        let row = row?;
        stats.rows_read += 1;
        let amount = parse_plain_amount(&headers.get_or_empty(&row, HDR_AMOUNT)).unwrap_or(Decimal::ZERO);
        acc.add(
            &headers.get_or_empty(&row, HDR_LEGAL_NAME),
            &headers.get_or_empty(&row, HDR_REGION),
            amount,
        );
    }
    stats.groups = acc.len();
    Ok((acc.finish()?, stats))
}

pub fn write_aggregated(groups: &[AggregatedGroup], path: &Path) -> Result<()> {
    let mut wtr = create_output(path)?;
    wtr.write_record(AGGREGATED_HEADER)?;
    for g in groups {
        wtr.write_record(&[
            g.legal_name.clone(),
            g.region.clone(),
            g.total_amount.to_string(),
            g.mean_amount.to_string(),
            g.std_dev.to_string(),
            g.sample_count.to_string(),
        ])?;
    }
    wtr.flush()?;
    info!("Wrote {} ({} groups)", path.display(), groups.len());
    Ok(())
}

#[instrument(skip_all, fields(input = %input.display()))]
pub fn aggregate_file(input: &Path, output: &Path) -> Result<(Vec<AggregatedGroup>, AggregationStats)> {
    if !input.exists() {
        return Err(PipelineError::MissingInput(format!(
            "enriched file not found: {}",
            input.display()
        )));
    }
    let (groups, stats) = aggregate_reader(BufReader::new(File::open(input)?))?;
    write_aggregated(&groups, output)?;
    metrics::increment(MetricName::AggregateGroups, stats.groups as u64);
    info!("Aggregation: {} rows into {} groups", stats.rows_read, stats.groups);
    Ok((groups, stats))
}
