use crate::common::amount::parse_plain_amount;
use crate::constants::{HDR_AMOUNT, HDR_ENTITY_ID, HDR_PERIOD, HDR_YEAR, OUTPUT_DELIMITER};
use crate::error::{PipelineError, Result};
use crate::observability::metrics::{self, MetricName};
use crate::pipeline::processing::consolidate::write_consolidated;
use crate::pipeline::utils::{delimited_reader, HeaderIndex};
use crate::types::ConsolidatedRecord;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub zero_amounts: usize,
    pub negative_amounts: usize,
}

/// Re-reads consolidated rows, keeping only complete rows with a positive amount.
pub fn validate_reader<R: Read>(reader: R) -> Result<(Vec<ConsolidatedRecord>, ValidationStats)> {
    let mut rdr = delimited_reader(reader, OUTPUT_DELIMITER);
    let headers = HeaderIndex::new(rdr.byte_headers()?);
    let mut stats = ValidationStats::default();
    let mut valid = Vec::new();

    for row in rdr.byte_records() {
        stats.total += 1;
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!("Invalid row {}: {}", stats.total, e);
                stats.invalid += 1;
                continue;
            }
        };
        let entity = headers.get_or_empty(&row, HDR_ENTITY_ID);
        let period = headers.get_or_empty(&row, HDR_PERIOD);
        let year = headers.get_or_empty(&row, HDR_YEAR);
        let raw_amount = headers.get_or_empty(&row, HDR_AMOUNT);

        if entity.is_empty() || period.is_empty() || year.is_empty() {
            stats.invalid += 1;
            continue;
        }
        let Ok(year) = year.parse::<i32>() else {
            stats.invalid += 1;
            continue;
        };
        let amount = match parse_plain_amount(&raw_amount) {
            Some(amount) if amount > Decimal::ZERO => amount,
            Some(amount) => {
                if amount.is_zero() {
                    stats.zero_amounts += 1;
                } else {
                    stats.negative_amounts += 1;
                }
                stats.invalid += 1;
                continue;
            }
            None => {
                stats.invalid += 1;
                continue;
            }
        };

        stats.valid += 1;
        valid.push(ConsolidatedRecord {
            entity_id: entity,
            period,
            year,
            amount,
        });
    }
    Ok((valid, stats))
}

/// Validates `input` into `output`. A missing input aborts the run.
#[instrument(skip_all, fields(input = %input.display()))]
pub fn validate_file(input: &Path, output: &Path) -> Result<ValidationStats> {
    if !input.exists() {
        return Err(PipelineError::MissingInput(format!(
            "consolidated file not found: {}",
            input.display()
        )));
    }
    let (records, stats) = validate_reader(BufReader::new(File::open(input)?))?;
    write_consolidated(&records, output)?;

    metrics::increment(MetricName::ValidateRowsValid, stats.valid as u64);
    metrics::increment(MetricName::ValidateRowsInvalid, stats.invalid as u64);
    info!(
        "Validation: {} rows, {} valid, {} invalid ({} zero, {} negative)",
        stats.total, stats.valid, stats.invalid, stats.zero_amounts, stats.negative_amounts
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_rejects_incomplete_and_non_positive_rows() {
        let body = "RegistroANS;Trimestre;Ano;ValorDespesas\n\
                    1;Q1;2024;150.00\n\
                    2;Q1;2024;0\n\
                    3;Q1;2024;-5.00\n\
                    4;Q1;2024;abc\n\
                    ;Q1;2024;10.00\n\
                    6;;2024;10.00\n\
                    7;Q1;;10.00\n\
                    8;Q2;2024;12,5\n\
                    9;Q1;20x4;10.00\n";
        let (records, stats) = validate_reader(body.as_bytes()).unwrap();
        assert_eq!(stats.total, 9);
        assert_eq!(stats.valid, 2);
        assert_eq!(stats.invalid, 7);
        assert_eq!(stats.zero_amounts, 1);
        assert_eq!(stats.negative_amounts, 1);
        assert_eq!(records[1].amount, Decimal::from_str("12.5").unwrap());
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = validate_file(&tmp.path().join("absent.csv"), &tmp.path().join("out.csv")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput(_)));
    }

    #[test]
    fn test_validate_file_writes_plain_decimals() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.csv");
        let output = tmp.path().join("out.csv");
        std::fs::write(&input, "RegistroANS;Trimestre;Ano;ValorDespesas\n1;Q1;2024;1E+2\n").unwrap();
        let stats = validate_file(&input, &output).unwrap();
        assert_eq!(stats.valid, 1);
        let text = std::fs::read_to_string(&output).unwrap();
        assert!(!text.contains('E'));
        assert!(text.lines().nth(1).unwrap().starts_with("1;Q1;2024;100"));
    }
}
