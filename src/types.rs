use crate::common::tax_id;
use crate::error::{PipelineError, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A year + quarter reporting interval. Orders ascending by (year, quarter);
/// callers wanting most-recent-first sort in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Period {
    year: i32,
    quarter: u8,
}

impl Period {
    pub fn new(year: i32, quarter: u8) -> Result<Self> {
        if !(1..=4).contains(&quarter) {
            return Err(PipelineError::InvalidPeriod(format!(
                "quarter {} out of range for year {}",
                quarter, year
            )));
        }
        Ok(Self { year, quarter })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn quarter(&self) -> u8 {
        self.quarter
    }

    /// `"<year>/<quarter>T"`, e.g. `"2024/3T"`.
    pub fn identifier(&self) -> String {
        format!("{}/{}T", self.year, self.quarter)
    }

    /// Parses an identifier produced by [`Period::identifier`].
    pub fn parse_identifier(identifier: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidPeriod(identifier.to_string());
        let (year, quarter) = identifier.trim().split_once('/').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let quarter = quarter
            .strip_suffix('T')
            .or_else(|| quarter.strip_suffix('t'))
            .ok_or_else(invalid)?;
        let quarter: u8 = quarter.parse().map_err(|_| invalid())?;
        Self::new(year, quarter).map_err(|_| invalid())
    }

    /// Archive published for this period, e.g. `"3T2024.zip"`.
    pub fn archive_name(&self) -> String {
        format!("{}T{}.zip", self.quarter, self.year)
    }

    /// Per-period working sub-directory, e.g. `"2024_3T"`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}T", self.year, self.quarter)
    }

    /// Period label used in consolidated output, e.g. `"Q3"`.
    pub fn label(&self) -> String {
        format!("Q{}", self.quarter)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}T", self.year, self.quarter)
    }
}

/// One consolidated expense row. Identity is (normalized entity id, period, year);
/// the amount does not take part in equality.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedRecord {
    pub entity_id: String,
    pub period: String,
    pub year: i32,
    pub amount: Decimal,
}

impl ConsolidatedRecord {
    pub fn normalized_entity_id(&self) -> String {
        let digits = tax_id::digits_only(&self.entity_id);
        if digits.is_empty() {
            self.entity_id.trim().to_string()
        } else {
            digits
        }
    }
}

impl PartialEq for ConsolidatedRecord {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_entity_id() == other.normalized_entity_id()
            && self.period == other.period
            && self.year == other.year
    }
}

impl Eq for ConsolidatedRecord {}

impl Hash for ConsolidatedRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized_entity_id().hash(state);
        self.period.hash(state);
        self.year.hash(state);
    }
}

/// An operator as listed in the registry snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryEntry {
    pub registry_id: String,
    pub tax_id: String,
    pub legal_name: String,
    pub trade_name: String,
    pub category: String,
    pub region: String,
    pub municipality: String,
    pub registration_date: String,
}

impl RegistryEntry {
    pub fn normalized_tax_id(&self) -> String {
        tax_id::normalize(&self.tax_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    pub record: ConsolidatedRecord,
    pub tax_id: String,
    pub legal_name: String,
    pub category: String,
    pub region: String,
    pub matched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedGroup {
    pub legal_name: String,
    pub region: String,
    pub total_amount: Decimal,
    pub mean_amount: Decimal,
    pub std_dev: Decimal,
    pub sample_count: usize,
}
