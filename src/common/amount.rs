//! Decimal parsing for the two number conventions the pipeline meets: the
//! source filings (`1.234,56`) and its own outputs (`1234.56`).

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;

/// Parses a source-convention amount: quotes stripped, `.` thousands
/// separators removed, `,` as decimal point. Blank or unparsable input is zero.
pub fn parse_locale_amount(raw: &str) -> Decimal {
    let cleaned = raw.replace('"', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Decimal::ZERO;
    }
    let normalized = cleaned.replace('.', "").replace(',', ".");
    parse_decimal(&normalized).unwrap_or(Decimal::ZERO)
}

/// Parses an amount that may use `,` as decimal point but carries no
/// thousands separators. Blank or unparsable input yields `None`.
pub fn parse_plain_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_decimal(&trimmed.replace(',', "."))
}

/// Two decimal places, midpoints rounded away from zero. The result always
/// carries a scale of 2, so `150` renders as `150.00`.
pub fn round_half_up(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
