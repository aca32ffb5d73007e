//! Check-digit validation for 14-digit Brazilian company tax identifiers (CNPJ).

const FIRST_WEIGHTS: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const SECOND_WEIGHTS: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const LENGTH: usize = 14;

/// Strips every non-digit character.
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Full validation: 14 digits, not all identical, both check digits correct.
pub fn is_valid(raw: &str) -> bool {
    let digits: Vec<u32> = digits_only(raw)
        .chars()
        .filter_map(|c| c.to_digit(10))
        .collect();

    if digits.len() != LENGTH {
        return false;
    }
    if digits.iter().all(|d| *d == digits[0]) {
        return false;
    }

    check_digit(&digits[..12], &FIRST_WEIGHTS) == digits[12]
        && check_digit(&digits[..13], &SECOND_WEIGHTS) == digits[13]
}

/// Only checks that 14 digits remain after stripping punctuation.
pub fn has_valid_format(raw: &str) -> bool {
    digits_only(raw).len() == LENGTH
}

/// Renders `XX.XXX.XXX/XXXX-XX`. Input that does not hold exactly 14 digits
/// is returned unchanged.
pub fn format(raw: &str) -> String {
    let d = digits_only(raw);
    if d.len() != LENGTH {
        return raw.to_string();
    }
    format!(
        "{}.{}.{}/{}-{}",
        &d[0..2],
        &d[2..5],
        &d[5..8],
        &d[8..12],
        &d[12..14]
    )
}

/// Digits only, left-padded with zeros to 14 characters.
pub fn normalize(raw: &str) -> String {
    format!("{:0>width$}", digits_only(raw), width = LENGTH)
}

fn check_digit(digits: &[u32], weights: &[u32]) -> u32 {
    let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
    match sum % 11 {
        r if r < 2 => 0,
        r => 11 - r,
    }
}
