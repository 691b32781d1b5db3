//! Expediente number normalization and validation.
//!
//! Users paste case numbers from PDFs and word processors, which routinely turn
//! hyphens into en/em dashes or full-width forms. Normalization folds those back
//! to ASCII before the format check.

use regex::Regex;
use std::sync::LazyLock;

/// Two digits, six digits, four digits and a two-letter matter code.
pub const CASE_NUMBER_PATTERN: &str = r"^[0-9]{2}-[0-9]{6}-[0-9]{4}-[A-Z]{2}$";

static CASE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CASE_NUMBER_PATTERN).expect("case number pattern is valid"));

fn fold_char(c: char) -> char {
    match c {
        '\u{2010}'..='\u{2015}' | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => '-',
        // Full-width ASCII block
        '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
        _ => c,
    }
}

/// Fold dash variants and full-width characters to ASCII, drop whitespace, uppercase.
pub fn normalize_case_number(raw: &str) -> String {
    raw.chars()
        .map(fold_char)
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Exact format check; callers normalize first.
pub fn validate_case_number(value: &str) -> bool {
    CASE_NUMBER_RE.is_match(value)
}
