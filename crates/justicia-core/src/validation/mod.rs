//! Validation modules

pub mod case_number;
pub mod upload;

pub use case_number::{normalize_case_number, validate_case_number, CASE_NUMBER_PATTERN};
pub use upload::validate_upload;
