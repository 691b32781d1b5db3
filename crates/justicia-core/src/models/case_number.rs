use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::CaseNumberError;
use crate::validation::{normalize_case_number, validate_case_number};

/// A normalized, validated expediente number such as `98-003287-0166-LA`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaseNumber(String);

impl CaseNumber {
    /// Normalize `raw` and accept it only if the result has the expediente shape.
    pub fn parse(raw: &str) -> Result<Self, CaseNumberError> {
        if raw.trim().is_empty() {
            return Err(CaseNumberError::Missing);
        }
        let normalized = normalize_case_number(raw);
        if validate_case_number(&normalized) {
            Ok(CaseNumber(normalized))
        } else {
            Err(CaseNumberError::InvalidFormat(raw.trim().to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CaseNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl FromStr for CaseNumber {
    type Err = CaseNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CaseNumber::parse(s)
    }
}

impl TryFrom<String> for CaseNumber {
    type Error = CaseNumberError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CaseNumber::parse(&value)
    }
}

impl From<CaseNumber> for String {
    fn from(value: CaseNumber) -> Self {
        value.0
    }
}

impl AsRef<str> for CaseNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_before_validating() {
        let case = CaseNumber::parse("  98–003287–0166–la ").unwrap();
        assert_eq!(case.as_str(), "98-003287-0166-LA");
    }

    #[test]
    fn parse_rejects_blank_and_malformed() {
        assert_eq!(CaseNumber::parse("   "), Err(CaseNumberError::Missing));
        assert!(matches!(
            CaseNumber::parse("98-3287-0166-LA"),
            Err(CaseNumberError::InvalidFormat(_))
        ));
    }

    #[test]
    fn deserialize_goes_through_validation() {
        let ok: CaseNumber = serde_json::from_str("\"98-003287-0166-la\"").unwrap();
        assert_eq!(ok.to_string(), "98-003287-0166-LA");
        assert!(serde_json::from_str::<CaseNumber>("\"hola\"").is_err());
    }
}
