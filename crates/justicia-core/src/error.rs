//! Error types module
//!
//! Validation and controller-misuse errors. Transport failures travel as
//! `anyhow::Error` across the transport seam and are converted to visible state
//! by the controllers, so they have no variant here.

use uuid::Uuid;

use crate::models::FileStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseNumberError {
    #[error("Case number is required")]
    Missing,

    #[error("Invalid case number format: '{0}' (expected e.g. 98-003287-0166-LA)")]
    InvalidFormat(String),
}

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("File not found: {0}")]
    FileNotFound(Uuid),

    #[error("File {id} cannot be {action} while {status}")]
    InvalidState {
        id: Uuid,
        status: FileStatus,
        action: &'static str,
    },

    #[error("File {0} has no tracking identifier yet")]
    MissingTrackingId(Uuid),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error(transparent)]
    CaseNumber(#[from] CaseNumberError),

    #[error("Transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl IngestionError {
    /// Whether the caller can fix the input and try again.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            IngestionError::UnsupportedFileType(_)
                | IngestionError::FileTooLarge { .. }
                | IngestionError::CaseNumber(_)
        )
    }
}
