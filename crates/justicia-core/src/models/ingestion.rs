use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Client-side status of a staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Uploading,
    Success,
    Error,
    Cancelled,
}

impl FileStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Success | FileStatus::Error | FileStatus::Cancelled
        )
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Uploading => write!(f, "uploading"),
            FileStatus::Success => write!(f, "success"),
            FileStatus::Error => write!(f, "error"),
            FileStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Processing status reported by the backend for one tracking identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Error,
    Cancelled,
    /// Any status this client does not know; treated as still in flight.
    #[serde(other)]
    Unknown,
}

impl Display for ProcessingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Error => write!(f, "error"),
            ProcessingStatus::Cancelled => write!(f, "cancelled"),
            ProcessingStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// One entry of a batched status response, positionally aligned with the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatusEntry {
    pub status: ProcessingStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl FileStatusEntry {
    /// Progress clamped to 0..=100.
    pub fn progress_percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.clamp(0.0, 100.0).round() as u8
    }
}

/// A file selected for ingestion and its client-side lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFile {
    pub id: Uuid,
    pub name: String,
    pub size: u64,
    pub content_type: Option<String>,
    /// Expediente number; may be empty while the file is staged.
    pub case_number: String,
    pub status: FileStatus,
    pub progress: u8,
    pub tracking_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip)]
    pub content: Bytes,
}

impl UploadFile {
    pub fn new(
        name: impl Into<String>,
        content: Bytes,
        content_type: Option<String>,
        case_number: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            size: content.len() as u64,
            content_type,
            case_number: case_number.into(),
            status: FileStatus::Pending,
            progress: 0,
            tracking_id: None,
            message: String::new(),
            result: None,
            content,
        }
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    /// Whether the user may remove the file from the staged list.
    pub fn is_removable(&self) -> bool {
        self.status == FileStatus::Pending || self.status.is_terminal()
    }
}
