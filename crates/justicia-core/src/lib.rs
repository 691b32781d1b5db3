//! JusticIA Core Library
//!
//! This crate provides the domain models, error types, configuration, case-number
//! validation and transport contracts shared by the API client, the orchestration
//! controllers and the CLI.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod transport;
pub mod validation;

// Re-export commonly used types
pub use config::{CeilingPolicy, ChatConfig, IngestionConfig, JusticiaConfig};
pub use error::{CaseNumberError, IngestionError};
pub use models::{
    CaseNumber, ChatMessage, ChatScope, ContextAction, FileStatus, FileStatusEntry,
    ProcessingStatus, SessionContext, UploadFile,
};
pub use transport::{
    ChatTransport, ChunkStream, FilePayload, IngestionTransport, QueryRequest, StreamEvent,
    SubmitResponse,
};
pub use validation::{normalize_case_number, validate_case_number};
