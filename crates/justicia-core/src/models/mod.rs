//! Domain models shared by the controllers, the API client and the CLI.

pub mod case_number;
pub mod chat;
pub mod ingestion;
pub mod session;

pub use case_number::CaseNumber;
pub use chat::{ChatMessage, ChatScope, ContextAction};
pub use ingestion::{FileStatus, FileStatusEntry, ProcessingStatus, UploadFile};
pub use session::SessionContext;
