//! JusticIA orchestration controllers.
//!
//! [`ChatController`] serializes streamed RAG queries so exactly one is active and
//! renders its chunks into the transcript. [`IngestionController`] submits staged
//! files grouped by expediente and polls each group until processing ends.
//! Both talk to the backend only through the transport traits in
//! `justicia_core::transport`.

pub mod chat;
pub mod ingestion;
pub mod primitives;

pub use chat::{ChatController, ChatEvent, TurnOutcome};
pub use ingestion::{
    FailedGroup, GroupHandle, GroupOutcome, IngestionController, IngestionEvent, StagedFile,
    UploadReport,
};
pub use primitives::{CeilingOutcome, Generation, GenerationCounter};
