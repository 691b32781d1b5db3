//! Transport contracts consumed by the orchestration controllers.
//!
//! The API client implements these against the JusticIA REST/SSE backend; tests
//! implement them in memory. Errors cross this seam as `anyhow::Error`.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::models::{ContextAction, FileStatusEntry};

/// One item of a streamed chat answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Chunk(String),
    /// Explicit end of stream. A stream that simply ends is treated the same way.
    Done,
}

pub type ChunkStream = BoxStream<'static, Result<StreamEvent>>;

/// Parameters of one streamed RAG query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Client request identifier; retries carry a distinguishable suffix.
    pub request_id: String,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a streamed answer for `request`. Dropping the stream aborts it.
    async fn stream_query(&self, request: QueryRequest) -> Result<ChunkStream>;

    /// Best-effort abort of the most recent `stream_query`.
    async fn cancel_active_query(&self) -> Result<()>;

    /// Tell the backend which expediente the session is now about.
    async fn update_context(
        &self,
        session_id: &str,
        case_number: &str,
        action: ContextAction,
    ) -> Result<()>;
}

/// File content handed to the transport for submission.
#[derive(Debug, Clone)]
pub struct FilePayload {
    pub name: String,
    pub content_type: Option<String>,
    pub content: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// One identifier per submitted file, in submission order.
    #[serde(default, alias = "file_ids")]
    pub tracking_ids: Vec<String>,
}

#[async_trait]
pub trait IngestionTransport: Send + Sync {
    /// Submit all files of one expediente in a single call.
    async fn submit_files(
        &self,
        case_number: &str,
        files: Vec<FilePayload>,
    ) -> Result<SubmitResponse>;

    /// Batched status query; one entry per identifier, same order.
    async fn query_file_status(&self, tracking_ids: &[String]) -> Result<Vec<FileStatusEntry>>;

    /// Ask the backend to stop processing one file. The effect is observed by polling.
    async fn cancel_file_processing(&self, tracking_id: &str) -> Result<()>;
}
