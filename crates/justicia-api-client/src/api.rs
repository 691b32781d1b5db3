//! Domain methods for the JusticIA API client.
//!
//! `ApiClient` implements the chat and ingestion transport contracts from
//! `justicia_core::transport`, so the orchestration controllers can run
//! against the real backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use justicia_core::{
    ChatTransport, ChunkStream, ContextAction, FilePayload, FileStatusEntry, IngestionTransport,
    QueryRequest, SubmitResponse,
};

use crate::sse::decode_stream;
use crate::ApiClient;

/// Body of a streamed RAG query, in the backend's field names.
#[derive(Debug, Serialize)]
struct StreamQueryBody<'a> {
    query: &'a str,
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expediente_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    request_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ContextBody<'a> {
    session_id: &'a str,
    expediente_number: &'a str,
    action: ContextAction,
}

#[derive(Debug, Serialize)]
struct StatusBatchBody<'a> {
    tracking_ids: &'a [String],
}

/// Batched status response: either a bare array or wrapped in `statuses`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StatusBatchResponse {
    List(Vec<FileStatusEntry>),
    Wrapped { statuses: Vec<FileStatusEntry> },
}

impl StatusBatchResponse {
    fn into_entries(self) -> Vec<FileStatusEntry> {
        match self {
            StatusBatchResponse::List(entries) => entries,
            StatusBatchResponse::Wrapped { statuses } => statuses,
        }
    }
}

#[async_trait]
impl ChatTransport for ApiClient {
    #[tracing::instrument(skip(self, request), fields(request_id = %request.request_id))]
    async fn stream_query(&self, request: QueryRequest) -> Result<ChunkStream> {
        let body = StreamQueryBody {
            query: &request.query,
            session_id: &request.session_id,
            expediente_number: request.case_number.as_deref(),
            top_k: request.top_k,
            request_id: &request.request_id,
        };

        let token = self.begin_query();
        let response = self
            .post_stream("/rag/consulta/stream", &body)
            .await
            .context("Failed to start streamed query")?;

        tracing::debug!("Answer stream opened");

        let events = decode_stream(Box::pin(response.bytes_stream()));
        Ok(events.take_until(token.cancelled_owned()).boxed())
    }

    async fn cancel_active_query(&self) -> Result<()> {
        if self.abort_active_query() {
            tracing::debug!("Aborted active streamed query");
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update_context(
        &self,
        session_id: &str,
        case_number: &str,
        action: ContextAction,
    ) -> Result<()> {
        let body = ContextBody {
            session_id,
            expediente_number: case_number,
            action,
        };
        self.post_json_ack("/rag/context", &body)
            .await
            .context("Failed to update chat context")
    }
}

#[async_trait]
impl IngestionTransport for ApiClient {
    #[tracing::instrument(skip(self, files), fields(file_count = files.len()))]
    async fn submit_files(
        &self,
        case_number: &str,
        files: Vec<FilePayload>,
    ) -> Result<SubmitResponse> {
        let mut form =
            reqwest::multipart::Form::new().text("expediente_numero", case_number.to_string());

        for file in files {
            let mut part =
                reqwest::multipart::Part::bytes(file.content.to_vec()).file_name(file.name.clone());
            if let Some(content_type) = &file.content_type {
                part = part
                    .mime_str(content_type)
                    .with_context(|| format!("Invalid content type for {}", file.name))?;
            }
            form = form.part("files", part);
        }

        self.post_multipart("/ingesta/archivos", form)
            .await
            .context("Failed to submit files")
    }

    async fn query_file_status(&self, tracking_ids: &[String]) -> Result<Vec<FileStatusEntry>> {
        let response: StatusBatchResponse = self
            .post_json("/ingesta/status/batch", &StatusBatchBody { tracking_ids })
            .await
            .context("Failed to query file status")?;
        Ok(response.into_entries())
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_file_processing(&self, tracking_id: &str) -> Result<()> {
        let path = format!("/ingesta/cancel/{}", urlencoding::encode(tracking_id));
        self.post_json_ack(&path, &serde_json::json!({}))
            .await
            .context("Failed to cancel file processing")
    }
}
