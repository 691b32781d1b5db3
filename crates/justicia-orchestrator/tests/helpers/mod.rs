//! In-memory transports for controller tests.
//!
//! Streams are scripted per request; ingestion statuses are scripted per
//! tracking id.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use justicia_core::{
    ChatTransport, ChunkStream, ContextAction, FilePayload, FileStatusEntry, IngestionTransport,
    ProcessingStatus, QueryRequest, StreamEvent, SubmitResponse,
};

/// Poll `condition` on the paused clock until it holds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}

/// Scripted answer to one `stream_query` call.
pub enum Script {
    /// Stream fed by the test through a [`StreamSender`].
    Channel(mpsc::UnboundedReceiver<Result<StreamEvent>>),
    /// Fixed events, then the stream ends.
    Events(Vec<Result<StreamEvent>>),
    /// Opening the stream fails.
    OpenError(String),
}

impl Script {
    pub fn answer(chunks: &[&str]) -> Self {
        let mut events: Vec<Result<StreamEvent>> = chunks
            .iter()
            .map(|c| Ok(StreamEvent::Chunk(c.to_string())))
            .collect();
        events.push(Ok(StreamEvent::Done));
        Script::Events(events)
    }

    pub fn empty() -> Self {
        Script::Events(vec![Ok(StreamEvent::Done)])
    }

    pub fn channel() -> (Self, StreamSender) {
        let (tx, rx) = mpsc::unbounded();
        (Script::Channel(rx), StreamSender(tx))
    }
}

/// Test side of a [`Script::Channel`]. Sends after the controller dropped the
/// stream are silently lost.
pub struct StreamSender(mpsc::UnboundedSender<Result<StreamEvent>>);

impl StreamSender {
    pub fn chunk(&self, text: &str) {
        let _ = self.0.unbounded_send(Ok(StreamEvent::Chunk(text.to_string())));
    }

    pub fn done(&self) {
        let _ = self.0.unbounded_send(Ok(StreamEvent::Done));
    }

    pub fn error(&self, message: &str) {
        let _ = self.0.unbounded_send(Err(anyhow!(message.to_string())));
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// Mock chat backend.
#[derive(Clone, Default)]
pub struct MockChatTransport {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    requests: Arc<Mutex<Vec<QueryRequest>>>,
    contexts: Arc<Mutex<Vec<(String, String, ContextAction)>>>,
    cancels: Arc<AtomicUsize>,
    fail_context: Arc<AtomicBool>,
}

impl MockChatTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn contexts(&self) -> Vec<(String, String, ContextAction)> {
        self.contexts.lock().unwrap().clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn fail_context_updates(&self) {
        self.fail_context.store(true, Ordering::SeqCst);
    }

    pub async fn wait_for_requests(&self, count: usize) {
        let requests = self.requests.clone();
        wait_until(move || requests.lock().unwrap().len() >= count).await;
    }

    pub async fn wait_for_contexts(&self, count: usize) {
        let contexts = self.contexts.clone();
        wait_until(move || contexts.lock().unwrap().len() >= count).await;
    }
}

#[async_trait]
impl ChatTransport for MockChatTransport {
    async fn stream_query(&self, request: QueryRequest) -> Result<ChunkStream> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Channel(rx)) => Ok(rx.boxed()),
            Some(Script::Events(events)) => Ok(stream::iter(events).boxed()),
            Some(Script::OpenError(message)) => Err(anyhow!(message)),
            None => Ok(stream::empty().boxed()),
        }
    }

    async fn cancel_active_query(&self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_context(
        &self,
        session_id: &str,
        case_number: &str,
        action: ContextAction,
    ) -> Result<()> {
        self.contexts.lock().unwrap().push((
            session_id.to_string(),
            case_number.to_string(),
            action,
        ));
        if self.fail_context.load(Ordering::SeqCst) {
            return Err(anyhow!("context endpoint unavailable"));
        }
        Ok(())
    }
}

pub fn status(status: ProcessingStatus, progress: f64, message: &str) -> FileStatusEntry {
    FileStatusEntry {
        status,
        progress,
        message: message.to_string(),
        result: None,
    }
}

pub fn processing(progress: f64) -> FileStatusEntry {
    status(ProcessingStatus::Processing, progress, "Procesando")
}

pub fn completed() -> FileStatusEntry {
    FileStatusEntry {
        result: Some(serde_json::json!({ "chunks": 3 })),
        ..status(ProcessingStatus::Completed, 100.0, "Listo")
    }
}

/// Mock ingestion backend.
///
/// Without an explicit submit script a group of `n` files for case `C` gets
/// tracking ids `C#0..C#n-1`. Each tracking id replays its scripted statuses in
/// order and then repeats the last one; unscripted ids report `pending`.
#[derive(Clone, Default)]
pub struct MockIngestionTransport {
    submit_scripts: Arc<Mutex<HashMap<String, std::result::Result<Vec<String>, String>>>>,
    submissions: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    statuses: Arc<Mutex<HashMap<String, VecDeque<FileStatusEntry>>>>,
    status_calls: Arc<Mutex<Vec<Vec<String>>>>,
    fail_status: Arc<AtomicBool>,
    truncate_status: Arc<AtomicBool>,
    cancels: Arc<Mutex<Vec<String>>>,
}

impl MockIngestionTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracking_id(case_number: &str, index: usize) -> String {
        format!("{}#{}", case_number, index)
    }

    pub fn respond_with_ids(&self, case_number: &str, ids: &[&str]) {
        self.submit_scripts.lock().unwrap().insert(
            case_number.to_string(),
            Ok(ids.iter().map(|s| s.to_string()).collect()),
        );
    }

    pub fn fail_submit(&self, case_number: &str, message: &str) {
        self.submit_scripts
            .lock()
            .unwrap()
            .insert(case_number.to_string(), Err(message.to_string()));
    }

    pub fn script_status(&self, tracking_id: &str, entries: Vec<FileStatusEntry>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(tracking_id.to_string(), entries.into());
    }

    pub fn fail_status_queries(&self) {
        self.fail_status.store(true, Ordering::SeqCst);
    }

    pub fn truncate_status_responses(&self) {
        self.truncate_status.store(true, Ordering::SeqCst);
    }

    /// (case number, file names) per submit call.
    pub fn submissions(&self) -> Vec<(String, Vec<String>)> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> Vec<Vec<String>> {
        self.status_calls.lock().unwrap().clone()
    }

    pub fn status_call_count(&self) -> usize {
        self.status_calls.lock().unwrap().len()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }
}

#[async_trait]
impl IngestionTransport for MockIngestionTransport {
    async fn submit_files(
        &self,
        case_number: &str,
        files: Vec<FilePayload>,
    ) -> Result<SubmitResponse> {
        self.submissions.lock().unwrap().push((
            case_number.to_string(),
            files.iter().map(|f| f.name.clone()).collect(),
        ));

        match self.submit_scripts.lock().unwrap().get(case_number) {
            Some(Ok(ids)) => Ok(SubmitResponse {
                tracking_ids: ids.clone(),
            }),
            Some(Err(message)) => Err(anyhow!(message.clone())),
            None => Ok(SubmitResponse {
                tracking_ids: (0..files.len())
                    .map(|i| Self::tracking_id(case_number, i))
                    .collect(),
            }),
        }
    }

    async fn query_file_status(&self, tracking_ids: &[String]) -> Result<Vec<FileStatusEntry>> {
        self.status_calls.lock().unwrap().push(tracking_ids.to_vec());
        if self.fail_status.load(Ordering::SeqCst) {
            return Err(anyhow!("status endpoint unavailable"));
        }

        let mut statuses = self.statuses.lock().unwrap();
        let mut entries: Vec<FileStatusEntry> = tracking_ids
            .iter()
            .map(|id| match statuses.get_mut(id) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
                Some(queue) if !queue.is_empty() => queue[0].clone(),
                _ => status(ProcessingStatus::Pending, 0.0, ""),
            })
            .collect();

        if self.truncate_status.load(Ordering::SeqCst) {
            entries.pop();
        }
        Ok(entries)
    }

    async fn cancel_file_processing(&self, tracking_id: &str) -> Result<()> {
        self.cancels.lock().unwrap().push(tracking_id.to_string());
        Ok(())
    }
}
