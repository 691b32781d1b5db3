//! Batched file ingestion: staging, grouped submission and status polling.
//!
//! Staged files are submitted in one request per expediente. Each submitted
//! group gets its own polling task that queries all of the group's tracking
//! identifiers in one batched call per tick, until every file is terminal, the
//! ceiling elapses, a query fails or the controller shuts down.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use justicia_core::validation::validate_upload;
use justicia_core::{
    normalize_case_number, CaseNumber, CaseNumberError, CeilingPolicy, FilePayload, FileStatus,
    FileStatusEntry, IngestionConfig, IngestionError, IngestionTransport, ProcessingStatus,
    UploadFile,
};

use crate::primitives::{run_with_ceiling, sleep_or_cancelled, CeilingOutcome};

const EVENT_CHANNEL_CAPACITY: usize = 256;

const MSG_CASE_MISSING: &str = "Debe indicar el número de expediente";
const MSG_PROCESSED: &str = "Archivo procesado correctamente";
const MSG_PROCESSING_ERROR: &str = "Error en el procesamiento del archivo";
const MSG_CANCELLED: &str = "Procesamiento cancelado";
const MSG_TIMEOUT: &str = "Tiempo de espera agotado para el procesamiento";

/// A file handed to [`IngestionController::stage_file`].
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub name: String,
    pub content: Bytes,
    pub content_type: Option<String>,
    /// Expediente number as typed; may be empty.
    pub case_number: String,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            content_type: None,
            case_number: String::new(),
        }
    }

    pub fn with_case_number(mut self, case_number: impl Into<String>) -> Self {
        self.case_number = case_number.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// How a group's polling loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Every file reached a terminal state.
    Completed,
    /// The polling ceiling elapsed first.
    TimedOut,
    /// A status query failed or returned the wrong number of entries.
    PollFailed(String),
    /// The controller was shut down.
    Stopped,
}

/// A submitted group and its polling task.
#[derive(Debug)]
pub struct GroupHandle {
    pub case_number: String,
    pub file_ids: Vec<Uuid>,
    handle: JoinHandle<GroupOutcome>,
}

impl GroupHandle {
    /// Wait for the group's polling loop to end. For a completed group this
    /// resolves after its files have been purged.
    pub async fn wait(self) -> GroupOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => GroupOutcome::PollFailed(format!("Polling task failed: {}", e)),
        }
    }
}

/// A group whose submission failed; all of its files are in Error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedGroup {
    pub case_number: String,
    pub file_ids: Vec<Uuid>,
    pub error: String,
}

/// Result of one [`IngestionController::upload_files`] call.
#[derive(Debug, Default)]
pub struct UploadReport {
    pub groups: Vec<GroupHandle>,
    pub failed_groups: Vec<FailedGroup>,
    /// Pending files left in place because their case number is missing or invalid.
    pub rejected: Vec<Uuid>,
}

impl UploadReport {
    /// Wait for every submitted group, in submission order.
    pub async fn wait_all(self) -> Vec<(String, GroupOutcome)> {
        let mut outcomes = Vec::with_capacity(self.groups.len());
        for group in self.groups {
            let case_number = group.case_number.clone();
            outcomes.push((case_number, group.wait().await));
        }
        outcomes
    }
}

#[derive(Debug, Clone)]
pub enum IngestionEvent {
    FileStaged(UploadFile),
    FileUpdated {
        id: Uuid,
        status: FileStatus,
        progress: u8,
        message: String,
    },
    FilesRemoved(Vec<Uuid>),
    GroupFinished {
        case_number: String,
        outcome: GroupOutcome,
    },
}

impl IngestionEvent {
    fn updated(file: &UploadFile) -> Self {
        IngestionEvent::FileUpdated {
            id: file.id,
            status: file.status,
            progress: file.progress,
            message: file.message.clone(),
        }
    }
}

/// Shared handles used by the controller and its polling tasks.
#[derive(Clone)]
struct Shared {
    transport: Arc<dyn IngestionTransport>,
    files: Arc<Mutex<Vec<UploadFile>>>,
    events: broadcast::Sender<IngestionEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Vec<UploadFile>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: IngestionEvent) {
        let _ = self.events.send(event);
    }
}

/// Owns the staged files list and the polling tasks of submitted groups.
///
/// Cloning yields a handle to the same controller.
#[derive(Clone)]
pub struct IngestionController {
    shared: Shared,
    config: IngestionConfig,
    shutdown: CancellationToken,
}

impl IngestionController {
    pub fn new(transport: Arc<dyn IngestionTransport>, config: IngestionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Shared {
                transport,
                files: Arc::new(Mutex::new(Vec::new())),
                events,
            },
            config,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestionEvent> {
        self.shared.events.subscribe()
    }

    pub fn files(&self) -> Vec<UploadFile> {
        self.shared.lock().clone()
    }

    pub fn file(&self, id: Uuid) -> Option<UploadFile> {
        self.shared.lock().iter().find(|f| f.id == id).cloned()
    }

    /// Validate a file and append it to the list as Pending.
    pub fn stage_file(&self, staged: StagedFile) -> Result<Uuid, IngestionError> {
        validate_upload(
            &staged.name,
            staged.content.len() as u64,
            &self.config.allowed_extensions,
            self.config.max_file_size_bytes,
        )?;

        let file = UploadFile::new(
            staged.name,
            staged.content,
            staged.content_type,
            normalize_case_number(&staged.case_number),
        );
        let id = file.id;
        tracing::debug!(file_id = %id, name = %file.name, size = file.size, "File staged");

        self.shared.lock().push(file.clone());
        self.shared.emit(IngestionEvent::FileStaged(file));
        Ok(id)
    }

    /// Change the expediente of a Pending file.
    pub fn set_case_number(&self, id: Uuid, case_number: &str) -> Result<(), IngestionError> {
        let mut files = self.shared.lock();
        let file = files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(IngestionError::FileNotFound(id))?;
        if file.status != FileStatus::Pending {
            return Err(IngestionError::InvalidState {
                id,
                status: file.status,
                action: "edited",
            });
        }
        file.case_number = normalize_case_number(case_number);
        file.message.clear();
        self.shared.emit(IngestionEvent::updated(file));
        Ok(())
    }

    /// Submit every Pending file, one request per expediente, and start polling
    /// the groups that were accepted.
    ///
    /// Returns once every eligible file is either Uploading with a tracking
    /// identifier or in Error. After [`shutdown`](Self::shutdown) nothing is
    /// submitted and files stay Pending.
    pub async fn upload_files(&self) -> UploadReport {
        let mut report = UploadReport::default();
        if self.shutdown.is_cancelled() {
            tracing::warn!("Upload requested after shutdown; nothing submitted");
            return report;
        }
        let groups = self.claim_pending(&mut report.rejected);

        if !report.rejected.is_empty() {
            tracing::warn!(
                count = report.rejected.len(),
                "Files left pending without a valid case number"
            );
        }

        for (case_number, entries) in groups {
            let (file_ids, payloads): (Vec<Uuid>, Vec<FilePayload>) = entries.into_iter().unzip();
            match self.submit_group(&case_number, &file_ids, payloads).await {
                Ok(tracked) => {
                    let handle = self.spawn_poller(case_number.clone(), tracked);
                    report.groups.push(GroupHandle {
                        case_number,
                        file_ids,
                        handle,
                    });
                }
                Err(error) => {
                    tracing::error!(case_number = %case_number, error = %error, "Group upload failed");
                    self.fail_files(&file_ids, &error);
                    report.failed_groups.push(FailedGroup {
                        case_number,
                        file_ids,
                        error,
                    });
                }
            }
        }

        report
    }

    /// Move Pending files with a valid case number to Uploading, grouped by case.
    /// Runs under one lock so a concurrent call cannot claim the same files.
    fn claim_pending(&self, rejected: &mut Vec<Uuid>) -> BTreeMap<String, Vec<(Uuid, FilePayload)>> {
        let mut groups: BTreeMap<String, Vec<(Uuid, FilePayload)>> = BTreeMap::new();
        let mut files = self.shared.lock();

        for file in files.iter_mut().filter(|f| f.status == FileStatus::Pending) {
            match CaseNumber::parse(&file.case_number) {
                Ok(case_number) => {
                    file.status = FileStatus::Uploading;
                    file.progress = 0;
                    file.message.clear();
                    groups.entry(case_number.to_string()).or_default().push((
                        file.id,
                        FilePayload {
                            name: file.name.clone(),
                            content_type: file.content_type.clone(),
                            content: file.content.clone(),
                        },
                    ));
                }
                Err(e) => {
                    file.message = match e {
                        CaseNumberError::Missing => MSG_CASE_MISSING.to_string(),
                        CaseNumberError::InvalidFormat(_) => format!(
                            "Formato de expediente inválido: {} (ejemplo: 98-003287-0166-LA)",
                            file.case_number
                        ),
                    };
                    rejected.push(file.id);
                }
            }
            self.shared.emit(IngestionEvent::updated(file));
        }

        groups
    }

    /// Submit one group. On success every file has its tracking identifier and
    /// the (file id, tracking id) pairs are returned for polling.
    #[tracing::instrument(skip(self, file_ids, payloads), fields(files = file_ids.len()))]
    async fn submit_group(
        &self,
        case_number: &str,
        file_ids: &[Uuid],
        payloads: Vec<FilePayload>,
    ) -> Result<Vec<(Uuid, String)>, String> {
        let response = self
            .shared
            .transport
            .submit_files(case_number, payloads)
            .await
            .map_err(|e| format!("Error al subir archivos: {:#}", e))?;

        let tracking_ids = response.tracking_ids;
        if tracking_ids.len() != file_ids.len() {
            return Err(format!(
                "Se esperaban {} identificadores de seguimiento y se recibieron {}",
                file_ids.len(),
                tracking_ids.len()
            ));
        }
        if tracking_ids.iter().any(|t| t.trim().is_empty()) {
            return Err("El servidor devolvió un identificador de seguimiento vacío".to_string());
        }

        let tracked: Vec<(Uuid, String)> = file_ids.iter().copied().zip(tracking_ids).collect();
        let mut files = self.shared.lock();
        for (id, tracking_id) in &tracked {
            if let Some(file) = files.iter_mut().find(|f| f.id == *id) {
                file.tracking_id = Some(tracking_id.clone());
            }
        }
        tracing::info!(case_number = %case_number, files = tracked.len(), "Group submitted");
        Ok(tracked)
    }

    fn fail_files(&self, ids: &[Uuid], message: &str) {
        let mut files = self.shared.lock();
        for file in files.iter_mut().filter(|f| ids.contains(&f.id)) {
            file.status = FileStatus::Error;
            file.message = message.to_string();
            self.shared.emit(IngestionEvent::updated(file));
        }
    }

    fn spawn_poller(&self, case_number: String, tracked: Vec<(Uuid, String)>) -> JoinHandle<GroupOutcome> {
        let poller = GroupPoller {
            shared: self.shared.clone(),
            poll_interval: self.config.poll_interval,
            poll_ceiling: self.config.poll_ceiling,
            purge_delay: self.config.purge_delay,
            ceiling_policy: self.config.ceiling_policy,
            case_number,
            tracked,
            token: self.shutdown.child_token(),
        };
        tokio::spawn(poller.run())
    }

    /// Remove a file that is Pending or terminal.
    pub fn remove_file(&self, id: Uuid) -> Result<(), IngestionError> {
        let mut files = self.shared.lock();
        let pos = files
            .iter()
            .position(|f| f.id == id)
            .ok_or(IngestionError::FileNotFound(id))?;
        if !files[pos].is_removable() {
            return Err(IngestionError::InvalidState {
                id,
                status: files[pos].status,
                action: "removed",
            });
        }
        files.remove(pos);
        self.shared.emit(IngestionEvent::FilesRemoved(vec![id]));
        Ok(())
    }

    /// Ask the backend to cancel processing of an Uploading file. The file's
    /// state changes only when polling observes the cancellation.
    pub async fn cancel_file_processing(&self, id: Uuid) -> Result<(), IngestionError> {
        let tracking_id = {
            let files = self.shared.lock();
            let file = files
                .iter()
                .find(|f| f.id == id)
                .ok_or(IngestionError::FileNotFound(id))?;
            if file.status != FileStatus::Uploading {
                return Err(IngestionError::InvalidState {
                    id,
                    status: file.status,
                    action: "cancelled",
                });
            }
            file.tracking_id
                .clone()
                .ok_or(IngestionError::MissingTrackingId(id))?
        };

        tracing::info!(file_id = %id, tracking_id = %tracking_id, "Cancelling file processing");
        self.shared
            .transport
            .cancel_file_processing(&tracking_id)
            .await
            .map_err(IngestionError::Transport)
    }

    /// Stop every polling task. Files keep their last observed state.
    pub fn shutdown(&self) {
        tracing::info!("Stopping ingestion polling");
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Polling task of one submitted group.
struct GroupPoller {
    shared: Shared,
    poll_interval: Duration,
    poll_ceiling: Duration,
    purge_delay: Duration,
    ceiling_policy: CeilingPolicy,
    case_number: String,
    tracked: Vec<(Uuid, String)>,
    token: CancellationToken,
}

impl GroupPoller {
    #[tracing::instrument(skip(self), fields(case_number = %self.case_number, files = self.tracked.len()))]
    async fn run(self) -> GroupOutcome {
        let outcome = match run_with_ceiling(self.poll_ceiling, &self.token, self.poll_until_terminal())
            .await
        {
            CeilingOutcome::Finished(Ok(())) => GroupOutcome::Completed,
            CeilingOutcome::Finished(Err(reason)) => {
                tracing::error!(error = %reason, "Status polling stopped");
                GroupOutcome::PollFailed(reason)
            }
            CeilingOutcome::Elapsed => {
                tracing::warn!(policy = ?self.ceiling_policy, "Polling ceiling reached");
                if self.ceiling_policy == CeilingPolicy::MarkError {
                    self.mark_timed_out();
                }
                GroupOutcome::TimedOut
            }
            CeilingOutcome::Cancelled => GroupOutcome::Stopped,
        };

        tracing::info!(outcome = ?outcome, "Group polling finished");
        self.shared.emit(IngestionEvent::GroupFinished {
            case_number: self.case_number.clone(),
            outcome: outcome.clone(),
        });

        if outcome == GroupOutcome::Completed && sleep_or_cancelled(&self.token, self.purge_delay).await
        {
            self.purge();
        }
        outcome
    }

    async fn poll_until_terminal(&self) -> Result<(), String> {
        let tracking_ids: Vec<String> = self.tracked.iter().map(|(_, t)| t.clone()).collect();
        let mut ticker = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let entries = self
                .shared
                .transport
                .query_file_status(&tracking_ids)
                .await
                .map_err(|e| format!("Status query failed: {:#}", e))?;

            if entries.len() != tracking_ids.len() {
                return Err(format!(
                    "Status response has {} entries for {} tracking ids",
                    entries.len(),
                    tracking_ids.len()
                ));
            }

            if self.apply_statuses(&entries) {
                return Ok(());
            }
        }
    }

    /// Merge one batched response by file id. Returns true when every file of
    /// the group is terminal (or gone).
    fn apply_statuses(&self, entries: &[FileStatusEntry]) -> bool {
        let mut files = self.shared.lock();
        let mut all_terminal = true;

        for ((id, _), entry) in self.tracked.iter().zip(entries) {
            let Some(file) = files.iter_mut().find(|f| f.id == *id) else {
                continue;
            };
            if file.status.is_terminal() {
                continue;
            }

            match entry.status {
                ProcessingStatus::Completed => {
                    file.status = FileStatus::Success;
                    file.progress = 100;
                    file.message = message_or(&entry.message, MSG_PROCESSED);
                    file.result = entry.result.clone();
                }
                ProcessingStatus::Error => {
                    file.status = FileStatus::Error;
                    file.message = message_or(&entry.message, MSG_PROCESSING_ERROR);
                }
                ProcessingStatus::Cancelled => {
                    file.status = FileStatus::Cancelled;
                    file.message = message_or(&entry.message, MSG_CANCELLED);
                }
                ProcessingStatus::Pending | ProcessingStatus::Processing | ProcessingStatus::Unknown => {
                    file.progress = entry.progress_percent();
                    if !entry.message.is_empty() {
                        file.message = entry.message.clone();
                    }
                    all_terminal = false;
                }
            }
            self.shared.emit(IngestionEvent::updated(file));
        }

        all_terminal
    }

    fn mark_timed_out(&self) {
        let mut files = self.shared.lock();
        for file in files.iter_mut() {
            if self.tracked.iter().any(|(id, _)| *id == file.id) && !file.status.is_terminal() {
                file.status = FileStatus::Error;
                file.message = MSG_TIMEOUT.to_string();
                self.shared.emit(IngestionEvent::updated(file));
            }
        }
    }

    fn purge(&self) {
        let mut files = self.shared.lock();
        let mut removed = Vec::new();
        files.retain(|f| {
            let in_group = self.tracked.iter().any(|(id, _)| *id == f.id);
            if in_group && f.status.is_terminal() {
                removed.push(f.id);
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "Purged completed files");
            self.shared.emit(IngestionEvent::FilesRemoved(removed));
        }
    }
}

fn message_or(message: &str, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_file_builder() {
        let staged = StagedFile::new("acta.pdf", Bytes::from_static(b"%PDF"))
            .with_case_number("98-003287-0166-la")
            .with_content_type("application/pdf");
        assert_eq!(staged.name, "acta.pdf");
        assert_eq!(staged.case_number, "98-003287-0166-la");
        assert_eq!(staged.content_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn message_fallback() {
        assert_eq!(message_or("  ", "x"), "x");
        assert_eq!(message_or("listo", "x"), "listo");
    }
}
