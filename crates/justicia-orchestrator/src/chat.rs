//! Streaming chat controller.
//!
//! Exactly one request is active at a time. Starting a new one (or stopping)
//! removes the active request from its slot and fires its cancellation token;
//! chunks are applied to the transcript only while their generation is still
//! the active one, so a superseded stream can never write into it.

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use justicia_core::{
    CaseNumber, ChatConfig, ChatMessage, ChatScope, ChatTransport, ContextAction, QueryRequest,
    SessionContext, StreamEvent,
};

use crate::primitives::{sleep_or_cancelled, Generation, GenerationCounter};

const EVENT_CHANNEL_CAPACITY: usize = 256;

pub const ERROR_MESSAGE: &str =
    "Lo siento, ocurrió un error al procesar su consulta. Por favor, intente nuevamente.";

pub const CASE_GUIDANCE_MESSAGE: &str = "Para consultar un expediente específico, primero indique \
     el número de expediente (por ejemplo: 98-003287-0166-LA).";

fn set_case_prompt(case_number: &CaseNumber) -> String {
    format!("Establecer expediente: {}", case_number)
}

fn case_confirmation(case_number: &CaseNumber, action: ContextAction) -> String {
    match action {
        ContextAction::Set => format!(
            "Expediente {} establecido. ¿Qué desea consultar sobre este expediente?",
            case_number
        ),
        ContextAction::Change => format!(
            "Cambiado al expediente {}. ¿Qué desea consultar sobre este expediente?",
            case_number
        ),
    }
}

/// How a call to [`ChatController::send_message`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The answer was streamed and finalized (possibly empty after the retry).
    Completed { retried: bool },
    /// The transport failed; the placeholder now holds an error message.
    Failed { error: String },
    /// Stopped by [`ChatController::stop_generation`].
    Cancelled,
    /// A newer request took the slot.
    Superseded,
    /// A new expediente was pinned; no query was sent.
    ContextChanged {
        case_number: CaseNumber,
        action: ContextAction,
    },
    /// Case-specific mode without an expediente; guidance was shown instead.
    GuidanceShown,
    /// Blank input in case-specific mode.
    Ignored,
}

/// Transcript changes, for incremental rendering.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageAppended(ChatMessage),
    ChunkApplied { message_id: Uuid, chunk: String },
    Retrying { message_id: Uuid },
    Finalized { message_id: Uuid },
    Failed { message_id: Uuid, error: String },
    Cancelled { message_id: Uuid },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Stopped,
    Superseded,
}

/// Cancellation handle of one request, remembering why it was interrupted.
#[derive(Clone, Default)]
struct RequestHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<Interrupt>>,
}

impl RequestHandle {
    fn interrupt(&self, reason: Interrupt) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    fn outcome(&self) -> TurnOutcome {
        match self.reason.get() {
            Some(Interrupt::Stopped) => TurnOutcome::Cancelled,
            _ => TurnOutcome::Superseded,
        }
    }
}

struct ActiveRequest {
    generation: Generation,
    message_id: Uuid,
    handle: RequestHandle,
}

struct ChatState {
    session: SessionContext,
    scope: ChatScope,
    tracked_case: Option<CaseNumber>,
    transcript: Vec<ChatMessage>,
    generations: GenerationCounter,
    active: Option<ActiveRequest>,
    is_typing: bool,
}

impl ChatState {
    fn is_current(&self, generation: Generation) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.generation == generation)
    }

    fn message_mut(&mut self, id: Uuid) -> Option<&mut ChatMessage> {
        self.transcript.iter_mut().rev().find(|m| m.id == id)
    }
}

/// What to do with an incoming message.
enum Route {
    Handled(TurnOutcome),
    Query { case_number: Option<String> },
}

/// Owns the conversation transcript and the single active streamed request.
///
/// Cloning is cheap and yields a handle to the same controller, so callers can
/// run `send_message` on a spawned task and call `stop_generation` from another.
#[derive(Clone)]
pub struct ChatController {
    transport: Arc<dyn ChatTransport>,
    config: ChatConfig,
    state: Arc<Mutex<ChatState>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        config: ChatConfig,
        session: SessionContext,
        scope: ChatScope,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            config,
            state: Arc::new(Mutex::new(ChatState {
                session,
                scope,
                tracked_case: None,
                transcript: Vec::new(),
                generations: GenerationCounter::new(),
                active: None,
                is_typing: false,
            })),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn append(&self, state: &mut ChatState, message: ChatMessage) {
        state.transcript.push(message.clone());
        self.emit(ChatEvent::MessageAppended(message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn transcript(&self) -> Vec<ChatMessage> {
        self.lock().transcript.clone()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active.is_some()
    }

    pub fn is_typing(&self) -> bool {
        self.lock().is_typing
    }

    pub fn scope(&self) -> ChatScope {
        self.lock().scope
    }

    pub fn tracked_case(&self) -> Option<CaseNumber> {
        self.lock().tracked_case.clone()
    }

    pub fn session(&self) -> SessionContext {
        self.lock().session.clone()
    }

    /// Switch chat mode. Changing the scope forgets the tracked expediente.
    pub fn set_scope(&self, scope: ChatScope) {
        let mut state = self.lock();
        if state.scope != scope {
            tracing::debug!(from = %state.scope, to = %scope, "Chat scope changed");
            state.scope = scope;
            state.tracked_case = None;
        }
    }

    /// Stop any generation, clear the transcript and start a new backend session.
    pub async fn new_session(&self) -> SessionContext {
        self.stop_generation().await;
        let mut state = self.lock();
        state.transcript.clear();
        state.tracked_case = None;
        let previous = state.session.replace();
        tracing::info!(
            previous_session = %previous.session_id,
            session_id = %state.session.session_id,
            "Started new chat session"
        );
        state.session.clone()
    }

    /// Submit a user message and drive its turn to an end.
    pub async fn send_message(&self, text: &str) -> TurnOutcome {
        let case_number = match self.route(text) {
            Route::Handled(outcome) => return outcome,
            Route::Query { case_number } => case_number,
        };

        // The turn is ordered by when it was submitted, not by when the grace
        // period of an earlier supersede ends.
        let generation = self.lock().generations.advance();

        self.supersede_active().await;

        let (handle, message_id, session_id) = {
            let mut state = self.lock();
            if !state.generations.is_latest(generation) {
                tracing::debug!(generation = %generation, "Chat request superseded before it started");
                return TurnOutcome::Superseded;
            }
            if let Some(previous) = state.active.take() {
                self.close_interrupted(&mut state, &previous, Interrupt::Superseded);
            }

            let handle = RequestHandle::default();
            self.append(&mut state, ChatMessage::user(text));
            let placeholder = ChatMessage::placeholder();
            let message_id = placeholder.id;
            self.append(&mut state, placeholder);

            state.active = Some(ActiveRequest {
                generation,
                message_id,
                handle: handle.clone(),
            });
            state.is_typing = true;
            (handle, message_id, state.session.session_id.clone())
        };

        tracing::debug!(
            generation = %generation,
            case_number = ?case_number,
            "Chat request started"
        );

        self.run_turn(
            text,
            case_number,
            session_id,
            generation,
            &handle,
            message_id,
        )
        .await
    }

    /// Stop the active request, if any. Safe to call at any time.
    pub async fn stop_generation(&self) {
        let stopped = {
            let mut state = self.lock();
            state.is_typing = false;
            match state.active.take() {
                Some(active) => {
                    self.close_interrupted(&mut state, &active, Interrupt::Stopped);
                    tracing::debug!(generation = %active.generation, "Chat generation stopped");
                    true
                }
                None => false,
            }
        };

        if stopped {
            if let Err(e) = self.transport.cancel_active_query().await {
                tracing::warn!(error = %e, "Failed to abort active query");
            }
        }
    }

    /// Case-specific interception; everything else is a query.
    fn route(&self, text: &str) -> Route {
        let mut state = self.lock();
        if state.scope != ChatScope::CaseSpecific {
            return Route::Query { case_number: None };
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Route::Handled(TurnOutcome::Ignored);
        }

        if let Ok(case_number) = CaseNumber::parse(trimmed) {
            if state.tracked_case.as_ref() != Some(&case_number) {
                let action = if state.tracked_case.is_some() {
                    ContextAction::Change
                } else {
                    ContextAction::Set
                };
                state.tracked_case = Some(case_number.clone());
                self.append(&mut state, ChatMessage::user(set_case_prompt(&case_number)));
                self.append(
                    &mut state,
                    ChatMessage::assistant(case_confirmation(&case_number, action)),
                );
                let session_id = state.session.session_id.clone();
                drop(state);

                tracing::info!(case_number = %case_number, action = %action, "Chat expediente set");
                self.spawn_context_update(session_id, case_number.clone(), action);
                return Route::Handled(TurnOutcome::ContextChanged {
                    case_number,
                    action,
                });
            }
        }

        match state.tracked_case.clone() {
            Some(case_number) => Route::Query {
                case_number: Some(case_number.to_string()),
            },
            None => {
                self.append(&mut state, ChatMessage::user(trimmed));
                self.append(&mut state, ChatMessage::assistant(CASE_GUIDANCE_MESSAGE));
                Route::Handled(TurnOutcome::GuidanceShown)
            }
        }
    }

    fn spawn_context_update(&self, session_id: String, case_number: CaseNumber, action: ContextAction) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport
                .update_context(&session_id, case_number.as_str(), action)
                .await
            {
                tracing::warn!(
                    error = %e,
                    case_number = %case_number,
                    "Failed to notify backend of context change"
                );
            }
        });
    }

    /// Take the active request out of its slot and wait out the grace period.
    async fn supersede_active(&self) {
        let superseded = {
            let mut state = self.lock();
            match state.active.take() {
                Some(active) => {
                    self.close_interrupted(&mut state, &active, Interrupt::Superseded);
                    tracing::debug!(generation = %active.generation, "Superseding active chat request");
                    true
                }
                None => false,
            }
        };

        if superseded {
            if let Err(e) = self.transport.cancel_active_query().await {
                tracing::warn!(error = %e, "Failed to abort superseded query");
            }
            tokio::time::sleep(self.config.grace_period).await;
        }
    }

    /// Fire the request's token and close its placeholder with whatever text it
    /// has accumulated.
    fn close_interrupted(&self, state: &mut ChatState, active: &ActiveRequest, reason: Interrupt) {
        active.handle.interrupt(reason);
        if let Some(message) = state.message_mut(active.message_id) {
            message.finalize();
        }
        self.emit(ChatEvent::Cancelled {
            message_id: active.message_id,
        });
    }

    async fn run_turn(
        &self,
        text: &str,
        case_number: Option<String>,
        session_id: String,
        generation: Generation,
        handle: &RequestHandle,
        message_id: Uuid,
    ) -> TurnOutcome {
        let mut retried = false;

        loop {
            let request = QueryRequest {
                query: text.to_string(),
                session_id: session_id.clone(),
                case_number: case_number.clone(),
                top_k: self.config.top_k,
                request_id: if retried {
                    format!("{}-retry", generation)
                } else {
                    generation.to_string()
                },
            };

            let opened = tokio::select! {
                biased;
                _ = handle.token.cancelled() => return handle.outcome(),
                result = self.transport.stream_query(request) => result,
            };
            let mut stream = match opened {
                Ok(stream) => stream,
                Err(e) => return self.fail_turn(generation, message_id, handle, e),
            };

            let mut accumulated = String::new();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = handle.token.cancelled() => return handle.outcome(),
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(StreamEvent::Chunk(chunk))) => {
                        if !self.apply_chunk(generation, message_id, &chunk) {
                            return handle.outcome();
                        }
                        accumulated.push_str(&chunk);
                    }
                    Some(Ok(StreamEvent::Done)) | None => break,
                    Some(Err(e)) => return self.fail_turn(generation, message_id, handle, e),
                }
            }

            if accumulated.trim().is_empty() && !retried {
                tracing::warn!(generation = %generation, "Empty answer from backend, retrying once");
                if !self.mark_retrying(generation, message_id) {
                    return handle.outcome();
                }
                if !sleep_or_cancelled(&handle.token, self.config.retry_delay).await {
                    return handle.outcome();
                }
                if !self.clear_placeholder(generation, message_id) {
                    return handle.outcome();
                }
                retried = true;
                continue;
            }

            return self.complete_turn(generation, message_id, handle, retried);
        }
    }

    fn apply_chunk(&self, generation: Generation, message_id: Uuid, chunk: &str) -> bool {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return false;
        }
        if let Some(message) = state.message_mut(message_id) {
            message.text.push_str(chunk);
        }
        self.emit(ChatEvent::ChunkApplied {
            message_id,
            chunk: chunk.to_string(),
        });
        true
    }

    fn mark_retrying(&self, generation: Generation, message_id: Uuid) -> bool {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return false;
        }
        if let Some(message) = state.message_mut(message_id) {
            message.is_retrying = true;
        }
        self.emit(ChatEvent::Retrying { message_id });
        true
    }

    fn clear_placeholder(&self, generation: Generation, message_id: Uuid) -> bool {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return false;
        }
        if let Some(message) = state.message_mut(message_id) {
            message.text.clear();
        }
        true
    }

    fn complete_turn(
        &self,
        generation: Generation,
        message_id: Uuid,
        handle: &RequestHandle,
        retried: bool,
    ) -> TurnOutcome {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return handle.outcome();
        }
        if let Some(message) = state.message_mut(message_id) {
            message.finalize();
        }
        state.active = None;
        state.is_typing = false;
        self.emit(ChatEvent::Finalized { message_id });
        tracing::debug!(generation = %generation, retried, "Chat turn completed");
        TurnOutcome::Completed { retried }
    }

    fn fail_turn(
        &self,
        generation: Generation,
        message_id: Uuid,
        handle: &RequestHandle,
        error: anyhow::Error,
    ) -> TurnOutcome {
        let mut state = self.lock();
        if !state.is_current(generation) {
            return handle.outcome();
        }
        if let Some(message) = state.message_mut(message_id) {
            message.fail(ERROR_MESSAGE);
        }
        state.active = None;
        state.is_typing = false;
        let error = format!("{:#}", error);
        tracing::error!(generation = %generation, error = %error, "Chat request failed");
        self.emit(ChatEvent::Failed {
            message_id,
            error: error.clone(),
        });
        TurnOutcome::Failed { error }
    }
}
