use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one chat session as seen by the RAG backend.
///
/// Created once, passed to the chat controller, and replaced explicitly when the
/// user starts a new conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new() -> Self {
        let created_at = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            session_id: format!("session_{}_{}", created_at.timestamp_millis(), &suffix[..12]),
            created_at,
        }
    }

    /// Wrap an identifier issued elsewhere (e.g. restored from the backend).
    pub fn with_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Replace this session with a fresh one, returning the previous identity.
    pub fn replace(&mut self) -> SessionContext {
        std::mem::replace(self, SessionContext::new())
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
