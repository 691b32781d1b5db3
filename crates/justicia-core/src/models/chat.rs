use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Chat mode: unconstrained, or pinned to one expediente.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatScope {
    #[default]
    General,
    CaseSpecific,
}

impl Display for ChatScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ChatScope::General => write!(f, "general"),
            ChatScope::CaseSpecific => write!(f, "case_specific"),
        }
    }
}

impl FromStr for ChatScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "general" => Ok(ChatScope::General),
            "case_specific" | "expediente" => Ok(ChatScope::CaseSpecific),
            _ => Err(anyhow::anyhow!("Invalid chat scope: {}", s)),
        }
    }
}

/// Whether a context update pins a case for the first time or switches to another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextAction {
    Set,
    Change,
}

impl Display for ContextAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ContextAction::Set => write!(f, "set"),
            ContextAction::Change => write!(f, "change"),
        }
    }
}

/// One entry of the conversation transcript.
///
/// An assistant message without a timestamp is "open": it is still receiving
/// streamed text. At most one message in a transcript is open at a time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub text: String,
    pub is_user: bool,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_retrying: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user: true,
            timestamp: Some(Utc::now()),
            is_error: false,
            is_retrying: false,
        }
    }

    /// A complete assistant message, used for synthetic replies.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            is_user: false,
            timestamp: Some(Utc::now()),
            is_error: false,
            is_retrying: false,
        }
    }

    /// An empty assistant message that streamed chunks are appended to.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::new_v4(),
            text: String::new(),
            is_user: false,
            timestamp: None,
            is_error: false,
            is_retrying: false,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.is_user && self.timestamp.is_none()
    }

    /// Close the message. Text is left untouched.
    pub fn finalize(&mut self) {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
        self.is_retrying = false;
    }

    /// Replace the content with a user-visible error and close the message.
    pub fn fail(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.is_error = true;
        self.finalize();
    }
}
