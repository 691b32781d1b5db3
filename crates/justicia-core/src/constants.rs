//! Timing and limit defaults shared by the controllers and the configuration loader.

/// Wait after aborting a superseded chat request before the next one starts writing.
pub const CHAT_GRACE_PERIOD_MS: u64 = 100;

/// Delay before the single retry of a chat turn that produced an empty answer.
pub const CHAT_RETRY_DELAY_MS: u64 = 1500;

/// Number of retrieved passages requested per chat query.
pub const CHAT_TOP_K: u32 = 15;

/// Interval between batched status queries of one upload group.
pub const INGEST_POLL_INTERVAL_MS: u64 = 2000;

/// Hard ceiling on the polling of one upload group.
pub const INGEST_POLL_CEILING_SECS: u64 = 300;

/// How long finished files stay visible before they are purged from the list.
pub const INGEST_PURGE_DELAY_MS: u64 = 3000;

pub const MAX_UPLOAD_SIZE_MB: u64 = 100;

pub const HTTP_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

pub const DEFAULT_API_PREFIX: &str = "/api/v1";

/// File extensions accepted for ingestion (documents and hearing recordings).
pub const DEFAULT_ALLOWED_EXTENSIONS: &str = "pdf,doc,docx,rtf,txt,html,mp3,wav,m4a,ogg";
