//! Configuration module
//!
//! Client configuration loaded from the environment (and `.env`), plus the
//! per-controller settings derived from it.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

use crate::constants::*;

/// What happens to files still in flight when a group's polling ceiling expires.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum CeilingPolicy {
    /// Stop polling and leave files in their last observed state.
    #[default]
    Keep,
    /// Stop polling and mark the remaining files as failed.
    MarkError,
}

impl Display for CeilingPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            CeilingPolicy::Keep => write!(f, "keep"),
            CeilingPolicy::MarkError => write!(f, "mark_error"),
        }
    }
}

impl FromStr for CeilingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep" => Ok(CeilingPolicy::Keep),
            "mark_error" | "error" => Ok(CeilingPolicy::MarkError),
            _ => Err(anyhow::anyhow!("Invalid ceiling policy: {}", s)),
        }
    }
}

/// Settings of the streaming chat controller.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub grace_period: Duration,
    pub retry_delay: Duration,
    pub top_k: Option<u32>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(CHAT_GRACE_PERIOD_MS),
            retry_delay: Duration::from_millis(CHAT_RETRY_DELAY_MS),
            top_k: Some(CHAT_TOP_K),
        }
    }
}

/// Settings of the ingestion upload controller.
#[derive(Clone, Debug)]
pub struct IngestionConfig {
    pub poll_interval: Duration,
    pub poll_ceiling: Duration,
    pub purge_delay: Duration,
    pub ceiling_policy: CeilingPolicy,
    pub max_file_size_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(INGEST_POLL_INTERVAL_MS),
            poll_ceiling: Duration::from_secs(INGEST_POLL_CEILING_SECS),
            purge_delay: Duration::from_millis(INGEST_PURGE_DELAY_MS),
            ceiling_policy: CeilingPolicy::default(),
            max_file_size_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            allowed_extensions: split_list(DEFAULT_ALLOWED_EXTENSIONS),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct JusticiaConfig {
    pub api_url: String,
    pub api_prefix: String,
    /// Sent as `X-API-Key` when set.
    pub api_key: Option<String>,
    /// Sent as `Authorization: Bearer` when set; takes precedence over `api_key`.
    pub jwt_token: Option<String>,
    pub http_timeout_secs: u64,
    pub chat: ChatConfig,
    pub ingestion: IngestionConfig,
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl JusticiaConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let api_url = env::var("JUSTICIA_API_URL")
            .or_else(|_| env::var("API_URL"))
            .unwrap_or_else(|_| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let api_prefix =
            env::var("JUSTICIA_API_PREFIX").unwrap_or_else(|_| DEFAULT_API_PREFIX.to_string());

        let top_k = match env::var("CHAT_TOP_K") {
            Ok(v) if v.trim() == "0" => None,
            Ok(v) => Some(v.trim().parse::<u32>().unwrap_or(CHAT_TOP_K)),
            Err(_) => Some(CHAT_TOP_K),
        };

        let ceiling_policy = match env::var("INGEST_CEILING_POLICY") {
            Ok(v) => v.parse::<CeilingPolicy>()?,
            Err(_) => CeilingPolicy::default(),
        };

        let allowed_extensions = split_list(
            &env::var("ALLOWED_EXTENSIONS")
                .unwrap_or_else(|_| DEFAULT_ALLOWED_EXTENSIONS.to_string()),
        );

        let max_upload_size_mb = env_or("MAX_UPLOAD_SIZE_MB", MAX_UPLOAD_SIZE_MB);

        let config = Self {
            api_url,
            api_prefix,
            api_key: env_opt("JUSTICIA_API_KEY"),
            jwt_token: env_opt("JUSTICIA_JWT_TOKEN"),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", HTTP_TIMEOUT_SECS),
            chat: ChatConfig {
                grace_period: Duration::from_millis(env_or(
                    "CHAT_GRACE_PERIOD_MS",
                    CHAT_GRACE_PERIOD_MS,
                )),
                retry_delay: Duration::from_millis(env_or(
                    "CHAT_RETRY_DELAY_MS",
                    CHAT_RETRY_DELAY_MS,
                )),
                top_k,
            },
            ingestion: IngestionConfig {
                poll_interval: Duration::from_millis(env_or(
                    "INGEST_POLL_INTERVAL_MS",
                    INGEST_POLL_INTERVAL_MS,
                )),
                poll_ceiling: Duration::from_secs(env_or(
                    "INGEST_POLL_CEILING_SECS",
                    INGEST_POLL_CEILING_SECS,
                )),
                purge_delay: Duration::from_millis(env_or(
                    "INGEST_PURGE_DELAY_MS",
                    INGEST_PURGE_DELAY_MS,
                )),
                ceiling_policy,
                max_file_size_bytes: max_upload_size_mb * 1024 * 1024,
                allowed_extensions,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(anyhow::anyhow!(
                "JUSTICIA_API_URL must start with http:// or https:// (got '{}')",
                self.api_url
            ));
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            return Err(anyhow::anyhow!(
                "JUSTICIA_API_PREFIX must start with '/' (got '{}')",
                self.api_prefix
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(anyhow::anyhow!("HTTP_TIMEOUT_SECS must be greater than 0"));
        }
        if self.ingestion.poll_interval.is_zero() {
            return Err(anyhow::anyhow!(
                "INGEST_POLL_INTERVAL_MS must be greater than 0"
            ));
        }
        if self.ingestion.poll_ceiling < self.ingestion.poll_interval {
            return Err(anyhow::anyhow!(
                "INGEST_POLL_CEILING_SECS must be at least one poll interval"
            ));
        }
        if self.ingestion.allowed_extensions.is_empty() {
            return Err(anyhow::anyhow!("ALLOWED_EXTENSIONS must not be empty"));
        }
        Ok(())
    }
}

impl Default for JusticiaConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            api_key: None,
            jwt_token: None,
            http_timeout_secs: HTTP_TIMEOUT_SECS,
            chat: ChatConfig::default(),
            ingestion: IngestionConfig::default(),
        }
    }
}
