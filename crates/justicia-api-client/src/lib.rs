//! Shared HTTP client for the JusticIA backend.
//!
//! Provides a minimal client with configurable auth (Bearer token or X-API-Key),
//! JSON/multipart POST helpers, and implementations of the chat and ingestion
//! transport contracts from `justicia_core::transport`.

pub mod api;
pub mod sse;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use justicia_core::JusticiaConfig;

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Authentication strategy for the API.
#[derive(Clone, Debug)]
pub enum Auth {
    /// `Authorization: Bearer {token}`
    Bearer(String),
    /// `X-API-Key: {key}`
    XApiKey(String),
}

/// HTTP client for the JusticIA API with configurable auth.
#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    prefix: String,
    auth: Option<Auth>,
    request_timeout: Duration,
    /// Cancellation handle of the most recent streamed query.
    active_query: Arc<Mutex<Option<CancellationToken>>>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        prefix: impl Into<String>,
        auth: Option<Auth>,
        request_timeout: Duration,
    ) -> Result<Self> {
        // No whole-request timeout on the client: streamed answers can run for minutes.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url: String = base_url.into();
        let prefix: String = prefix.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            prefix: prefix.trim_end_matches('/').to_string(),
            auth,
            request_timeout,
            active_query: Arc::new(Mutex::new(None)),
        })
    }

    /// Build a client from loaded configuration. A JWT wins over an API key.
    pub fn from_config(config: &JusticiaConfig) -> Result<Self> {
        let auth = config
            .jwt_token
            .clone()
            .map(Auth::Bearer)
            .or_else(|| config.api_key.clone().map(Auth::XApiKey));

        Self::new(
            config.api_url.clone(),
            config.api_prefix.clone(),
            auth,
            Duration::from_secs(config.http_timeout_secs),
        )
    }

    /// Load configuration from the environment and build a client from it.
    pub fn from_env() -> Result<Self> {
        let config = JusticiaConfig::from_env().context("Failed to load configuration")?;
        Self::from_config(&config)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for an API path relative to the configured prefix.
    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.prefix, path)
    }

    fn apply_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(Auth::Bearer(token)) => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            Some(Auth::XApiKey(key)) => request.header("X-API-Key", key.as_str()),
            None => request,
        }
    }

    /// Turn a non-2xx response into an error carrying the status and body.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(anyhow::anyhow!(
            "API request failed with status {}: {}",
            status,
            error_text
        ))
    }

    /// POST JSON body and deserialize response.
    pub async fn post_json<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.build_url(path);
        let request = self
            .client
            .post(&url)
            .json(body)
            .timeout(self.request_timeout);
        let request = self.apply_auth(request);

        let response = request.send().await.context("Failed to send request")?;
        let response = Self::ensure_success(response).await?;

        response
            .json()
            .await
            .context("Failed to parse response as JSON")
    }

    /// POST JSON body, ignoring whatever the server answers on success.
    pub async fn post_json_ack<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.build_url(path);
        let request = self
            .client
            .post(&url)
            .json(body)
            .timeout(self.request_timeout);
        let request = self.apply_auth(request);

        let response = request.send().await.context("Failed to send request")?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// POST multipart form and deserialize response.
    pub async fn post_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        form: reqwest::multipart::Form,
    ) -> Result<T> {
        let url = self.build_url(path);
        let request = self
            .client
            .post(&url)
            .multipart(form)
            .timeout(self.request_timeout);
        let request = self.apply_auth(request);

        let response = request.send().await.context("Failed to send request")?;
        let response = Self::ensure_success(response).await?;

        response
            .json()
            .await
            .context("Failed to parse response as JSON")
    }

    /// POST JSON body and return the raw response for streaming consumption.
    async fn post_stream<B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        let url = self.build_url(path);
        let request = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(body);
        let request = self.apply_auth(request);

        let response = request.send().await.context("Failed to send request")?;
        Self::ensure_success(response).await
    }

    /// Register a new streamed query, aborting the previous one if still running.
    fn begin_query(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .active_query
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        token
    }

    /// Abort the most recent streamed query. Returns whether there was one.
    pub fn abort_active_query(&self) -> bool {
        let token = self
            .active_query
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}
