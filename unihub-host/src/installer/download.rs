//! Package download with bounded retry

use super::InstallError;
use crate::broker::USER_AGENT;
use crate::config::RetryPolicy;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT as USER_AGENT_HEADER};
use std::error::Error as _;
use thiserror::Error;

/// Why a single download attempt failed
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("could not resolve host: {0}")]
    Dns(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {reason}")]
    Status { status: u16, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Source of plugin archives
#[async_trait]
pub trait PackageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Fetches archives over HTTP(S)
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(crate::broker::default_http_client())
    }
}

#[async_trait]
impl PackageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(USER_AGENT_HEADER, USER_AGENT)
            .header(ACCEPT, "application/zip,application/octet-stream,*/*")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }

        let bytes = response.bytes().await.map_err(classify)?;
        Ok(bytes.to_vec())
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        return FetchError::Timeout;
    }
    if e.is_connect() {
        let mut chain = String::new();
        let mut source = e.source();
        while let Some(cause) = source {
            chain.push_str(&cause.to_string());
            chain.push(' ');
            source = cause.source();
        }
        let chain = chain.to_ascii_lowercase();
        if chain.contains("dns") || chain.contains("lookup") || chain.contains("resolve") {
            return FetchError::Dns(e.to_string());
        }
        return FetchError::Connect(e.to_string());
    }
    FetchError::Other(e.to_string())
}

/// Download `url`, retrying with a linearly growing delay
///
/// `on_attempt` is called with the 1-based attempt number before each try.
pub(crate) async fn download_with_retry(
    fetcher: &dyn PackageFetcher,
    url: &str,
    policy: &RetryPolicy,
    mut on_attempt: impl FnMut(u32),
) -> Result<Vec<u8>, InstallError> {
    let attempts = policy.max_attempts.max(1);
    let mut last_error = FetchError::Other("no attempt was made".to_string());

    for attempt in 1..=attempts {
        on_attempt(attempt);
        tracing::info!(url = %url, attempt, max_attempts = attempts, "Downloading plugin");

        match fetcher.fetch(url).await {
            Ok(bytes) => {
                tracing::info!(url = %url, attempt, size = bytes.len(), "Download complete");
                return Ok(bytes);
            }
            Err(e) => {
                tracing::warn!(url = %url, attempt, error = %e, "Download attempt failed");
                last_error = e;
                if attempt < attempts {
                    let delay = policy.delay_after(attempt);
                    tracing::debug!(delay_ms = delay.as_millis() as u64, "Waiting before retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(InstallError::DownloadFailed {
        attempts,
        message: describe_failure(&last_error, attempts),
    })
}

fn describe_failure(error: &FetchError, attempts: u32) -> String {
    match error {
        FetchError::Timeout => format!(
            "Download timed out after {} attempts. Check your network connection or proxy settings and try again.",
            attempts
        ),
        FetchError::Dns(_) | FetchError::Connect(_) => format!(
            "Cannot connect to the server after {} attempts. Check your network connection or DNS settings.",
            attempts
        ),
        other => format!("Download failed: {} (after {} attempts)", other, attempts),
    }
}
