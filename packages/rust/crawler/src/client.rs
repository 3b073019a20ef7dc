//! HTTP client for the vehicle catalog service.
//!
//! One call issues one GET and classifies the answer: `200` is parsed as JSON,
//! `404` is a valid absence (`Ok(None)`), anything else is fatal.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use catalogsync_shared::{CatalogConfig, CatalogSyncError, Result};

/// User-Agent string for catalog requests.
const USER_AGENT: &str = concat!("catalogsync/", env!("CARGO_PKG_VERSION"));

/// Error bodies are truncated to this many characters.
const MAX_ERROR_BODY: usize = 512;

/// Anything that can resolve a catalog path to a JSON payload.
///
/// `Ok(None)` means the resource does not exist (HTTP 404).
pub trait CatalogFetch: Send + Sync + 'static {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Option<Value>>> + Send;
}

/// reqwest-backed catalog client.
pub struct CatalogClient {
    client: Client,
    base_url: Url,
    api_key: String,
    sequence: AtomicU64,
}

impl CatalogClient {
    /// Build a client from the runtime catalog configuration.
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| CatalogSyncError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            sequence: AtomicU64::new(0),
        })
    }

    /// Number of requests issued so far.
    pub fn requests_sent(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Resolve `path` against the base URL. Returns the request URL and the
    /// same URL without credentials for logging.
    fn request_url(&self, path: &str) -> Result<(Url, String)> {
        let mut url = self.base_url.join(path).map_err(|e| {
            CatalogSyncError::Transport(format!("invalid catalog path '{path}': {e}"))
        })?;
        url.query_pairs_mut().append_pair("fmt", "json");
        let redacted = url.to_string();
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        Ok((url, redacted))
    }
}

impl CatalogFetch for CatalogClient {
    async fn fetch(&self, path: &str) -> Result<Option<Value>> {
        let (url, redacted) = self.request_url(path)?;
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(seq, url = %redacted, "request dispatched");

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(seq, url = %redacted, error = %e, "request failed");
            CatalogSyncError::Transport(format!("{redacted}: {e}"))
        })?;

        let status = response.status();
        info!(seq, status = status.as_u16(), url = %redacted, "request completed");

        let body = response
            .text()
            .await
            .map_err(|e| CatalogSyncError::Transport(format!("{redacted}: body read failed: {e}")))?;

        match status {
            StatusCode::OK => serde_json::from_str(&body).map(Some).map_err(|e| {
                CatalogSyncError::parse(format!("{redacted}: invalid JSON body: {e}"))
            }),
            StatusCode::NOT_FOUND => {
                debug!(seq, url = %redacted, body = %truncate(&body), "resource not found");
                Ok(None)
            }
            _ => Err(CatalogSyncError::Server {
                status: status.as_u16(),
                url: redacted,
                body: truncate(&body),
            }),
        }
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let mut cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        cut.push('…');
        cut
    }
}
