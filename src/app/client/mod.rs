//! Backend fetcher
//!
//! One call to [`BackendFetcher::fetch`] is one attempt: a single bounded
//! HTTP GET whose outcome is classified for the retry driver. On success the
//! body is handed to the [`CacheStore`] for atomic promotion.
//!
//! | Condition                         | Outcome                          |
//! |-----------------------------------|----------------------------------|
//! | 200                               | `Success` (or `Fatal` on store error) |
//! | 429, 502, 503, 504                | `Retryable`, wait from `Retry-After` |
//! | network timeout                   | `Retryable`, no wait             |
//! | other network error / status      | `Fatal`                          |
//!
//! The module is organized into:
//! - `config`: client settings and reqwest client construction
//! - `retry_after`: `Retry-After` header parsing

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use url::Url;

use crate::app::retry::AttemptOutcome;
use crate::app::store::CacheStore;
use crate::errors::{BackendResult, FetchError};

pub mod config;
pub mod retry_after;

pub use config::ClientConfig;

/// Source of the cached resource
#[async_trait]
pub trait BackendFetcher: Send + Sync + Debug {
    /// Make one attempt to fetch the resource into `destination`
    async fn fetch(&self, destination: &Path) -> AttemptOutcome;
}

/// Fetcher for a single HTTP(S) resource
#[derive(Debug)]
pub struct HttpFetcher {
    client: Client,
    url: Url,
    timeout_secs: u64,
    store: Arc<dyn CacheStore>,
}

impl HttpFetcher {
    /// Creates a fetcher that persists through `store`
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Network` if the HTTP client cannot be built
    pub fn new(config: &ClientConfig, store: Arc<dyn CacheStore>) -> BackendResult<Self> {
        let client = config.build_http_client()?;
        Ok(Self {
            client,
            url: config.backend_url.clone(),
            timeout_secs: config.fetch_timeout.as_secs(),
            store,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    fn classify_transport_error(&self, error: reqwest::Error) -> AttemptOutcome {
        if error.is_timeout() {
            warn!("Backend request to {} timed out", self.url);
            AttemptOutcome::retryable(FetchError::Timeout {
                seconds: self.timeout_secs,
            })
        } else {
            AttemptOutcome::Fatal(FetchError::Network(error))
        }
    }
}

#[async_trait]
impl BackendFetcher for HttpFetcher {
    async fn fetch(&self, destination: &Path) -> AttemptOutcome {
        debug!("Fetching {}", self.url);

        let response = match self.client.get(self.url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return self.classify_transport_error(e),
        };

        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT => {
                let suggested_wait = retry_after::suggested_wait(response.headers(), Utc::now());
                let error = if status == StatusCode::TOO_MANY_REQUESTS {
                    FetchError::RateLimited
                } else {
                    FetchError::Unavailable {
                        status: status.as_u16(),
                    }
                };
                warn!(
                    "Backend responded with {} (Retry-After hint {}s)",
                    status,
                    suggested_wait.as_secs()
                );
                return AttemptOutcome::Retryable {
                    error,
                    suggested_wait,
                };
            }
            other => {
                return AttemptOutcome::Fatal(FetchError::UnexpectedStatus {
                    status: other.as_u16(),
                })
            }
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return self.classify_transport_error(e),
        };

        debug!(bytes = bytes.len(), "Received backend response body");

        match self.store.save(destination, bytes.to_vec()).await {
            Ok(()) => AttemptOutcome::Success,
            Err(e) => AttemptOutcome::Fatal(FetchError::Store(e)),
        }
    }
}
