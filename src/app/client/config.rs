//! Backend client configuration and building logic

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::constants::http;
use crate::errors::{BackendResult, FetchError};

/// Settings for the backend HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Resource fetched on every refresh
    pub backend_url: Url,
    /// Timeout for a single attempt, body included
    pub fetch_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl ClientConfig {
    /// Client for `backend_url` with default timeouts
    pub fn new(backend_url: Url) -> Self {
        Self {
            backend_url,
            fetch_timeout: http::DEFAULT_FETCH_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            user_agent: http::USER_AGENT.to_string(),
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    /// Builds the HTTP client with the specified configuration
    pub fn build_http_client(&self) -> BackendResult<Client> {
        Client::builder()
            .timeout(self.fetch_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.as_str())
            .tcp_nodelay(true)
            .build()
            .map_err(FetchError::Network)
    }
}
