//! Error types for Cache Relay
//!
//! Errors are layered the same way the components are: the atomic store,
//! the backend fetcher/retry driver, configuration, and the HTTP server each
//! have their own enum, and [`AppError`] wraps them for the binary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Local disk errors raised by the atomic store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Cache directory missing or inaccessible
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cache path has no file name component
    #[error("Invalid cache path: {path}")]
    InvalidPath { path: PathBuf },

    /// Temporary file could not be created next to the canonical file
    #[error("Failed to create temporary file in {dir}")]
    TempFile {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing or syncing the temporary file failed
    #[error("Failed to write cache data to {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Promoting the temporary file failed
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicRename {
        temp_path: PathBuf,
        final_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the canonical file failed
    #[error("Failed to read cached file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Blocking file task panicked or was cancelled
    #[error("Background file task failed")]
    Task(#[from] tokio::task::JoinError),
}

/// Backend fetch errors, classified by the fetcher and retry driver
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network-level timeout (connect or read)
    #[error("Backend request timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Non-timeout network error (DNS, connection refused, TLS...)
    #[error("Backend request failed")]
    Network(#[source] reqwest::Error),

    /// Backend asked us to slow down
    #[error("Rate limit exceeded. Backend responded with HTTP 429")]
    RateLimited,

    /// Backend overloaded or a gateway in front of it failed
    #[error("Backend unavailable. Backend responded with HTTP {status}")]
    Unavailable { status: u16 },

    /// Any status we do not retry
    #[error("Unexpected backend response: HTTP {status}")]
    UnexpectedStatus { status: u16 },

    /// Fetched bytes could not be persisted
    #[error("Failed to persist fetched data")]
    Store(#[from] StoreError),

    /// Every attempt came back retryable
    #[error("All retries failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    /// The overall fetch budget ran out
    #[error("Fetch budget of {budget:?} exhausted")]
    BudgetExceeded { budget: Duration },

    /// Shutdown was requested while fetching or backing off
    #[error("Fetch cancelled by shutdown")]
    Cancelled,

    /// Retry driver was asked to run zero attempts
    #[error("No fetch attempts were made")]
    NoAttempts,
}

impl FetchError {
    /// Whether the error came from a transient backend condition
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. }
            | FetchError::RateLimited
            | FetchError::Unavailable { .. } => true,
            FetchError::RetriesExhausted { last, .. } => last.is_transient(),
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Configuration file could not be read or written
    #[error("Configuration file I/O failed: {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be rendered
    #[error("Failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Refusing to overwrite an existing file
    #[error("Configuration file already exists: {path}. Use --force to overwrite")]
    AlreadyExists { path: PathBuf },
}

/// HTTP server errors
#[derive(Error, Debug)]
pub enum ServerError {
    /// Listener could not be bound
    #[error("Failed to bind {addr}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Server loop terminated with an error
    #[error("HTTP server error")]
    Serve(#[source] std::io::Error),

    /// The first fetch after a cold start failed; nothing can be served
    #[error("Initial fetch failed and no cached copy exists")]
    InitialFetchFailed(#[source] std::sync::Arc<FetchError>),

    /// The refresh loop stopped before reporting a result
    #[error("Refresh loop stopped unexpectedly")]
    RefreshLoopStopped,
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Fetch error
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A refresh cycle reported failure
    #[error("Refresh failed: {0}")]
    RefreshFailed(std::sync::Arc<FetchError>),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Server error
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Fetch(e) => e.is_transient(),
            AppError::RefreshFailed(e) => e.is_transient(),
            AppError::Server(ServerError::InitialFetchFailed(e)) => e.is_transient(),
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Store(_) => "store",
            AppError::Fetch(_) | AppError::RefreshFailed(_) => "fetch",
            AppError::Config(_) => "config",
            AppError::Server(_) => "server",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backend fetch result type alias
pub type BackendResult<T> = std::result::Result<T, FetchError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
