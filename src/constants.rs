//! Application constants for Cache Relay
//!
//! This module centralizes the defaults used throughout the application,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Port override (also honoured by most container platforms)
    pub const PORT: &str = "PORT";

    /// Backend URL override
    pub const BACKEND_URL: &str = "CACHE_RELAY_BACKEND_URL";

    /// Cache file path override
    pub const CACHE_PATH: &str = "CACHE_RELAY_CACHE_PATH";
}

/// Build metadata baked in at compile time
pub mod build {
    /// Commit hash of the build, if provided
    pub const COMMIT_SHA: &str = match option_env!("COMMIT_SHA") {
        Some(sha) => sha,
        None => "unknown",
    };

    /// Release tag of the build, if provided
    pub const COMMIT_TAG: &str = match option_env!("COMMIT_TAG") {
        Some(tag) => tag,
        None => "untagged",
    };
}

/// Backend HTTP client constants
pub mod http {
    use super::Duration;

    /// Default user agent for backend requests
    pub const USER_AGENT: &str = concat!("cache-relay/", env!("CARGO_PKG_VERSION"));

    /// Default backend resource
    pub const DEFAULT_BACKEND_URL: &str = "https://picsum.photos/1200";

    /// Timeout for a single backend attempt
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Retry and backoff configuration
pub mod limits {
    use super::Duration;

    /// Maximum attempts per refresh cycle
    pub const MAX_ATTEMPTS: u32 = 5;

    /// First step of the Fibonacci backoff sequence
    pub const BACKOFF_BASE_DELAY: Duration = Duration::from_secs(1);

    /// Wall-clock budget for a whole refresh cycle
    pub const FETCH_BUDGET: Duration = Duration::from_secs(5 * 60);
}

/// Cache staleness configuration
pub mod cache {
    use super::Duration;

    /// Default canonical cache file
    pub const DEFAULT_CACHE_PATH: &str = "./cache/image.jpg";

    /// How long a fetched copy is fresh
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(10 * 60);

    /// Window after max age during which one stale read is allowed
    pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

    /// How long a request may wait on an in-flight fetch
    pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Minimum spacing between request-driven refreshes
    pub const DEFAULT_DEMAND_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);
}

/// File operation constants
pub mod files {
    /// Temporary file suffix for atomic operations
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Permissions of the promoted cache file (Unix only)
    #[cfg(unix)]
    pub const CACHE_FILE_PERMISSIONS: u32 = 0o644;
}

/// HTTP surface defaults
pub mod server {
    /// Default bind address
    pub const DEFAULT_BIND: &str = "0.0.0.0";

    /// Default listening port
    pub const DEFAULT_PORT: u16 = 8080;

    /// Seconds advertised in `Retry-After` on 503 responses
    pub const RETRY_AFTER_SECS: u64 = 10;

    /// Content type of the cached resource
    pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

    /// Cache-Control header on successful responses
    pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=10";
}

/// Refresh loop and background task constants
pub mod refresh {
    use super::Duration;

    /// Buffered fetch results kept for listeners
    pub const RESULT_BUFFER: usize = 1;

    /// Timeout for background task shutdown
    pub const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Logging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

pub use cache::{DEFAULT_CACHE_PATH, DEFAULT_GRACE_PERIOD, DEFAULT_MAX_AGE};
pub use files::TEMP_FILE_SUFFIX;
pub use http::{DEFAULT_BACKEND_URL, USER_AGENT};
pub use limits::MAX_ATTEMPTS;
