//! Configuration management for Cache Relay
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! environment variables, then command line flags (applied by the CLI).
//! Durations are written in humantime form (`"10m"`, `"30s"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::app::client::ClientConfig;
use crate::app::coordinator::{CoordinatorConfig, FailurePolicy, RefreshConfig};
use crate::app::retry::RetryPolicy;
use crate::app::server::ServerConfig;
use crate::constants::{cache, env, http, limits, logging, refresh, server};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Cache slot and staleness settings
    pub cache: CacheSection,
    /// Backend and retry settings
    pub backend: BackendSection,
    /// Periodic refresh settings
    pub refresh: RefreshSection,
    /// HTTP listener settings
    pub server: ServerSection,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Canonical cache file
    pub path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// How long a request may wait on a pending fetch
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
    pub refresh_on_demand: bool,
    #[serde(with = "humantime_serde")]
    pub demand_refresh_cooldown: Duration,
    pub failure_policy: FailurePolicy,
    /// Create the cache directory at startup if it is missing; when off, a
    /// missing directory aborts startup
    pub create_dir: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(cache::DEFAULT_CACHE_PATH),
            max_age: cache::DEFAULT_MAX_AGE,
            grace_period: cache::DEFAULT_GRACE_PERIOD,
            wait_timeout: cache::DEFAULT_WAIT_TIMEOUT,
            refresh_on_demand: true,
            demand_refresh_cooldown: cache::DEFAULT_DEMAND_REFRESH_COOLDOWN,
            failure_policy: FailurePolicy::KeepAge,
            create_dir: false,
        }
    }
}

/// TOML-friendly backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub url: String,
    /// Timeout for one attempt
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Attempts per refresh cycle, including the first
    pub max_attempts: u32,
    /// First step of the Fibonacci backoff
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    /// Ceiling for backoff steps (backend hints are never capped)
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub backoff_max: Option<Duration>,
    /// Upper bound on a whole refresh cycle, retries and backend hints included
    #[serde(with = "humantime_serde")]
    pub fetch_budget: Duration,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            url: http::DEFAULT_BACKEND_URL.to_string(),
            fetch_timeout: http::DEFAULT_FETCH_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            user_agent: http::USER_AGENT.to_string(),
            max_attempts: limits::MAX_ATTEMPTS,
            backoff_base: limits::BACKOFF_BASE_DELAY,
            backoff_max: None,
            fetch_budget: limits::FETCH_BUDGET,
        }
    }
}

/// TOML-friendly refresh configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSection {
    /// Ticker period; defaults to the cache max age
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub interval: Option<Duration>,
    pub result_buffer: usize,
}

impl Default for RefreshSection {
    fn default() -> Self {
        Self {
            interval: None,
            result_buffer: refresh::RESULT_BUFFER,
        }
    }
}

/// TOML-friendly server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    pub retry_after_secs: u64,
    pub content_type: String,
    pub cache_control: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: server::DEFAULT_BIND.to_string(),
            port: server::DEFAULT_PORT,
            retry_after_secs: server::RETRY_AFTER_SECS,
            content_type: server::DEFAULT_CONTENT_TYPE.to_string(),
            cache_control: server::DEFAULT_CACHE_CONTROL.to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (explicit, or the first one found in the standard locations)
    /// 3. Environment variables
    ///
    /// CLI flags are applied on top by the caller.
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path });
                }
                Self::load_from_file(&path).await?
            }
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path).await?,
                None => {
                    debug!("No config file found in standard locations, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from the environment
    ///
    /// `lookup` abstracts the environment so tests need not mutate it.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(env::PORT) {
            self.server.port = port.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: env::PORT.to_string(),
                value: port.clone(),
                reason: "Port must be a number between 0 and 65535".to_string(),
            })?;
            debug!("Port overridden from environment: {}", self.server.port);
        }

        if let Some(url) = lookup(env::BACKEND_URL) {
            debug!("Backend URL overridden from environment: {}", url);
            self.backend.url = url;
        }

        if let Some(path) = lookup(env::CACHE_PATH) {
            debug!("Cache path overridden from environment: {}", path);
            self.cache.path = PathBuf::from(path);
        }

        Ok(())
    }

    /// Check values that would otherwise fail later at runtime
    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                reason: reason.to_string(),
            }
        }

        if self.cache.path.file_name().is_none() {
            return Err(invalid(
                "cache.path",
                self.cache.path.display(),
                "Cache path must name a file",
            ));
        }
        if self.cache.max_age.is_zero() {
            return Err(invalid("cache.max_age", "0s", "Max age cannot be zero"));
        }
        if self.backend.max_attempts == 0 {
            return Err(invalid(
                "backend.max_attempts",
                0,
                "At least one attempt is required",
            ));
        }
        if self.backend.fetch_timeout.is_zero() {
            return Err(invalid(
                "backend.fetch_timeout",
                "0s",
                "Fetch timeout cannot be zero",
            ));
        }
        if self.backend.connect_timeout.is_zero() {
            return Err(invalid(
                "backend.connect_timeout",
                "0s",
                "Connect timeout cannot be zero",
            ));
        }
        if self.backend.fetch_budget.is_zero() {
            return Err(invalid(
                "backend.fetch_budget",
                "0s",
                "Fetch budget cannot be zero",
            ));
        }
        if matches!(self.refresh.interval, Some(interval) if interval.is_zero()) {
            return Err(invalid(
                "refresh.interval",
                "0s",
                "Refresh interval cannot be zero",
            ));
        }
        self.backend_url()?;

        Ok(())
    }

    fn backend_url(&self) -> ConfigResult<Url> {
        let url = Url::parse(&self.backend.url).map_err(|e| ConfigError::InvalidValue {
            field: "backend.url".to_string(),
            value: self.backend.url.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigError::InvalidValue {
                field: "backend.url".to_string(),
                value: self.backend.url.clone(),
                reason: format!("Unsupported scheme {}", other),
            }),
        }
    }

    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(
        &self,
    ) -> ConfigResult<(CoordinatorConfig, ClientConfig, RefreshConfig, ServerConfig)> {
        self.validate()?;

        let retry = RetryPolicy::default()
            .with_max_attempts(self.backend.max_attempts)
            .with_base_delay(self.backend.backoff_base)
            .with_max_delay(self.backend.backoff_max)
            .with_budget(self.backend.fetch_budget);

        let coordinator = CoordinatorConfig::new(self.cache.path.clone())
            .with_max_age(self.cache.max_age)
            .with_grace_period(self.cache.grace_period)
            .with_wait_timeout(self.cache.wait_timeout)
            .with_refresh_on_demand(self.cache.refresh_on_demand)
            .with_demand_refresh_cooldown(self.cache.demand_refresh_cooldown)
            .with_failure_policy(self.cache.failure_policy)
            .with_retry(retry);

        let client = ClientConfig {
            backend_url: self.backend_url()?,
            fetch_timeout: self.backend.fetch_timeout,
            connect_timeout: self.backend.connect_timeout,
            user_agent: self.backend.user_agent.clone(),
        };

        let refresh = RefreshConfig {
            interval: self.refresh.interval.unwrap_or(self.cache.max_age),
            result_buffer: self.refresh.result_buffer,
        };

        let server = ServerConfig {
            bind: self.server.bind.clone(),
            port: self.server.port,
            retry_after_secs: self.server.retry_after_secs,
            content_type: self.server.content_type.clone(),
            cache_control: self.server.cache_control.clone(),
        };

        Ok((coordinator, client, refresh, server))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write a commented default configuration file
    ///
    /// Uses the per-user location when `path` is `None`.
    pub async fn write_default_config(path: Option<PathBuf>, force: bool) -> ConfigResult<PathBuf> {
        let config_path = match path {
            Some(path) => path,
            None => Self::default_config_path().ok_or_else(|| ConfigError::InvalidValue {
                field: "config path".to_string(),
                value: String::new(),
                reason: "Could not determine user config directory".to_string(),
            })?,
        };

        if config_path.exists() && !force {
            return Err(ConfigError::AlreadyExists { path: config_path });
        }

        if let Some(parent) = config_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        tokio::fs::write(&config_path, Self::generate_default_config_content())
            .await
            .map_err(|source| ConfigError::Io {
                path: config_path.clone(),
                source,
            })?;

        info!("Wrote default configuration to {}", config_path.display());
        Ok(config_path)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./cache-relay.toml")];
        search_paths.extend(Self::default_config_path());
        #[cfg(unix)]
        search_paths.push(PathBuf::from("/etc/cache-relay/config.toml"));

        let found = search_paths.into_iter().find(|path| path.exists());
        if let Some(path) = &found {
            debug!("Found config file: {}", path.display());
        }
        found
    }

    /// Default config file path for the current user
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cache-relay").join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let config: AppConfig = toml::from_str(&content)?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Generate default configuration content with helpful comments
    fn generate_default_config_content() -> String {
        format!(
            r#"# Cache Relay Configuration
# Durations use humantime syntax: "500ms", "30s", "10m", "1h".

[cache]
# The single cached file; it is published as /images/<file name>
path = "{path}"

# A copy is fresh up to max_age, then one stale read is allowed within
# grace_period, after which requests get 503 until the next refresh
max_age = "10m"
grace_period = "1m"

# How long a request waits on a fetch that is already under way
wait_timeout = "2s"

# Let requests that find nothing servable ask for a refresh
refresh_on_demand = true
demand_refresh_cooldown = "10s"

# What a failed refresh does to the cached copy: "keep-age" or "extend-age"
failure_policy = "keep-age"

# Create the cache directory at startup if it does not exist
# (otherwise a missing directory is a startup error)
create_dir = false

[backend]
url = "{url}"
fetch_timeout = "30s"
connect_timeout = "10s"
user_agent = "{user_agent}"

# Attempts per refresh cycle with Fibonacci backoff (1s, 1s, 2s, 3s, ...)
max_attempts = {max_attempts}
backoff_base = "1s"
# backoff_max = "30s"      # Cap on backoff steps
# Cap on a whole refresh cycle; a longer Retry-After ends the cycle early
fetch_budget = "5m"

[refresh]
# Ticker period (defaults to cache.max_age)
# interval = "10m"
result_buffer = 1

[server]
bind = "{bind}"
port = {port}
retry_after_secs = {retry_after}
content_type = "{content_type}"
cache_control = "{cache_control}"

[logging]
level = "info"  # error, warn, info, debug, trace
json = false
"#,
            path = cache::DEFAULT_CACHE_PATH,
            url = http::DEFAULT_BACKEND_URL,
            user_agent = http::USER_AGENT,
            max_attempts = limits::MAX_ATTEMPTS,
            bind = server::DEFAULT_BIND,
            port = server::DEFAULT_PORT,
            retry_after = server::RETRY_AFTER_SECS,
            content_type = server::DEFAULT_CONTENT_TYPE,
            cache_control = server::DEFAULT_CACHE_CONTROL,
        )
    }
}
