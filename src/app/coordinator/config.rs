//! Configuration structures for the fetch coordinator
//!
//! This module defines how long a cached copy stays servable, how long
//! requests may wait on a fetch, and how fetch failures affect cache age.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::retry::RetryPolicy;
use crate::constants::cache;

/// What a failed refresh does to the cached copy's age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Leave `fetched_at` alone; the copy keeps ageing towards expiry
    #[default]
    KeepAge,
    /// Treat the failed attempt as a refresh of the existing copy
    ExtendAge,
}

/// Configuration for the fetch coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Canonical path of the single cached file
    pub cache_path: PathBuf,
    /// Age up to which the copy is fresh
    pub max_age: Duration,
    /// Window after `max_age` in which one stale read is allowed
    pub grace_period: Duration,
    /// Longest a request waits on a pending fetch
    pub wait_timeout: Duration,
    /// Let requests that find nothing servable ask for a refresh
    pub refresh_on_demand: bool,
    /// Minimum spacing between request-driven refreshes
    pub demand_refresh_cooldown: Duration,
    pub failure_policy: FailurePolicy,
    /// Attempts, backoff and the time budget of one refresh cycle
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cache_path: PathBuf::from(cache::DEFAULT_CACHE_PATH),
            max_age: cache::DEFAULT_MAX_AGE,
            grace_period: cache::DEFAULT_GRACE_PERIOD,
            wait_timeout: cache::DEFAULT_WAIT_TIMEOUT,
            refresh_on_demand: true,
            demand_refresh_cooldown: cache::DEFAULT_DEMAND_REFRESH_COOLDOWN,
            failure_policy: FailurePolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Create a configuration for the given cache file
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            ..Default::default()
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    /// Enable or disable request-driven refreshes
    pub fn with_refresh_on_demand(mut self, enabled: bool) -> Self {
        self.refresh_on_demand = enabled;
        self
    }

    pub fn with_demand_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.demand_refresh_cooldown = cooldown;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// File name under which the cached resource is published
    pub fn cache_file_name(&self) -> Option<&str> {
        self.cache_path.file_name().and_then(|name| name.to_str())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_file_name().is_none() {
            return Err(format!(
                "Cache path {} has no usable file name",
                self.cache_path.display()
            ));
        }

        if self.max_age.is_zero() {
            return Err("Max age cannot be zero".to_string());
        }

        if self.retry.max_attempts == 0 {
            return Err("Max attempts must be at least 1".to_string());
        }

        if self.retry.budget.is_zero() {
            return Err("Fetch budget cannot be zero".to_string());
        }

        Ok(())
    }
}
