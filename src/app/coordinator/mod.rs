//! Fetch coordination and staleness management
//!
//! The coordinator owns the single cache slot and answers two questions:
//! what to tell a request right now ([`FetchCoordinator::serve`]) and how to
//! run a refresh cycle ([`FetchCoordinator::run_fetch`]).
//!
//! # Serving rules
//!
//! | State                        | Response                          |
//! |------------------------------|-----------------------------------|
//! | never fetched                | try later                         |
//! | fresh (`age <= max_age`)     | cached bytes                      |
//! | stale, grace read unused     | cached bytes, grace read consumed |
//! | stale, grace read used       | try later                         |
//! | expired                      | try later                         |
//!
//! A request that would be told to try later while a fetch is pending waits
//! up to `wait_timeout` for that fetch and then decides once more. Requests
//! never contact the backend themselves; at most they queue a heartbeat for
//! the refresh loop.
//!
//! # Architecture
//!
//! - [`config`] - Coordinator configuration and failure policy
//! - [`state`] - Cache entry, staleness classification and result types
//! - [`heartbeat`] - Single-slot trigger channel and periodic ticker
//! - [`refresh`] - The background refresh loop
//! - [`signals`] - Shutdown signalling and OS signal handling
//!
//! # Examples
//!
//! ```rust,no_run
//! use cache_relay::app::client::{ClientConfig, HttpFetcher};
//! use cache_relay::app::coordinator::{
//!     heartbeat_channel, shutdown_channel, CoordinatorConfig, FetchCoordinator, RefreshLoop,
//! };
//! use cache_relay::app::store::FileStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileStore::new());
//! let client_config = ClientConfig::new("https://picsum.photos/1200".parse()?);
//! let fetcher = Arc::new(HttpFetcher::new(&client_config, store.clone())?);
//!
//! let (heartbeat, heartbeats) = heartbeat_channel();
//! let (trigger, shutdown) = shutdown_channel();
//! let coordinator = Arc::new(
//!     FetchCoordinator::new(CoordinatorConfig::default(), store, fetcher)
//!         .with_heartbeat(heartbeat.clone()),
//! );
//!
//! coordinator.load_from_disk().await?;
//! let mut refresh = RefreshLoop::spawn(coordinator.clone(), heartbeats, 1, shutdown);
//!
//! heartbeat.trigger();
//! let result = refresh.next_result().await;
//! println!("Fetched: {:?}", result.map(|r| r.available));
//!
//! trigger.trigger();
//! refresh.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod heartbeat;
pub mod refresh;
pub mod signals;
pub mod state;

#[cfg(test)]
pub mod tests;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::app::client::BackendFetcher;
use crate::app::clock::{Clock, SystemClock};
use crate::app::retry::retry_with_fibonacci;
use crate::app::store::CacheStore;
use crate::errors::{FetchError, StoreResult};

pub use config::{CoordinatorConfig, FailurePolicy};
pub use heartbeat::{
    heartbeat_channel, spawn_periodic_heartbeat, Heartbeat, HeartbeatReceiver, TriggerOutcome,
};
pub use refresh::{RefreshConfig, RefreshHandle, RefreshLoop};
pub use signals::{shutdown_channel, ShutdownSignal, ShutdownTrigger, SignalHandler};
pub use state::{CacheStatus, FetchResult, FetchState, ServeOutcome, TryLaterReason};

use state::{elapsed_since, CacheEntry};

/// Outcome of a serve decision taken under the lock
enum Decision {
    Serve,
    TryLater {
        reason: TryLaterReason,
        completion: Option<watch::Receiver<Option<FetchResult>>>,
    },
}

/// Coordinator for the single cached resource
///
/// Shared as `Arc<FetchCoordinator>` between request handlers and the
/// refresh loop. All state lives behind one lock that is never held across
/// network or disk I/O.
#[derive(Debug)]
pub struct FetchCoordinator {
    config: CoordinatorConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn BackendFetcher>,
    clock: Arc<dyn Clock>,
    heartbeat: Option<Heartbeat>,
    entry: RwLock<CacheEntry>,
}

impl FetchCoordinator {
    /// Create a coordinator with an empty cache slot
    ///
    /// Without a heartbeat (see [`with_heartbeat`](Self::with_heartbeat))
    /// requests cannot ask for a refresh.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn BackendFetcher>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            clock: Arc::new(SystemClock),
            heartbeat: None,
            entry: RwLock::new(CacheEntry::new()),
        }
    }

    /// Replace the wall clock used for ages
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach the heartbeat that feeds the refresh loop
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        self.heartbeat.as_ref()
    }

    /// Seed the cache entry from a file left by a previous run
    ///
    /// Returns `Ok(true)` if a cached copy exists, `Ok(false)` if not.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DirectoryNotAccessible` when the cache directory
    /// is missing or unusable. Callers should treat this as fatal.
    pub async fn load_from_disk(&self) -> StoreResult<bool> {
        let path = self.config.cache_path();
        let modified = self.store.modified_at(path).await?;

        let mut entry = self.entry.write().await;
        match modified {
            Some(modified) => {
                entry.fetched_at = Some(modified);
                entry.grace_period_used = false;
                info!(
                    "Loaded cached copy {} (modified {})",
                    path.display(),
                    modified.to_rfc3339()
                );
                Ok(true)
            }
            None => {
                info!("No cached copy at {}", path.display());
                Ok(false)
            }
        }
    }

    /// Decide how to answer one request for the cached resource
    pub async fn serve(&self) -> ServeOutcome {
        let (reason, mut completion) = match self.decide().await {
            Decision::Serve => return self.read_cached().await,
            Decision::TryLater {
                reason,
                completion: None,
            } => return ServeOutcome::TryLater(reason),
            Decision::TryLater {
                reason,
                completion: Some(completion),
            } => (reason, completion),
        };

        debug!("Waiting for pending fetch ({})", reason);
        let waited = tokio::time::timeout(
            self.config.wait_timeout,
            completion.wait_for(|result| result.is_some()),
        )
        .await
        .map(|finished| finished.is_ok());

        if waited.is_err() {
            debug!(
                "Pending fetch did not finish within {}ms",
                self.config.wait_timeout.as_millis()
            );
            return ServeOutcome::TryLater(reason);
        }

        match self.decide().await {
            Decision::Serve => self.read_cached().await,
            Decision::TryLater { reason, .. } => ServeOutcome::TryLater(reason),
        }
    }

    async fn decide(&self) -> Decision {
        let now = self.clock.now();
        let mut entry = self.entry.write().await;

        let state = FetchState::classify(
            entry.fetched_at,
            now,
            self.config.max_age,
            self.config.grace_period,
        );

        let reason = match state {
            FetchState::Fresh => {
                entry.grace_period_used = false;
                entry.last_served_at = Some(now);
                return Decision::Serve;
            }
            FetchState::Stale if !entry.grace_period_used => {
                entry.grace_period_used = true;
                entry.last_served_at = Some(now);
                info!("Serving stale copy within grace period");
                return Decision::Serve;
            }
            FetchState::Stale => TryLaterReason::GraceUsed,
            FetchState::Expired => TryLaterReason::Expired,
            FetchState::NotFetched => TryLaterReason::NotFetched,
        };

        self.request_refresh_on_demand(&mut entry, now);

        Decision::TryLater {
            reason,
            completion: entry.phase.subscribe(),
        }
    }

    /// Queue a refresh for a request that found nothing servable
    fn request_refresh_on_demand(&self, entry: &mut CacheEntry, now: DateTime<Utc>) {
        if !self.config.refresh_on_demand || entry.phase.is_pending() {
            return;
        }

        if let Some(last_attempt) = entry.last_attempt_at {
            if elapsed_since(last_attempt, now) < self.config.demand_refresh_cooldown {
                return;
            }
        }

        let Some(heartbeat) = &self.heartbeat else {
            return;
        };

        if heartbeat.trigger().is_accepted() {
            info!("Requested refresh on demand");
            entry.phase = state::FetchPhase::pending(false);
        }
    }

    /// Ask the refresh loop for a cycle, bypassing the on-demand cooldown
    ///
    /// Requests arriving before the cycle starts wait on it like on any other
    /// pending fetch.
    pub async fn request_refresh(&self) -> TriggerOutcome {
        let Some(heartbeat) = &self.heartbeat else {
            return TriggerOutcome::Closed;
        };

        let mut entry = self.entry.write().await;
        let outcome = heartbeat.trigger();
        if outcome.is_accepted() && !entry.phase.is_pending() {
            entry.phase = state::FetchPhase::pending(false);
        }
        outcome
    }

    async fn read_cached(&self) -> ServeOutcome {
        match self.store.load(self.config.cache_path()).await {
            Ok(bytes) => ServeOutcome::Hit(bytes),
            Err(e) => {
                warn!("Failed to read cached copy: {}", e);
                ServeOutcome::ReadFailed(e)
            }
        }
    }

    /// Run one refresh cycle
    ///
    /// Returns `None` without touching the backend if a cycle is already in
    /// flight. Otherwise runs the retry driver (bounded by the retry policy's
    /// budget), updates the entry, wakes every waiter and returns the result.
    pub async fn run_fetch(&self, shutdown: &ShutdownSignal) -> Option<FetchResult> {
        {
            let mut entry = self.entry.write().await;
            if !entry.phase.begin() {
                debug!("Fetch already in flight; ignoring heartbeat");
                return None;
            }
            entry.last_attempt_at = Some(self.clock.now());
        }

        info!("Refreshing cached copy");
        let path = self.config.cache_path();
        let outcome = retry_with_fibonacci(shutdown, &self.config.retry, |_| {
            self.fetcher.fetch(path)
        })
        .await;

        let now = self.clock.now();
        let mut entry = self.entry.write().await;

        let result = match outcome {
            Ok(()) => {
                entry.mark_refreshed(now);
                entry.fetch_count += 1;
                entry.last_error = None;
                info!("Cached copy refreshed: {}", path.display());
                FetchResult::success(path.to_path_buf())
            }
            Err(error) => {
                if matches!(error, FetchError::Cancelled) {
                    info!("Refresh cancelled by shutdown");
                } else {
                    entry.failure_count += 1;
                    warn!("Refresh failed: {}", error);
                }
                entry.last_error = Some(error.to_string());

                if self.config.failure_policy == FailurePolicy::ExtendAge
                    && entry.fetched_at.is_some()
                {
                    debug!("Extending age of existing copy after failed refresh");
                    entry.mark_refreshed(now);
                }

                FetchResult::failure(path.to_path_buf(), error)
            }
        };

        entry.phase.complete(&result);
        Some(result)
    }

    /// Snapshot of the cache entry
    pub async fn status(&self) -> CacheStatus {
        let now = self.clock.now();
        let entry = self.entry.read().await;

        CacheStatus {
            path: self.config.cache_path.clone(),
            state: FetchState::classify(
                entry.fetched_at,
                now,
                self.config.max_age,
                self.config.grace_period,
            ),
            fetched_at: entry.fetched_at,
            age_secs: entry
                .fetched_at
                .map(|fetched_at| elapsed_since(fetched_at, now).as_secs()),
            grace_period_used: entry.grace_period_used,
            refresh_pending: entry.phase.is_pending(),
            fetch_in_flight: entry.phase.is_in_flight(),
            last_attempt_at: entry.last_attempt_at,
            last_served_at: entry.last_served_at,
            last_error: entry.last_error.clone(),
            fetch_count: entry.fetch_count,
            failure_count: entry.failure_count,
        }
    }
}
