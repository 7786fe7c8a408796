//! Cache entry state and the values the coordinator hands out

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::errors::{FetchError, StoreError};

/// Staleness of the cached copy, derived from its age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    NotFetched,
    Fresh,
    Stale,
    Expired,
}

impl FetchState {
    /// Classify a copy fetched at `fetched_at`
    ///
    /// `age <= max_age` is fresh and `age <= max_age + grace_period` is
    /// stale. A timestamp in the future counts as age zero.
    pub fn classify(
        fetched_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        max_age: Duration,
        grace_period: Duration,
    ) -> Self {
        let Some(fetched_at) = fetched_at else {
            return FetchState::NotFetched;
        };

        let age = elapsed_since(fetched_at, now);
        if age <= max_age {
            FetchState::Fresh
        } else if age <= max_age.saturating_add(grace_period) {
            FetchState::Stale
        } else {
            FetchState::Expired
        }
    }
}

/// Time from `then` to `now`, clamped at zero
pub(crate) fn elapsed_since(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

/// Why a request was not answered with cached bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryLaterReason {
    NotFetched,
    GraceUsed,
    Expired,
}

impl fmt::Display for TryLaterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TryLaterReason::NotFetched => "Resource not fetched yet, try again later",
            TryLaterReason::GraceUsed => "Cached resource is stale, try again later",
            TryLaterReason::Expired => "Cached resource expired, try again later",
        };
        f.write_str(text)
    }
}

/// Result of one serve decision
#[derive(Debug)]
pub enum ServeOutcome {
    /// Cached bytes
    Hit(Vec<u8>),
    /// Nothing servable right now
    TryLater(TryLaterReason),
    /// The cached file could not be read
    ReadFailed(StoreError),
}

/// Record of one completed refresh cycle
#[derive(Debug, Clone)]
pub struct FetchResult {
    /// Whether the cycle produced fresh bytes on disk
    pub available: bool,
    pub path: PathBuf,
    pub error: Option<Arc<FetchError>>,
}

impl FetchResult {
    pub fn success(path: PathBuf) -> Self {
        Self {
            available: true,
            path,
            error: None,
        }
    }

    pub fn failure(path: PathBuf, error: FetchError) -> Self {
        Self {
            available: false,
            path,
            error: Some(Arc::new(error)),
        }
    }
}

/// Fetch progress as seen by waiters
///
/// `Pending` owns the completion slot that waiters subscribe to. The slot is
/// written exactly once, when the refresh cycle ends.
#[derive(Debug, Default)]
pub(crate) enum FetchPhase {
    #[default]
    Idle,
    Pending {
        /// False while the refresh is requested but not yet started
        in_flight: bool,
        completion: watch::Sender<Option<FetchResult>>,
    },
}

impl FetchPhase {
    pub(crate) fn pending(in_flight: bool) -> Self {
        let (completion, _) = watch::channel(None);
        FetchPhase::Pending {
            in_flight,
            completion,
        }
    }

    /// Mark a fetch as started; false if one is already running
    pub(crate) fn begin(&mut self) -> bool {
        match self {
            FetchPhase::Pending { in_flight, .. } if *in_flight => false,
            FetchPhase::Pending { in_flight, .. } => {
                *in_flight = true;
                true
            }
            FetchPhase::Idle => {
                *self = FetchPhase::pending(true);
                true
            }
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(self, FetchPhase::Pending { .. })
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        matches!(self, FetchPhase::Pending { in_flight: true, .. })
    }

    /// Subscribe to the pending fetch's completion, if any
    pub(crate) fn subscribe(&self) -> Option<watch::Receiver<Option<FetchResult>>> {
        match self {
            FetchPhase::Pending { completion, .. } => Some(completion.subscribe()),
            FetchPhase::Idle => None,
        }
    }

    /// Return to idle and hand `result` to every waiter
    pub(crate) fn complete(&mut self, result: &FetchResult) {
        if let FetchPhase::Pending { completion, .. } = std::mem::take(self) {
            completion.send_replace(Some(result.clone()));
        }
    }
}

/// The single cache slot
#[derive(Debug)]
pub(crate) struct CacheEntry {
    pub(crate) fetched_at: Option<DateTime<Utc>>,
    pub(crate) grace_period_used: bool,
    pub(crate) phase: FetchPhase,
    pub(crate) last_attempt_at: Option<DateTime<Utc>>,
    pub(crate) last_served_at: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<String>,
    pub(crate) fetch_count: u64,
    pub(crate) failure_count: u64,
}

impl CacheEntry {
    pub(crate) fn new() -> Self {
        Self {
            fetched_at: None,
            grace_period_used: false,
            phase: FetchPhase::Idle,
            last_attempt_at: None,
            last_served_at: None,
            last_error: None,
            fetch_count: 0,
            failure_count: 0,
        }
    }

    /// Record a refresh of the cached copy at `now`, never moving backwards
    pub(crate) fn mark_refreshed(&mut self, now: DateTime<Utc>) {
        self.fetched_at = Some(match self.fetched_at {
            Some(previous) => previous.max(now),
            None => now,
        });
        self.grace_period_used = false;
    }
}

/// Point-in-time view of the cache for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub path: PathBuf,
    pub state: FetchState,
    pub fetched_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub grace_period_used: bool,
    pub refresh_pending: bool,
    pub fetch_in_flight: bool,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_served_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub fetch_count: u64,
    pub failure_count: u64,
}
