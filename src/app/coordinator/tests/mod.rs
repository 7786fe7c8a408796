//! Unit tests for the fetch coordinator
//!
//! These tests drive the coordinator directly with a scripted fetcher and a
//! manual clock. End-to-end tests over HTTP live in the top-level tests
//! directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::join_all;
use tempfile::TempDir;

use crate::app::client::BackendFetcher;
use crate::app::clock::ManualClock;
use crate::app::retry::{AttemptOutcome, RetryPolicy};
use crate::app::store::{CacheStore, FileStore};
use crate::errors::{FetchError, StoreError};

use super::*;

const IMAGE: &[u8] = b"test image bytes";

/// How the scripted fetcher answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Succeed,
    Retryable,
    /// Retryable with a backend `Retry-After` hint
    Throttled(Duration),
    Fatal,
}

/// Backend double that counts calls and writes through a real store
#[derive(Debug)]
pub struct ScriptedFetcher {
    store: FileStore,
    delay: Duration,
    calls: AtomicUsize,
    behaviour: Mutex<Behaviour>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self {
            store: FileStore::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            behaviour: Mutex::new(Behaviour::Succeed),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFetcher for ScriptedFetcher {
    async fn fetch(&self, destination: &Path) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            Behaviour::Succeed => match self.store.save(destination, IMAGE.to_vec()).await {
                Ok(()) => AttemptOutcome::Success,
                Err(e) => AttemptOutcome::Fatal(FetchError::Store(e)),
            },
            Behaviour::Retryable => {
                AttemptOutcome::retryable(FetchError::Unavailable { status: 503 })
            }
            Behaviour::Throttled(suggested_wait) => AttemptOutcome::Retryable {
                error: FetchError::Unavailable { status: 503 },
                suggested_wait,
            },
            Behaviour::Fatal => {
                AttemptOutcome::Fatal(FetchError::UnexpectedStatus { status: 404 })
            }
        }
    }
}

/// Create test coordinator configuration
///
/// Short ages and fast retries; on-demand refresh is off so tests control
/// every fetch explicitly.
pub fn create_test_config(dir: &Path) -> CoordinatorConfig {
    CoordinatorConfig::new(dir.join("image.jpg"))
        .with_max_age(Duration::from_secs(10))
        .with_grace_period(Duration::from_secs(1))
        .with_wait_timeout(Duration::from_secs(2))
        .with_refresh_on_demand(false)
        .with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_base_delay(Duration::from_millis(10)),
        )
}

/// Everything a coordinator test needs, kept alive together
pub struct Fixture {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub coordinator: Arc<FetchCoordinator>,
}

impl Fixture {
    pub fn new(configure: impl FnOnce(CoordinatorConfig) -> CoordinatorConfig) -> Self {
        Self::with_fetcher(ScriptedFetcher::new(), None, configure)
    }

    pub fn with_fetcher(
        fetcher: ScriptedFetcher,
        heartbeat: Option<Heartbeat>,
        configure: impl FnOnce(CoordinatorConfig) -> CoordinatorConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let fetcher = Arc::new(fetcher);
        let config = configure(create_test_config(dir.path()));

        let mut coordinator =
            FetchCoordinator::new(config, Arc::new(FileStore::new()), fetcher.clone())
                .with_clock(clock.clone());
        if let Some(heartbeat) = heartbeat {
            coordinator = coordinator.with_heartbeat(heartbeat);
        }

        Self {
            dir,
            clock,
            fetcher,
            coordinator: Arc::new(coordinator),
        }
    }

    pub fn cache_path(&self) -> std::path::PathBuf {
        self.dir.path().join("image.jpg")
    }
}

fn assert_hit(outcome: ServeOutcome) {
    match outcome {
        ServeOutcome::Hit(bytes) => assert_eq!(bytes, IMAGE),
        other => panic!("Expected cached bytes, got {:?}", other),
    }
}

fn assert_try_later(outcome: ServeOutcome, expected: TryLaterReason) {
    match outcome {
        ServeOutcome::TryLater(reason) => assert_eq!(reason, expected),
        other => panic!("Expected try later ({:?}), got {:?}", expected, other),
    }
}

/// Test that a cold cache answers "try later" without touching the backend
#[tokio::test]
async fn test_cold_start_serves_try_later() {
    let fixture = Fixture::new(|c| c);

    assert!(!fixture.coordinator.load_from_disk().await.unwrap());
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
    assert_eq!(fixture.fetcher.calls(), 0);
}

/// Test that an existing file is served after hydration
#[tokio::test]
async fn test_warm_start_serves_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("image.jpg");
    std::fs::write(&path, IMAGE).unwrap();

    let fetcher = Arc::new(ScriptedFetcher::new());
    let coordinator = FetchCoordinator::new(
        create_test_config(dir.path()),
        Arc::new(FileStore::new()),
        fetcher.clone(),
    );

    assert!(coordinator.load_from_disk().await.unwrap());
    assert_hit(coordinator.serve().await);
    assert_eq!(fetcher.calls(), 0);

    let status = coordinator.status().await;
    assert_eq!(status.state, FetchState::Fresh);
    assert!(status.fetched_at.is_some());
}

/// Test that a missing cache directory is reported as fatal
#[tokio::test]
async fn test_load_from_disk_missing_directory() {
    let dir = TempDir::new().unwrap();
    let config = create_test_config(&dir.path().join("missing"));
    let coordinator = FetchCoordinator::new(
        config,
        Arc::new(FileStore::new()),
        Arc::new(ScriptedFetcher::new()),
    );

    let result = coordinator.load_from_disk().await;
    assert!(matches!(
        result,
        Err(StoreError::DirectoryNotAccessible { .. })
    ));
}

/// Test that the grace period allows exactly one stale read
#[tokio::test]
async fn test_grace_period_allows_exactly_one_stale_read() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();

    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    assert!(result.available);
    assert_hit(fixture.coordinator.serve().await);

    fixture.clock.advance(Duration::from_millis(10_500));
    assert_hit(fixture.coordinator.serve().await);
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::GraceUsed);
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::GraceUsed);

    assert!(fixture.coordinator.status().await.grace_period_used);
}

/// Test that a refresh restores the grace read
#[tokio::test]
async fn test_refresh_resets_grace_flag() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();

    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    fixture.clock.advance(Duration::from_millis(10_500));
    assert_hit(fixture.coordinator.serve().await);
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::GraceUsed);

    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    assert_hit(fixture.coordinator.serve().await);

    fixture.clock.advance(Duration::from_millis(10_500));
    assert_hit(fixture.coordinator.serve().await);
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::GraceUsed);
}

/// Test the exact boundaries between fresh, stale and expired
#[tokio::test]
async fn test_expiry_is_a_hard_cutoff() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    // age == max_age is still fresh
    fixture.clock.advance(Duration::from_secs(10));
    assert_hit(fixture.coordinator.serve().await);
    assert!(!fixture.coordinator.status().await.grace_period_used);

    // age == max_age + grace is the last stale instant
    fixture.clock.advance(Duration::from_secs(1));
    assert_eq!(fixture.coordinator.status().await.state, FetchState::Stale);

    fixture.clock.advance(Duration::from_millis(1));
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::Expired);
    assert_eq!(fixture.coordinator.status().await.state, FetchState::Expired);
}

/// Test that an expired copy with an unused grace read is still refused
#[tokio::test]
async fn test_expired_copy_refused_even_with_grace_unused() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    fixture.clock.advance(Duration::from_secs(60));
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::Expired);
    assert!(!fixture.coordinator.status().await.grace_period_used);
}

/// Test that a second run_fetch while one is in flight does nothing
#[tokio::test]
async fn test_run_fetch_is_noop_while_in_flight() {
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_millis(300)),
        None,
        |c| c,
    );
    let (_trigger, shutdown) = shutdown_channel();

    let first = {
        let coordinator = fixture.coordinator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { coordinator.run_fetch(&shutdown).await })
    };

    while !fixture.coordinator.status().await.fetch_in_flight {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(fixture.coordinator.run_fetch(&shutdown).await.is_none());

    let result = first.await.unwrap().unwrap();
    assert!(result.available);
    assert_eq!(fixture.fetcher.calls(), 1);
    assert_eq!(fixture.coordinator.status().await.fetch_count, 1);
}

/// Test that concurrent requests on a cold cache cause exactly one fetch
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_under_concurrent_requests() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_millis(200)),
        Some(heartbeat),
        |c| {
            c.with_refresh_on_demand(true)
                .with_wait_timeout(Duration::from_secs(5))
        },
    );
    let (trigger, shutdown) = shutdown_channel();
    let refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);

    let requests = (0..20).map(|_| {
        let coordinator = fixture.coordinator.clone();
        tokio::spawn(async move { coordinator.serve().await })
    });
    let outcomes = join_all(requests).await;

    for outcome in outcomes {
        assert_hit(outcome.unwrap());
    }
    assert_eq!(fixture.fetcher.calls(), 1);

    trigger.trigger();
    assert!(refresh.shutdown().await);
}

/// Test that concurrent requests on an expired copy cause exactly one fetch
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_on_expired_copy() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_millis(200)),
        Some(heartbeat),
        |c| {
            c.with_refresh_on_demand(true)
                .with_demand_refresh_cooldown(Duration::ZERO)
                .with_wait_timeout(Duration::from_secs(5))
        },
    );
    let (trigger, shutdown) = shutdown_channel();
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    assert_eq!(fixture.fetcher.calls(), 1);

    // Past max_age + grace_period
    fixture.clock.advance(Duration::from_secs(12));
    assert_eq!(fixture.coordinator.status().await.state, FetchState::Expired);

    let refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);
    let requests = (0..20).map(|_| {
        let coordinator = fixture.coordinator.clone();
        tokio::spawn(async move { coordinator.serve().await })
    });
    let outcomes = join_all(requests).await;

    for outcome in outcomes {
        assert_hit(outcome.unwrap());
    }
    assert_eq!(fixture.fetcher.calls(), 2);

    trigger.trigger();
    assert!(refresh.shutdown().await);
}

/// Test that waiters give up after the wait timeout
#[tokio::test]
async fn test_waiters_time_out() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_secs(2)),
        Some(heartbeat),
        |c| {
            c.with_refresh_on_demand(true)
                .with_wait_timeout(Duration::from_millis(100))
        },
    );
    let (trigger, shutdown) = shutdown_channel();
    let refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);

    let started = Instant::now();
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(fixture.coordinator.status().await.refresh_pending);

    trigger.trigger();
    assert!(refresh.shutdown().await);
}

/// Test that waiters learn about a failed fetch without waiting out the timeout
#[tokio::test]
async fn test_waiters_released_by_failed_fetch() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_millis(50)),
        Some(heartbeat),
        |c| {
            c.with_refresh_on_demand(true)
                .with_wait_timeout(Duration::from_secs(10))
        },
    );
    fixture.fetcher.set_behaviour(Behaviour::Fatal);
    let (trigger, shutdown) = shutdown_channel();
    let mut refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);

    let started = Instant::now();
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
    assert!(started.elapsed() < Duration::from_secs(5));

    let result = refresh.next_result().await.unwrap();
    assert!(!result.available);
    assert!(matches!(
        result.error.as_deref(),
        Some(FetchError::UnexpectedStatus { status: 404 })
    ));

    trigger.trigger();
    assert!(refresh.shutdown().await);
}

/// Test that the on-demand cooldown suppresses repeated refresh requests
#[tokio::test]
async fn test_on_demand_refresh_respects_cooldown() {
    let (heartbeat, mut heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(ScriptedFetcher::new(), Some(heartbeat), |c| {
        c.with_refresh_on_demand(true)
            .with_wait_timeout(Duration::from_millis(10))
            .with_demand_refresh_cooldown(Duration::from_secs(30))
    });
    fixture.fetcher.set_behaviour(Behaviour::Fatal);
    let (_trigger, shutdown) = shutdown_channel();

    // First request queues a heartbeat; run the cycle by hand
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
    assert!(heartbeats.try_recv().is_ok());
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    // Inside the cooldown nothing is queued
    fixture.clock.advance(Duration::from_secs(5));
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
    assert!(heartbeats.try_recv().is_err());
    assert!(!fixture.coordinator.status().await.refresh_pending);

    // After the cooldown the next request asks again
    fixture.clock.advance(Duration::from_secs(30));
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
    assert!(heartbeats.try_recv().is_ok());
}

/// Test that failures keep the age of the existing copy by default
#[tokio::test]
async fn test_keep_age_policy() {
    let fixture = Fixture::new(|c| c.with_failure_policy(FailurePolicy::KeepAge));
    let (_trigger, shutdown) = shutdown_channel();

    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    let first = fixture.coordinator.status().await.fetched_at;

    fixture.fetcher.set_behaviour(Behaviour::Fatal);
    fixture.clock.advance(Duration::from_secs(5));
    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    assert!(!result.available);

    let status = fixture.coordinator.status().await;
    assert_eq!(status.fetched_at, first);
    assert_eq!(status.failure_count, 1);
    assert!(status.last_error.is_some());

    // The old copy is still served while fresh
    assert_hit(fixture.coordinator.serve().await);
}

/// Test that ExtendAge treats a failed refresh as a refresh of the existing copy
#[tokio::test]
async fn test_extend_age_policy() {
    let fixture = Fixture::new(|c| c.with_failure_policy(FailurePolicy::ExtendAge));
    let (_trigger, shutdown) = shutdown_channel();

    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    fixture.clock.advance(Duration::from_millis(10_500));
    assert_hit(fixture.coordinator.serve().await);
    assert!(fixture.coordinator.status().await.grace_period_used);

    fixture.fetcher.set_behaviour(Behaviour::Fatal);
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    let status = fixture.coordinator.status().await;
    assert_eq!(status.fetched_at, Some(fixture.clock.now()));
    assert!(!status.grace_period_used);
    assert_eq!(status.state, FetchState::Fresh);
}

/// Test that ExtendAge never invents a copy on a cold cache
#[tokio::test]
async fn test_extend_age_policy_on_cold_cache() {
    let fixture = Fixture::new(|c| c.with_failure_policy(FailurePolicy::ExtendAge));
    fixture.fetcher.set_behaviour(Behaviour::Fatal);
    let (_trigger, shutdown) = shutdown_channel();

    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert_eq!(fixture.coordinator.status().await.fetched_at, None);
    assert_try_later(fixture.coordinator.serve().await, TryLaterReason::NotFetched);
}

/// Test that fetched_at never moves backwards when the clock does
#[tokio::test]
async fn test_fetched_at_is_monotonic() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();

    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    let first = fixture.coordinator.status().await.fetched_at.unwrap();

    fixture
        .clock
        .set(first - chrono::Duration::seconds(120));
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert_eq!(fixture.coordinator.status().await.fetched_at, Some(first));
}

/// Test that retryable failures are retried up to the limit
#[tokio::test]
async fn test_retries_exhausted() {
    let fixture = Fixture::new(|c| c);
    fixture.fetcher.set_behaviour(Behaviour::Retryable);
    let (_trigger, shutdown) = shutdown_channel();

    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert!(!result.available);
    assert!(matches!(
        result.error.as_deref(),
        Some(FetchError::RetriesExhausted { attempts: 3, .. })
    ));
    assert_eq!(fixture.fetcher.calls(), 3);
    assert!(!fixture.cache_path().exists());
}

/// Test that the fetch budget bounds a whole cycle
#[tokio::test]
async fn test_fetch_budget_exceeded() {
    let fixture = Fixture::new(|c| {
        c.with_retry(
            RetryPolicy::default()
                .with_max_attempts(10)
                .with_base_delay(Duration::from_millis(200))
                .with_budget(Duration::from_millis(300)),
        )
    });
    fixture.fetcher.set_behaviour(Behaviour::Retryable);
    let (_trigger, shutdown) = shutdown_channel();

    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert!(matches!(
        result.error.as_deref(),
        Some(FetchError::BudgetExceeded { .. })
    ));
    assert_eq!(fixture.fetcher.calls(), 2);
    assert!(!fixture.coordinator.status().await.fetch_in_flight);
}

/// Test that a huge backend hint cannot hold the refresh loop past the
/// default budget
#[tokio::test(start_paused = true)]
async fn test_default_budget_caps_long_retry_after() {
    let fixture = Fixture::new(|c| c.with_retry(RetryPolicy::default()));
    fixture
        .fetcher
        .set_behaviour(Behaviour::Throttled(Duration::from_secs(86_400)));
    let (_trigger, shutdown) = shutdown_channel();
    let budget = fixture.coordinator.config().retry.budget;

    let started = tokio::time::Instant::now();
    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert!(started.elapsed() <= budget);
    assert!(matches!(
        result.error.as_deref(),
        Some(FetchError::BudgetExceeded { .. })
    ));
    assert_eq!(fixture.fetcher.calls(), 1);
    assert_eq!(fixture.coordinator.status().await.failure_count, 1);
}

/// Test that an attempt started within the budget is allowed to persist
#[tokio::test]
async fn test_budget_never_abandons_a_started_save() {
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_millis(300)),
        None,
        |c| c.with_retry(RetryPolicy::default().with_budget(Duration::from_millis(50))),
    );
    let (_trigger, shutdown) = shutdown_channel();

    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert!(result.available);
    assert_eq!(std::fs::read(fixture.cache_path()).unwrap(), IMAGE);
    assert_eq!(fixture.coordinator.status().await.fetch_count, 1);
}

/// Test that shutdown cancels a cycle stuck in backoff
#[tokio::test]
async fn test_shutdown_cancels_fetch() {
    let fixture = Fixture::new(|c| {
        c.with_retry(
            RetryPolicy::default()
                .with_max_attempts(5)
                .with_base_delay(Duration::from_secs(60)),
        )
    });
    fixture.fetcher.set_behaviour(Behaviour::Retryable);
    let (trigger, shutdown) = shutdown_channel();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
    });

    let started = Instant::now();
    let result = fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    assert!(matches!(result.error.as_deref(), Some(FetchError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(fixture.coordinator.status().await.failure_count, 0);
}

/// Test that a vanished cache file is reported as a read failure
#[tokio::test]
async fn test_read_failure() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();

    std::fs::remove_file(fixture.cache_path()).unwrap();

    assert!(matches!(
        fixture.coordinator.serve().await,
        ServeOutcome::ReadFailed(StoreError::Read { .. })
    ));
}

/// Test that a manual refresh request makes requests wait for it
#[tokio::test]
async fn test_request_refresh_marks_pending() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(
        ScriptedFetcher::new().with_delay(Duration::from_millis(50)),
        Some(heartbeat),
        |c| c.with_wait_timeout(Duration::from_secs(5)),
    );
    let (trigger, shutdown) = shutdown_channel();

    assert_eq!(
        fixture.coordinator.request_refresh().await,
        TriggerOutcome::Queued
    );
    assert!(fixture.coordinator.status().await.refresh_pending);

    let refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);
    assert_hit(fixture.coordinator.serve().await);
    assert_eq!(fixture.fetcher.calls(), 1);

    trigger.trigger();
    assert!(refresh.shutdown().await);
}

/// Test that request_refresh without a heartbeat reports the loop as gone
#[tokio::test]
async fn test_request_refresh_without_heartbeat() {
    let fixture = Fixture::new(|c| c);
    assert_eq!(
        fixture.coordinator.request_refresh().await,
        TriggerOutcome::Closed
    );
    assert!(!fixture.coordinator.status().await.refresh_pending);
}

/// Test that the refresh loop publishes results and stops on shutdown
#[tokio::test]
async fn test_refresh_loop_lifecycle() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::with_fetcher(ScriptedFetcher::new(), Some(heartbeat.clone()), |c| c);
    let (trigger, shutdown) = shutdown_channel();
    let mut refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);

    heartbeat.trigger();
    let result = refresh.next_result().await.unwrap();
    assert!(result.available);
    assert_eq!(result.path, fixture.cache_path());

    trigger.trigger();
    tokio::time::timeout(Duration::from_secs(1), async {
        while !refresh.is_finished() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(refresh.next_result().await.is_none());
}

/// Test that the loop exits once every heartbeat sender is gone
#[tokio::test]
async fn test_refresh_loop_exits_when_heartbeats_close() {
    let (heartbeat, heartbeats) = heartbeat_channel();
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();
    let refresh = RefreshLoop::spawn(fixture.coordinator.clone(), heartbeats, 1, shutdown);

    drop(heartbeat);
    assert!(refresh.shutdown().await);
}

/// Test that the status snapshot serialises for the status endpoint
#[tokio::test]
async fn test_status_serialises() {
    let fixture = Fixture::new(|c| c);
    let (_trigger, shutdown) = shutdown_channel();
    fixture.coordinator.run_fetch(&shutdown).await.unwrap();
    fixture.clock.advance(Duration::from_secs(3));

    let status = fixture.coordinator.status().await;
    assert_eq!(status.age_secs, Some(3));

    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["state"], "fresh");
    assert_eq!(json["fetch_count"], 1);
}
