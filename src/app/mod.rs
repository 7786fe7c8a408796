//! Core application logic for Cache Relay
//!
//! This module contains the components behind the HTTP surface: the atomic
//! on-disk store, the backend fetcher, the retry driver, and the coordinator
//! that decides what each request gets.
//!
//! # Examples
//!
//! ```rust,no_run
//! use cache_relay::app::{
//!     create_router, AppState, ClientConfig, CoordinatorConfig, FetchCoordinator, FileStore,
//!     HttpFetcher, ServerConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(FileStore::new());
//! let fetcher = Arc::new(HttpFetcher::new(
//!     &ClientConfig::new("https://picsum.photos/1200".parse()?),
//!     store.clone(),
//! )?);
//! let coordinator = Arc::new(FetchCoordinator::new(
//!     CoordinatorConfig::default(),
//!     store,
//!     fetcher,
//! ));
//!
//! let router = create_router(AppState::new(coordinator, ServerConfig::default()));
//! # let _ = router;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod coordinator;
pub mod retry;
pub mod server;
pub mod store;

// Re-export main public API
pub use client::{BackendFetcher, ClientConfig, HttpFetcher};
pub use clock::{Clock, ManualClock, SystemClock};
pub use coordinator::{
    CacheStatus, CoordinatorConfig, FailurePolicy, FetchCoordinator, FetchResult, FetchState,
    RefreshConfig, RefreshLoop, ServeOutcome,
};
pub use retry::{retry_with_fibonacci, AttemptOutcome, FibonacciBackoff, RetryPolicy};
pub use server::{create_router, run_server, AppState, ServerConfig};
pub use store::{CacheStore, FileStore};
