//! Background refresh loop
//!
//! A single task consumes heartbeats and runs one refresh cycle per
//! heartbeat. Because there is exactly one consumer, cycles never overlap.
//! Completed cycles are offered to a small result channel without blocking;
//! if nobody is listening the result is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatReceiver;
use super::signals::ShutdownSignal;
use super::state::FetchResult;
use super::FetchCoordinator;
use crate::constants::refresh;

/// Settings for the periodic refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshConfig {
    /// Period of the heartbeat ticker
    pub interval: Duration,
    /// Completed results buffered for listeners
    pub result_buffer: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval: crate::constants::cache::DEFAULT_MAX_AGE,
            result_buffer: refresh::RESULT_BUFFER,
        }
    }
}

/// Handle to a running refresh loop
#[derive(Debug)]
pub struct RefreshHandle {
    results: mpsc::Receiver<FetchResult>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Next completed refresh cycle; `None` once the loop has exited
    pub async fn next_result(&mut self) -> Option<FetchResult> {
        self.results.recv().await
    }

    /// Non-blocking variant of [`next_result`](Self::next_result)
    pub fn try_next_result(&mut self) -> Option<FetchResult> {
        self.results.try_recv().ok()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop to exit after shutdown has been signalled
    ///
    /// Returns false if the loop did not stop within the shutdown timeout.
    pub async fn shutdown(self) -> bool {
        match tokio::time::timeout(refresh::TASK_SHUTDOWN_TIMEOUT, self.task).await {
            Ok(Ok(())) => {
                debug!("Refresh loop stopped");
                true
            }
            Ok(Err(e)) => {
                warn!("Refresh loop ended abnormally: {}", e);
                true
            }
            Err(_) => {
                warn!("Refresh loop did not stop within timeout");
                false
            }
        }
    }
}

/// Background consumer of heartbeats
pub struct RefreshLoop;

impl RefreshLoop {
    /// Start the loop
    ///
    /// The loop exits when `shutdown` fires or every heartbeat sender is gone.
    pub fn spawn(
        coordinator: Arc<FetchCoordinator>,
        mut heartbeats: HeartbeatReceiver,
        result_buffer: usize,
        shutdown: ShutdownSignal,
    ) -> RefreshHandle {
        let (results_tx, results) = mpsc::channel(result_buffer.max(1));

        let task = tokio::spawn(async move {
            info!("Refresh loop started");

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("Refresh loop received shutdown signal");
                        break;
                    }
                    beat = heartbeats.recv() => {
                        if beat.is_none() {
                            debug!("Heartbeat channel closed");
                            break;
                        }

                        let Some(result) = coordinator.run_fetch(&shutdown).await else {
                            continue;
                        };

                        match results_tx.try_send(result) {
                            Ok(()) | Err(TrySendError::Closed(_)) => {}
                            Err(TrySendError::Full(_)) => {
                                debug!("No listener for refresh result; dropping it");
                            }
                        }
                    }
                }
            }

            info!("Refresh loop stopped");
        });

        RefreshHandle { results, task }
    }
}
