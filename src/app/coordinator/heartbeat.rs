//! Heartbeat channel that drives the refresh loop
//!
//! The channel holds at most one pending heartbeat. Triggering while one is
//! already queued is coalesced, so bursts of triggers cause at most one extra
//! refresh cycle.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::signals::ShutdownSignal;

/// What happened to a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new heartbeat was queued
    Queued,
    /// One was already queued; this one merged into it
    Coalesced,
    /// The refresh loop is gone
    Closed,
}

impl TriggerOutcome {
    /// Whether a refresh cycle will follow
    pub fn is_accepted(self) -> bool {
        !matches!(self, TriggerOutcome::Closed)
    }
}

/// Sending side of the heartbeat channel
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: mpsc::Sender<()>,
}

/// Receiving side, consumed by the refresh loop
pub type HeartbeatReceiver = mpsc::Receiver<()>;

impl Heartbeat {
    /// Request one refresh cycle without waiting
    pub fn trigger(&self) -> TriggerOutcome {
        match self.tx.try_send(()) {
            Ok(()) => TriggerOutcome::Queued,
            Err(TrySendError::Full(())) => TriggerOutcome::Coalesced,
            Err(TrySendError::Closed(())) => TriggerOutcome::Closed,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a heartbeat channel with a single slot
pub fn heartbeat_channel() -> (Heartbeat, HeartbeatReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Heartbeat { tx }, rx)
}

/// Trigger `heartbeat` every `period` until shutdown
///
/// The first tick fires one full period after spawning; ticks missed while
/// the runtime was busy are skipped rather than bunched up.
pub fn spawn_periodic_heartbeat(
    heartbeat: Heartbeat,
    period: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Periodic refresh every {}s", period.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if heartbeat.trigger() == TriggerOutcome::Closed {
                        debug!("Refresh loop gone; stopping periodic heartbeat");
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    debug!("Periodic heartbeat received shutdown signal");
                    break;
                }
            }
        }
    })
}
