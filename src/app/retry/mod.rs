//! Bounded retry driver with Fibonacci backoff
//!
//! The driver repeatedly runs a single-attempt function and reacts to how
//! that attempt was classified:
//!
//! - **Success** ends the sequence immediately
//! - **Retryable** failures sleep for `max(backend hint, backoff step)` and try again
//! - **Fatal** failures end the sequence immediately with that error
//!
//! Both the attempt itself and the sleep race the shutdown signal, so a
//! shutdown during a long backoff aborts promptly.
//!
//! Every cycle runs under the policy's time budget. The budget is checked
//! between attempts only: a started attempt always runs to completion (it is
//! bounded by the client's own timeout), so a save in progress is never
//! abandoned. A wait that would end past the deadline ends the cycle at once.

use std::future::Future;
use std::time::Duration;

use ::backoff::backoff::Backoff;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::app::coordinator::signals::ShutdownSignal;
use crate::constants::limits;
use crate::errors::{BackendResult, FetchError};

pub mod backoff;

pub use self::backoff::FibonacciBackoff;

/// Classification of one backend attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Bytes were fetched and persisted
    Success,
    /// Transient failure; `suggested_wait` is the backend's hint (zero if none)
    Retryable {
        error: FetchError,
        suggested_wait: Duration,
    },
    /// Failure that another attempt will not fix
    Fatal(FetchError),
}

impl AttemptOutcome {
    /// Retryable outcome without a backend hint
    pub fn retryable(error: FetchError) -> Self {
        Self::Retryable {
            error,
            suggested_wait: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success)
    }
}

/// Attempt limit and backoff shape for one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// First step of the Fibonacci sequence
    pub base_delay: Duration,
    /// Ceiling for our own backoff steps (backend hints are never capped)
    pub max_delay: Option<Duration>,
    /// Deadline for the whole cycle, measured from the first attempt
    pub budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: limits::MAX_ATTEMPTS,
            base_delay: limits::BACKOFF_BASE_DELAY,
            max_delay: None,
            budget: limits::FETCH_BUDGET,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    fn backoff(&self) -> FibonacciBackoff {
        FibonacciBackoff::new(self.base_delay).with_max_delay(self.max_delay)
    }
}

/// Run `attempt` until it succeeds, fails fatally, or the policy's attempts
/// or budget run out
///
/// `attempt` receives the 1-based attempt number.
///
/// # Errors
///
/// - the fatal error of the first non-retryable attempt
/// - `FetchError::Cancelled` if shutdown fires during an attempt or a backoff sleep
/// - `FetchError::BudgetExceeded` if the next attempt could not start before the deadline
/// - `FetchError::RetriesExhausted` wrapping the last retryable error
pub async fn retry_with_fibonacci<F, Fut>(
    shutdown: &ShutdownSignal,
    policy: &RetryPolicy,
    mut attempt: F,
) -> BackendResult<()>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AttemptOutcome>,
{
    let mut backoff = policy.backoff();
    let mut last_error = None;
    let started = Instant::now();

    for attempt_number in 1..=policy.max_attempts {
        if shutdown.is_shutdown() {
            return Err(FetchError::Cancelled);
        }
        if started.elapsed() >= policy.budget {
            return Err(budget_exceeded(policy, last_error));
        }

        debug!(
            "Backend fetch attempt {}/{}",
            attempt_number, policy.max_attempts
        );

        let outcome = tokio::select! {
            outcome = attempt(attempt_number) => outcome,
            _ = shutdown.cancelled() => return Err(FetchError::Cancelled),
        };

        let (error, suggested_wait) = match outcome {
            AttemptOutcome::Success => {
                if attempt_number > 1 {
                    info!("Backend fetch succeeded on attempt {}", attempt_number);
                }
                return Ok(());
            }
            AttemptOutcome::Fatal(error) => {
                warn!(
                    "Backend fetch failed on attempt {} with non-retryable error: {}",
                    attempt_number, error
                );
                return Err(error);
            }
            AttemptOutcome::Retryable {
                error,
                suggested_wait,
            } => (error, suggested_wait),
        };

        let step = backoff.next_backoff().unwrap_or(policy.base_delay);
        let wait = suggested_wait.max(step);

        if attempt_number == policy.max_attempts {
            last_error = Some(error);
            break;
        }

        if wait >= policy.budget.saturating_sub(started.elapsed()) {
            return Err(budget_exceeded(policy, Some(error)));
        }

        warn!(
            "Backend fetch failed (attempt {}/{}): {}. Retrying in {}ms",
            attempt_number,
            policy.max_attempts,
            error,
            wait.as_millis()
        );
        last_error = Some(error);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.cancelled() => {
                debug!("Backoff sleep interrupted by shutdown");
                return Err(FetchError::Cancelled);
            }
        }
    }

    match last_error {
        Some(last) => {
            warn!(
                "Backend fetch failed after {} attempts: {}",
                policy.max_attempts, last
            );
            Err(FetchError::RetriesExhausted {
                attempts: policy.max_attempts,
                last: Box::new(last),
            })
        }
        None => Err(FetchError::NoAttempts),
    }
}

fn budget_exceeded(policy: &RetryPolicy, last_error: Option<FetchError>) -> FetchError {
    match last_error {
        Some(last) => warn!(
            "Fetch budget of {}s exhausted; giving up after: {}",
            policy.budget.as_secs(),
            last
        ),
        None => warn!("Fetch budget of {}s exhausted", policy.budget.as_secs()),
    }
    FetchError::BudgetExceeded {
        budget: policy.budget,
    }
}
