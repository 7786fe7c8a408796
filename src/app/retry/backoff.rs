//! Fibonacci-shaped backoff schedule

use std::time::Duration;

use backoff::backoff::Backoff;

/// Backoff that grows like the Fibonacci sequence: `1, 1, 2, 3, 5, 8, ...` × base
///
/// The sequence itself never ends; the caller's attempt limit bounds it.
/// An optional ceiling caps individual steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FibonacciBackoff {
    base: Duration,
    current: Duration,
    next: Duration,
    max_delay: Option<Duration>,
}

impl FibonacciBackoff {
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            current: base,
            next: base,
            max_delay: None,
        }
    }

    /// Cap each individual step at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl Backoff for FibonacciBackoff {
    fn reset(&mut self) {
        self.current = self.base;
        self.next = self.base;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let delay = self.current;
        let following = self.current.saturating_add(self.next);
        self.current = self.next;
        self.next = following;

        Some(match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        })
    }
}
