//! # Exponential Backoff
//!
//! Doubling backoff bounded by a minimum and a maximum delay.
//! Sequence for the default reconcile bounds: 1s, 2s, 4s, 8s, 16s, 32s, 60s (max).

use std::time::Duration;

/// Default lower bound for reconcile retries
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);
/// Default upper bound for reconcile retries
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Stateful exponential backoff calculator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff (for reset)
    min: Duration,
    /// Value returned by the next call
    current: Duration,
    /// Maximum backoff
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `min` and capped at `max`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min,
            max: max.max(min),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    /// Backoff for the nth consecutive failure (0-indexed), without state
    #[must_use]
    pub fn for_attempt(attempt: u32, min: Duration, max: Duration) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        min.saturating_mul(factor).min(max.max(min))
    }
}

/// Retry delay policy attached to a retry directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn exponential(min: Duration, max: Duration) -> Self {
        Self { min, max }
    }

    /// Delay before retry number `attempt` (0-indexed)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        ExponentialBackoff::for_attempt(attempt, self.min, self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(DEFAULT_MIN_DELAY, DEFAULT_MAX_DELAY)
    }
}
