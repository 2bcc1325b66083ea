//! Retry policy for unacknowledged requests and dropped links

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Fixed-interval retry with an upper bound on attempts.
///
/// The interval does not grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Time between two attempts
    pub interval: Duration,
    /// Attempts allowed before giving up
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_retries: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
        }
    }

    /// When the next attempt is due after one made at `now`.
    pub fn next_attempt(&self, now: Instant) -> Instant {
        now + self.interval
    }

    /// Returns true once `attempts` have used up the budget.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_retries
    }
}
