//! Exponential retry backoff.

use crate::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Doubling backoff with an upper bound: `base, 2*base, 4*base, ... cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// Maximum delay
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before the next attempt after `attempts` failures.
    ///
    /// Zero attempts means no delay.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.cap)
    }

    /// Timestamp at which a mutation with `attempts` failures becomes eligible.
    pub fn next_attempt_at(&self, now: Timestamp, attempts: u32) -> Timestamp {
        let delay = u64::try_from(self.delay_for(attempts).as_millis()).unwrap_or(u64::MAX);
        now.saturating_add(delay)
    }
}
