//! Sync scheduling backoff.
//!
//! Consecutive failed cycles stretch the scheduled interval by doubling,
//! up to a ceiling. A fully successful cycle snaps back to the base interval.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff over the scheduled sync interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    /// Failures tolerated before the interval starts growing
    threshold: u32,
    consecutive_failures: u32,
}

impl Backoff {
    /// Create a backoff policy. A ceiling below `base` is raised to `base`,
    /// and a zero threshold is treated as one.
    pub fn new(base: Duration, ceiling: Duration, threshold: u32) -> Self {
        Self {
            base,
            ceiling: ceiling.max(base),
            threshold: threshold.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Change the base interval, keeping the failure streak.
    pub fn set_base(&mut self, base: Duration) {
        self.base = base;
        self.ceiling = self.ceiling.max(base);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Interval until the next scheduled cycle.
    pub fn next_interval(&self) -> Duration {
        if self.consecutive_failures < self.threshold {
            return self.base;
        }

        let exponent = (self.consecutive_failures - self.threshold + 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.ceiling, |interval| interval.min(self.ceiling))
    }
}
