//! Duplicate scan suppression.
//!
//! Badge readers often report the same card several times while it is held
//! against the antenna. A scan is dropped when the same identifier was
//! admitted less than the minimum interval ago.

use crate::Timestamp;
use std::collections::HashMap;

/// Per-identifier duplicate filter.
#[derive(Debug, Clone)]
pub struct ScanDebouncer {
    min_interval_ms: u64,
    last_admitted: HashMap<String, Timestamp>,
}

impl ScanDebouncer {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            min_interval_ms,
            last_admitted: HashMap::new(),
        }
    }

    /// Decide whether a scan should be recorded. Admitted scans restart the
    /// suppression window for their identifier.
    pub fn admit(&mut self, identifier: &str, at: Timestamp) -> bool {
        if self.is_repeat(identifier, at) {
            return false;
        }
        self.record(identifier, at);
        true
    }

    /// Whether `identifier` was recorded less than the minimum interval
    /// before `at`. Does not change any window.
    pub fn is_repeat(&self, identifier: &str, at: Timestamp) -> bool {
        if self.min_interval_ms == 0 {
            return false;
        }
        matches!(
            self.last_admitted.get(identifier),
            Some(&last) if at >= last && at - last < self.min_interval_ms
        )
    }

    /// Start the suppression window for `identifier` at `at`.
    pub fn record(&mut self, identifier: &str, at: Timestamp) {
        if self.min_interval_ms == 0 {
            return;
        }
        self.prune(at);
        self.last_admitted.insert(identifier.to_string(), at);
    }

    /// Number of identifiers currently inside a suppression window.
    pub fn tracked(&self) -> usize {
        self.last_admitted.len()
    }

    fn prune(&mut self, now: Timestamp) {
        let window = self.min_interval_ms;
        self.last_admitted
            .retain(|_, last| now < *last || now - *last < window);
    }
}
