use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::backend::common::constants::DEFAULT_BREAKER_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub category: String,
    pub consecutive_failures: u32,
    pub threshold: u32,
    pub open: bool,
}

/// Counts consecutive failures per category. Once a category reaches the
/// threshold it is open: callers stop issuing automatic retries for it until
/// a success resets the count. Manual retries are never gated here.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_BREAKER_THRESHOLD)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Increments the category's count; returns whether it is now open.
    pub fn record_failure(&self, category: &str) -> bool {
        let mut failures = self.failures();
        let count = failures.entry(category.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        let open = *count >= self.threshold;
        if open && *count == self.threshold {
            warn!(
                category,
                consecutive_failures = *count,
                "circuit opened; automatic retries suspended"
            );
        }
        open
    }

    pub fn reset(&self, category: &str) {
        if let Some(previous) = self.failures().remove(category) {
            if previous >= self.threshold {
                info!(category, "circuit closed after a successful call");
            }
        }
    }

    pub fn is_open(&self, category: &str) -> bool {
        self.failure_count(category) >= self.threshold
    }

    pub fn failure_count(&self, category: &str) -> u32 {
        self.failures().get(category).copied().unwrap_or(0)
    }

    pub fn snapshot(&self, category: &str) -> BreakerSnapshot {
        let consecutive_failures = self.failure_count(category);
        BreakerSnapshot {
            category: category.to_string(),
            consecutive_failures,
            threshold: self.threshold,
            open: consecutive_failures >= self.threshold,
        }
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        match self.failures.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
