//! Coordinator policy and scheduling constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::retry::{BackoffPolicy, RetryExecutor};

/// Total attempts (first try + retries) for one authoritative write.
pub const DEFAULT_WRITE_ATTEMPTS: u32 = 3;

/// Read-backs after a write that reported success without the location.
pub const DEFAULT_VERIFY_ATTEMPTS: u32 = 3;

/// Per-attempt network timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 5;

/// Background reconcile cadence in seconds.
pub const RECONCILE_INTERVAL_SECS: u64 = 45;

/// Number of locations on the default trail.
pub const DEFAULT_TOTAL_LOCATIONS: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// Trail cardinality, used for optimistic records before the first fetch.
    pub total_locations: u64,
    pub write_attempts: u32,
    pub verify_attempts: u32,
    pub backoff: BackoffPolicy,
    pub attempt_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            total_locations: DEFAULT_TOTAL_LOCATIONS,
            write_attempts: DEFAULT_WRITE_ATTEMPTS,
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            backoff: BackoffPolicy::default(),
            attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_SECS * 1_000,
        }
    }
}

impl SyncConfig {
    pub fn with_total_locations(mut self, total_locations: u64) -> Self {
        self.total_locations = total_locations;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout_ms = limit.as_millis() as u64;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub(crate) fn retry_executor(&self) -> RetryExecutor {
        RetryExecutor::new(self.backoff).with_attempt_timeout(self.attempt_timeout())
    }
}
