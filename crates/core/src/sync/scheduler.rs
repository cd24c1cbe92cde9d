//! Reconcile triggers and background cadence.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::RECONCILE_INTERVAL_SECS;

/// Maximum jitter (milliseconds) added to each periodic reconcile interval.
pub const RECONCILE_INTERVAL_JITTER_MS: u64 = 5_000;

/// Why a reconcile pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileTrigger {
    AppStart,
    NetworkRestored,
    ViewTransition,
    Periodic,
    Manual,
}

impl fmt::Display for ReconcileTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AppStart => "app_start",
            Self::NetworkRestored => "network_restored",
            Self::ViewTransition => "view_transition",
            Self::Periodic => "periodic",
            Self::Manual => "manual",
        };
        f.write_str(label)
    }
}

pub fn default_reconcile_interval() -> Duration {
    Duration::from_secs(RECONCILE_INTERVAL_SECS)
}

/// Interval plus jitter bounded by a tenth of the interval and
/// [`RECONCILE_INTERVAL_JITTER_MS`].
pub fn next_reconcile_delay(interval: Duration) -> Duration {
    use rand::Rng;

    let base_ms = interval.as_millis() as u64;
    let bound = (base_ms / 10).min(RECONCILE_INTERVAL_JITTER_MS);
    if bound == 0 {
        return interval;
    }
    let jitter = rand::thread_rng().gen_range(0..=bound);
    Duration::from_millis(base_ms.saturating_add(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_labels_are_snake_case() {
        assert_eq!(ReconcileTrigger::NetworkRestored.to_string(), "network_restored");
        assert_eq!(
            serde_json::to_string(&ReconcileTrigger::ViewTransition).unwrap(),
            "\"view_transition\""
        );
    }

    #[test]
    fn jitter_is_bounded() {
        let interval = default_reconcile_interval();
        for _ in 0..20 {
            let delay = next_reconcile_delay(interval);
            assert!(delay >= interval);
            assert!(delay <= interval + Duration::from_millis(RECONCILE_INTERVAL_JITTER_MS));
        }
        assert_eq!(
            next_reconcile_delay(Duration::from_millis(5)),
            Duration::from_millis(5)
        );
    }
}
