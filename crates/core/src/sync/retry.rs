//! Bounded retry with exponential backoff for store operations.

use std::future::Future;
use std::time::Duration;

use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, timeout};

use crate::errors::{RetryClass, Retryable};

/// Default delay before the first retry.
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 500;
/// Default ceiling for any single backoff delay.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 2_000;

const MAX_EXPONENT: u32 = 16;

/// Exponential backoff schedule: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Add up to 20% random jitter on top of each delay.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_BACKOFF_MS,
            max_ms: DEFAULT_MAX_BACKOFF_MS,
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base_ms: base.as_millis() as u64,
            max_ms: max.as_millis() as u64,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay after `attempt` failed attempts (1-based), without jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let backoff = self.base_ms.saturating_mul(1_u64 << exp).min(self.max_ms);
        Duration::from_millis(backoff)
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if !self.jitter {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=(millis / 5).max(1));
        Duration::from_millis(millis.saturating_add(jitter))
    }
}

/// Successful result plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Last error after the executor gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    pub error: E,
    pub attempts: u32,
    /// Any attempt may have been applied despite failing.
    pub maybe_applied: bool,
}

impl<E: Retryable> RetryFailure<E> {
    /// True when retries ran out on a retryable error (as opposed to a
    /// terminal error that stopped the loop early).
    pub fn exhausted(&self) -> bool {
        self.error.retry_class() == RetryClass::Retryable
    }
}

/// Runs an operation up to a bounded number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryExecutor {
    backoff: BackoffPolicy,
    attempt_timeout: Option<Duration>,
}

impl RetryExecutor {
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            backoff,
            attempt_timeout: None,
        }
    }

    /// Bound every attempt; an elapsed attempt counts as a retryable timeout.
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Run `operation` at most `max_attempts` times (at least once).
    ///
    /// Only [`RetryClass::Retryable`] failures are retried; permanent and
    /// re-auth failures are returned on first occurrence.
    pub async fn run<T, E, F, Fut>(
        &self,
        max_attempts: u32,
        mut operation: F,
    ) -> Result<Retried<T>, RetryFailure<E>>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 0u32;
        let mut maybe_applied = false;

        loop {
            attempt = attempt.saturating_add(1);
            let result = match self.attempt_timeout {
                Some(limit) => match timeout(limit, operation(attempt)).await {
                    Ok(result) => result,
                    Err(_) => Err(E::attempt_timed_out(limit)),
                },
                None => operation(attempt).await,
            };

            let error = match result {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts: attempt,
                    })
                }
                Err(error) => error,
            };
            maybe_applied |= error.may_have_applied();

            if error.retry_class() != RetryClass::Retryable || attempt >= max_attempts {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    maybe_applied,
                });
            }

            let backoff = self.backoff.delay_with_jitter(attempt);
            debug!(
                "Retry attempt {}/{} in {} ms after: {}",
                attempt + 1,
                max_attempts,
                backoff.as_millis(),
                error
            );
            sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{StoreError, TransientKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryExecutor {
        RetryExecutor::new(BackoffPolicy::new(
            Duration::from_millis(1),
            Duration::from_millis(4),
        ))
    }

    fn offline() -> StoreError {
        StoreError::transient(TransientKind::Connectivity, "offline")
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(90), Duration::from_millis(2_000));
    }

    #[test]
    fn backoff_schedule_is_monotonic() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (1..10).map(|n| policy.delay_for(n)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = BackoffPolicy::default().with_jitter();
        for attempt in 1..5 {
            let base = policy.delay_for(attempt);
            let jittered = policy.delay_with_jitter(attempt);
            assert!(jittered >= base);
            assert!(jittered <= base + base / 5 + Duration::from_millis(1));
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result = fast()
            .run(3, move |_| async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(offline())
                } else {
                    Ok("done")
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(result.value, "done");
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn returns_last_error_when_exhausted() {
        let calls = AtomicU32::new(0);
        let failure = fast()
            .run(3, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err::<(), _>(StoreError::transient(
                        TransientKind::Server,
                        format!("attempt {}", attempt),
                    ))
                }
            })
            .await
            .expect_err("all attempts fail");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert!(failure.exhausted());
        assert_eq!(
            failure.error,
            StoreError::transient(TransientKind::Server, "attempt 3")
        );
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let failure = fast()
            .run(5, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(StoreError::unauthorized("expired")) }
            })
            .await
            .expect_err("terminal");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted());
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let _ = fast()
            .run(0, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(offline()) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_retry() {
        let calls = AtomicU32::new(0);
        let failure = fast()
            .with_attempt_timeout(Duration::from_millis(10))
            .run(2, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    sleep(Duration::from_secs(5)).await;
                    Ok::<_, StoreError>(())
                }
            })
            .await
            .expect_err("both attempts time out");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(failure.error.outcome_unknown());
        assert!(failure.maybe_applied);
    }

    #[tokio::test]
    async fn earlier_timeout_keeps_outcome_unknown() {
        let failure = fast()
            .with_attempt_timeout(Duration::from_millis(10))
            .run(2, |attempt| async move {
                if attempt == 1 {
                    sleep(Duration::from_secs(5)).await;
                }
                Err::<(), _>(StoreError::transient(TransientKind::Connectivity, "offline"))
            })
            .await
            .expect_err("both attempts fail");
        assert_eq!(failure.attempts, 2);
        assert!(!failure.error.outcome_unknown());
        assert!(failure.maybe_applied);
    }
}
