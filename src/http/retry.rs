//! Bounded retry with backoff
//!
//! `RetryManager::execute` runs one logical operation up to `max_attempts`
//! times. The caller supplies the retry predicate; the last error is returned
//! unchanged so its kind survives for the caller's error handling.

use crate::error::{Error, Result};
use crate::types::BackoffType;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy for one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth of the delay between attempts
    pub backoff_type: BackoffType,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_type: BackoffType::Exponential,
        }
    }
}

/// Executes operations with bounded retries
#[derive(Debug, Clone)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    /// Create a retry manager, rejecting a policy that would never run the operation
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        if policy.max_attempts == 0 {
            return Err(Error::invalid_value(
                "max_attempts",
                "must be at least 1",
            ));
        }
        Ok(Self { policy })
    }

    /// Same policy with a different attempt budget (clamped to at least 1)
    #[must_use]
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            policy: RetryPolicy {
                max_attempts: max_attempts.max(1),
                ..self.policy.clone()
            },
        }
    }

    /// The active policy
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    ///
    /// Non-decreasing in `attempt` for every backoff type.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.policy.base_delay;
        let delay = match self.policy.backoff_type {
            BackoffType::Constant => base,
            BackoffType::Linear => base.saturating_mul(attempt),
            BackoffType::Exponential => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        delay.min(self.policy.max_delay)
    }

    /// Run `operation`, retrying failures accepted by `is_retryable`
    ///
    /// The operation receives the 1-based attempt number.
    pub async fn execute<T, F, Fut, P>(&self, mut operation: F, is_retryable: P) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable(&err) {
                        return Err(err);
                    }

                    let delay = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod retry_tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn manager(max_attempts: u32, backoff_type: BackoffType) -> RetryManager {
        RetryManager::new(RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_type,
        })
        .unwrap()
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = RetryManager::new(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfigValue { .. }));
    }

    #[test]
    fn test_exponential_backoff() {
        let retry = manager(5, BackoffType::Exponential);
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        for backoff_type in [
            BackoffType::Constant,
            BackoffType::Linear,
            BackoffType::Exponential,
        ] {
            let retry = manager(50, backoff_type);
            let mut previous = Duration::ZERO;
            for attempt in 1..50 {
                let delay = retry.backoff(attempt);
                assert!(delay >= previous, "{backoff_type:?} shrank at {attempt}");
                assert!(delay <= Duration::from_secs(10));
                previous = delay;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_retryable_stops_at_max_attempts() {
        let retry = manager(4, BackoffType::Exponential);
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::http_status(503, "unavailable")) }
                },
                |_| true,
            )
            .await;

        assert!(matches!(result, Err(Error::HttpStatus { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_retryable_runs_once() {
        let retry = manager(4, BackoffType::Exponential);
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry
            .execute(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::authentication(401, "expired")) }
                },
                |_| false,
            )
            .await;

        // Error identity is preserved
        assert!(matches!(result, Err(Error::Authentication { status: 401, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let retry = manager(3, BackoffType::Exponential);
        let start = Instant::now();

        let value = retry
            .execute(
                |attempt| async move {
                    if attempt < 3 {
                        Err(Error::http_status(500, ""))
                    } else {
                        Ok(attempt)
                    }
                },
                Error::is_retryable,
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
        // 100ms + 200ms of backoff
        assert!(start.elapsed() >= Duration::from_millis(300));
    }
}
