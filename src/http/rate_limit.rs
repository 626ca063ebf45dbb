//! Rate limiting implementation
//!
//! Sliding-window admission control: at most `requests_per_window` requests
//! are admitted in any trailing `window`. One limiter is owned per source and
//! shared by every caller of that source's client.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Maximum number of requests admitted per window
    pub requests_per_window: u32,
    /// Length of the trailing window
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window: Duration::from_secs(60),
        }
    }
}

impl RateLimiterConfig {
    /// Create a new rate limiter config
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
        }
    }

    /// Create config for N requests per trailing minute
    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }
}

struct Inner {
    limit: usize,
    window: Duration,
    /// FIFO turnstile so acquirers are admitted in submission order
    gate: tokio::sync::Mutex<()>,
    /// Admission timestamps inside the trailing window, oldest first
    timestamps: Mutex<VecDeque<Instant>>,
}

/// Sliding-window rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config
    ///
    /// A zero limit or zero-length window would never admit anything and is
    /// rejected here rather than deadlocking the first caller.
    pub fn new(config: &RateLimiterConfig) -> Result<Self> {
        if config.requests_per_window == 0 {
            return Err(Error::invalid_value(
                "requests_per_window",
                "must be greater than zero",
            ));
        }
        if config.window.is_zero() {
            return Err(Error::invalid_value("window", "must be greater than zero"));
        }

        Ok(Self {
            inner: Arc::new(Inner {
                limit: config.requests_per_window as usize,
                window: config.window,
                gate: tokio::sync::Mutex::new(()),
                timestamps: Mutex::new(VecDeque::with_capacity(
                    config.requests_per_window as usize,
                )),
            }),
        })
    }

    /// Wait until a request may proceed, then record it
    ///
    /// The window is re-checked after every sleep. Dropping the future while
    /// it waits records nothing.
    pub async fn acquire(&self) {
        let _turn = self.inner.gate.lock().await;

        loop {
            let now = Instant::now();
            let wait = {
                let mut timestamps = self.lock_window();
                prune(&mut timestamps, now, self.inner.window);

                if timestamps.len() < self.inner.limit {
                    timestamps.push_back(now);
                    return;
                }

                timestamps.front().map_or(Duration::ZERO, |oldest| {
                    (*oldest + self.inner.window).saturating_duration_since(now)
                })
            };

            trace!(wait_ms = wait.as_millis() as u64, "Rate limit window full");
            sleep(wait).await;
        }
    }

    /// Wait for admission, giving up at `deadline`
    pub async fn acquire_until(&self, deadline: Instant) -> Result<()> {
        let started = Instant::now();
        tokio::time::timeout_at(deadline, self.acquire())
            .await
            .map_err(|_| Error::deadline("rate limiter admission", started.elapsed()))
    }

    /// Check if a request could be admitted right now, without recording it
    pub fn check(&self) -> bool {
        self.remaining() > 0
    }

    /// Current headroom in the trailing window
    pub fn remaining(&self) -> u32 {
        let now = Instant::now();
        let timestamps = self.lock_window();
        let used = timestamps
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.inner.window)
            .count();
        self.inner.limit.saturating_sub(used) as u32
    }

    /// Configured limit per window
    pub fn limit(&self) -> u32 {
        self.inner.limit as u32
    }

    /// Configured window length
    pub fn window(&self) -> Duration {
        self.inner.window
    }

    fn lock_window(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.inner
            .timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.inner.limit)
            .field("window", &self.inner.window)
            .finish_non_exhaustive()
    }
}

/// Drop timestamps that have left the trailing window
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = timestamps.front() {
        if now.saturating_duration_since(*oldest) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}
