//! HTTP integration layer
//!
//! Resilient request execution against rate-limited, untrusted provider APIs.
//!
//! # Features
//!
//! - **Rate Limiting**: per-source sliding window with FIFO admission
//! - **Retries**: bounded attempts with constant, linear or exponential backoff
//! - **Classification**: provider failures mapped onto `ErrorKind`
//! - **Authentication**: pluggable through `auth::AuthProvider`
//! - **Health**: lightweight probe that never fails

mod client;
mod rate_limit;
mod retry;

pub use client::{
    classify_status, HttpClientConfig, HttpClientConfigBuilder, IntegrationClient, RequestConfig,
    CORRELATION_HEADER,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryManager, RetryPolicy};

#[cfg(test)]
mod tests;
