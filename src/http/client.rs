//! Integration client
//!
//! One authenticated call against one source. Every attempt goes through:
//! - Rate limiter admission
//! - Auth injection (pluggable via `AuthProvider`)
//! - Correlation id header, shared by all attempts of one logical call
//! - Failure classification into the crate error taxonomy
//!
//! Attempts are driven by `RetryManager::execute` with `Error::is_retryable`.

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use super::retry::{RetryManager, RetryPolicy};
use crate::auth::AuthProvider;
use crate::error::{Error, Result};
use crate::types::{BackoffType, HealthReport};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Header carrying the per-call correlation id
pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Longest response body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// Configuration for the integration client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for all requests
    pub base_url: Option<String>,
    /// Provider name used in logs and health reports
    pub provider: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Rate limiter configuration
    pub rate_limit: Option<RateLimiterConfig>,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
    /// Path probed by `health_check`, relative to the base URL
    pub health_path: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            provider: "unknown".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            rate_limit: Some(RateLimiterConfig::default()),
            default_headers: HashMap::new(),
            user_agent: format!("source-unify/{}", env!("CARGO_PKG_VERSION")),
            health_path: None,
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for integration client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the provider name
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.config.provider = provider.into();
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set total attempts per call
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, backoff_type: BackoffType, base: Duration, max: Duration) -> Self {
        self.config.retry.backoff_type = backoff_type;
        self.config.retry.base_delay = base;
        self.config.retry.max_delay = max;
        self
    }

    /// Replace the whole retry policy
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set rate limiter
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    /// Disable rate limiting
    pub fn no_rate_limit(mut self) -> Self {
        self.config.rate_limit = None;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Set the health probe path
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.config.health_path = Some(path.into());
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body (JSON)
    pub body: Option<Value>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
    /// Override total attempts for this request
    pub max_attempts: Option<u32>,
    /// Give up on the whole call (all attempts) at this instant
    pub deadline: Option<Instant>,
    /// Reuse a caller-supplied correlation id
    pub correlation_id: Option<String>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set total attempts
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Set an absolute deadline
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set a deadline relative to now
    #[must_use]
    pub fn deadline_in(self, budget: Duration) -> Self {
        self.deadline(Instant::now() + budget)
    }

    /// Set the correlation id
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Authenticated, rate-limited, retrying HTTP client for one source
pub struct IntegrationClient {
    client: Client,
    config: HttpClientConfig,
    base_url: Url,
    auth: Option<Arc<dyn AuthProvider>>,
    rate_limiter: Option<RateLimiter>,
    retry: RetryManager,
}

impl IntegrationClient {
    /// Create a new client
    ///
    /// Fails with a configuration error when the base URL is missing or
    /// invalid, or when the rate limit or retry policy is unusable.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let raw_base = config
            .base_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| Error::missing_field("base_url"))?;
        let base_url = Url::parse(raw_base)
            .map_err(|e| Error::invalid_value("base_url", format!("{raw_base}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::invalid_value(
                "base_url",
                format!("unsupported scheme '{}'", base_url.scheme()),
            ));
        }

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new).transpose()?;
        let retry = RetryManager::new(config.retry.clone())?;

        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            base_url,
            auth: None,
            rate_limiter,
            retry,
        })
    }

    /// Create a client with authentication
    pub fn with_auth(config: HttpClientConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let mut client = Self::new(config)?;
        client.auth = Some(auth);
        Ok(client)
    }

    /// Set the auth provider
    pub fn set_auth(&mut self, auth: Arc<dyn AuthProvider>) {
        self.auth = Some(auth);
    }

    /// Share an existing limiter (one window per source across clients)
    pub fn set_rate_limiter(&mut self, limiter: RateLimiter) {
        self.rate_limiter = Some(limiter);
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Provider name
    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// Resolved base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The rate limiter, when enabled
    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.rate_limiter.as_ref()
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path, RequestConfig::default())
            .await
    }

    /// Make a GET request with config
    pub async fn get_with_config(&self, path: &str, config: RequestConfig) -> Result<Response> {
        self.request(Method::GET, path, config).await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: Value) -> Result<Response> {
        self.request(Method::POST, path, RequestConfig::default().json(body))
            .await
    }

    /// Execute one logical call, with retries, under the optional deadline
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        config: RequestConfig,
    ) -> Result<Response> {
        let url = self.build_url(path)?;
        let correlation_id = config
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let retry = match config.max_attempts {
            Some(attempts) => self.retry.with_max_attempts(attempts),
            None => self.retry.clone(),
        };

        let call = retry.execute(
            |attempt| self.send_once(&method, &url, &config, &correlation_id, attempt),
            Error::is_retryable,
        );

        match config.deadline {
            Some(deadline) => {
                let started = Instant::now();
                tokio::time::timeout_at(deadline, call).await.map_err(|_| {
                    Error::deadline(format!("{method} {}", url.path()), started.elapsed())
                })?
            }
            None => call.await,
        }
    }

    /// Make a request and parse JSON response
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        config: RequestConfig,
    ) -> Result<T> {
        let response = self.request(method, path, config).await?;
        let json: T = response.json().await.map_err(Error::Http)?;
        Ok(json)
    }

    /// Make a GET request and parse JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request_json(Method::GET, path, RequestConfig::default())
            .await
    }

    /// Make a GET request with config and parse JSON response
    pub async fn get_json_with_config<T: DeserializeOwned>(
        &self,
        path: &str,
        config: RequestConfig,
    ) -> Result<T> {
        self.request_json(Method::GET, path, config).await
    }

    /// Lightweight probe against the health path; never fails
    pub async fn health_check(&self) -> HealthReport {
        let path = self.config.health_path.clone().unwrap_or_default();
        let config = RequestConfig::new().attempts(1);

        match self.request(Method::GET, &path, config).await {
            Ok(_) => HealthReport::healthy(&self.config.provider),
            Err(e) => {
                warn!(provider = %self.config.provider, error = %e, "Health probe failed");
                HealthReport::unhealthy(&self.config.provider, e.to_string())
            }
        }
    }

    /// Check if rate limiting is enabled
    pub fn has_rate_limiter(&self) -> bool {
        self.rate_limiter.is_some()
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        config: &RequestConfig,
        correlation_id: &str,
        attempt: u32,
    ) -> Result<Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.acquire().await;
        }

        let timeout = config.timeout.unwrap_or(self.config.timeout);
        let mut req = self
            .client
            .request(method.clone(), url.clone())
            .timeout(timeout);

        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }
        for (key, value) in &config.headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if !config.query.is_empty() {
            req = req.query(&config.query);
        }
        if let Some(body) = &config.body {
            req = req.json(body);
        }
        req = req.header(CORRELATION_HEADER, correlation_id);

        if let Some(auth) = &self.auth {
            req = auth.apply(req).await?;
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                Error::Http(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(
                provider = %self.config.provider,
                correlation_id,
                attempt,
                status = status.as_u16(),
                "{method} {} succeeded",
                url.path()
            );
            return Ok(response);
        }

        let retry_after = extract_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        let err = classify_status(status, truncate_body(body), retry_after);

        if let (Error::Authentication { .. }, Some(auth)) = (&err, &self.auth) {
            // Force a fresh token exchange on the next call
            auth.invalidate().await;
        }

        Err(err)
    }

    /// Build full URL from path
    fn build_url(&self, path: &str) -> Result<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Ok(Url::parse(path)?);
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            return Ok(self.base_url.clone());
        }
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }
}

impl std::fmt::Debug for IntegrationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationClient")
            .field("provider", &self.config.provider)
            .field("base_url", &self.base_url.as_str())
            .field("auth", &self.auth.as_ref().map(|a| a.scheme()))
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Map a non-success status onto the error taxonomy
///
/// 401/403 are authentication failures, 429 is provider throttling, and every
/// other status is an `HttpStatus` whose retryability depends on its class.
pub fn classify_status(status: StatusCode, body: String, retry_after: Option<u64>) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::authentication(status.as_u16(), body)
        }
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
            retry_after_seconds: retry_after,
        },
        _ => Error::http_status(status.as_u16(), body),
    }
}

/// Extract retry-after header value (delta-seconds form)
fn extract_retry_after(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}
