//! Tests for the HTTP integration layer

use super::*;
use crate::auth::{AuthConfig, Authenticator};
use crate::error::{Error, ErrorKind};
use crate::types::{BackoffType, HealthStatus};
use reqwest::{Method, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_case::test_case;
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_client(base_url: &str, attempts: u32) -> IntegrationClient {
    let config = HttpClientConfig::builder()
        .base_url(base_url)
        .provider("crm")
        .max_attempts(attempts)
        .backoff(
            BackoffType::Constant,
            Duration::from_millis(10),
            Duration::from_millis(50),
        )
        .no_rate_limit()
        .build();
    IntegrationClient::new(config).unwrap()
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_http_client_config_default() {
    let config = HttpClientConfig::default();
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.base_url.is_none());
    assert!(config.rate_limit.is_some());
}

#[test]
fn test_http_client_config_builder() {
    let config = HttpClientConfig::builder()
        .base_url("https://api.example.com")
        .provider("billing")
        .timeout(Duration::from_secs(60))
        .max_attempts(5)
        .backoff(
            BackoffType::Linear,
            Duration::from_millis(200),
            Duration::from_secs(30),
        )
        .header("X-Custom", "value")
        .user_agent("test-agent/1.0")
        .health_path("/status")
        .build();

    assert_eq!(config.base_url, Some("https://api.example.com".to_string()));
    assert_eq!(config.provider, "billing");
    assert_eq!(config.timeout, Duration::from_secs(60));
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.backoff_type, BackoffType::Linear);
    assert_eq!(config.retry.base_delay, Duration::from_millis(200));
    assert_eq!(config.retry.max_delay, Duration::from_secs(30));
    assert_eq!(
        config.default_headers.get("X-Custom"),
        Some(&"value".to_string())
    );
    assert_eq!(config.health_path.as_deref(), Some("/status"));
}

#[test]
fn test_request_config_builder() {
    let config = RequestConfig::new()
        .query("page", "1")
        .query("limit", "10")
        .header("X-Request-Id", "abc123")
        .json(serde_json::json!({"key": "value"}))
        .timeout(Duration::from_secs(10))
        .attempts(2)
        .correlation_id("corr-1");

    assert_eq!(config.query.len(), 2);
    assert_eq!(
        config.headers.get("X-Request-Id"),
        Some(&"abc123".to_string())
    );
    assert!(config.body.is_some());
    assert_eq!(config.timeout, Some(Duration::from_secs(10)));
    assert_eq!(config.max_attempts, Some(2));
    assert_eq!(config.correlation_id.as_deref(), Some("corr-1"));
}

#[test]
fn test_missing_base_url_fails_fast() {
    let err = IntegrationClient::new(HttpClientConfig::default()).unwrap_err();
    assert!(matches!(err, Error::MissingConfigField { ref field } if field == "base_url"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_invalid_base_url_fails_fast() {
    let config = HttpClientConfig::builder().base_url("not a url").build();
    let err = IntegrationClient::new(config).unwrap_err();
    assert!(matches!(err, Error::InvalidConfigValue { .. }));

    let config = HttpClientConfig::builder().base_url("ftp://files.example.com").build();
    assert!(IntegrationClient::new(config).is_err());
}

#[test]
fn test_zero_rate_limit_fails_fast() {
    let config = HttpClientConfig::builder()
        .base_url("https://api.example.com")
        .rate_limit(RateLimiterConfig::per_minute(0))
        .build();
    let err = IntegrationClient::new(config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_client_debug_hides_auth_details() {
    let config = HttpClientConfig::builder()
        .base_url("https://api.example.com")
        .provider("crm")
        .build();
    let client = IntegrationClient::with_auth(
        config,
        Arc::new(Authenticator::new(AuthConfig::Bearer {
            token: "super-secret".to_string(),
        })),
    )
    .unwrap();

    let debug_str = format!("{client:?}");
    assert!(debug_str.contains("IntegrationClient"));
    assert!(debug_str.contains("bearer"));
    assert!(!debug_str.contains("super-secret"));
}

// ============================================================================
// Classification
// ============================================================================

#[test_case(401, ErrorKind::Authentication, false ; "unauthorized")]
#[test_case(403, ErrorKind::Authentication, false ; "forbidden")]
#[test_case(429, ErrorKind::RateLimit, false ; "too many requests")]
#[test_case(400, ErrorKind::Integration, false ; "bad request")]
#[test_case(404, ErrorKind::Integration, false ; "not found")]
#[test_case(500, ErrorKind::Integration, true ; "internal error")]
#[test_case(502, ErrorKind::Integration, true ; "bad gateway")]
#[test_case(503, ErrorKind::Integration, true ; "unavailable")]
fn test_classify_status(status: u16, kind: ErrorKind, retryable: bool) {
    let status = StatusCode::from_u16(status).unwrap();
    let err = classify_status(status, "body".to_string(), None);
    assert_eq!(err.kind(), kind);
    assert_eq!(err.is_retryable(), retryable);
}

#[test]
fn test_classify_429_keeps_retry_after() {
    let err = classify_status(StatusCode::TOO_MANY_REQUESTS, String::new(), Some(30));
    assert!(matches!(
        err,
        Error::RateLimited {
            retry_after_seconds: Some(30)
        }
    ));
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_get_json_with_query_and_headers() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/contacts"))
        .and(query_param("limit", "10"))
        .and(header("X-Request-Id", "req-456"))
        .and(header("X-API-Version", "2024-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": 1, "email": "a@example.com"}]
        })))
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .header("X-API-Version", "2024-01")
        .no_rate_limit()
        .build();
    let client = IntegrationClient::new(config).unwrap();

    let data: serde_json::Value = client
        .get_json_with_config(
            "/api/contacts",
            RequestConfig::new()
                .query("limit", "10")
                .header("X-Request-Id", "req-456"),
        )
        .await
        .unwrap();

    assert_eq!(data["data"][0]["email"], "a@example.com");
}

#[tokio::test]
async fn test_post_with_auth_provider() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/items"))
        .and(header("Authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 123})))
        .mount(&mock_server)
        .await;

    let mut client = fast_client(&mock_server.uri(), 1);
    client.set_auth(Arc::new(Authenticator::new(AuthConfig::Bearer {
        token: "tok".to_string(),
    })));

    let response = client
        .post("/api/items", serde_json::json!({"name": "test"}))
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_correlation_id_shared_across_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/flaky"))
        .and(header_exists(CORRELATION_HEADER))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 3);
    let response = client.get("/api/flaky").await.unwrap();
    assert_eq!(response.status(), 200);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let ids: HashSet<String> = requests
        .iter()
        .map(|r| {
            r.headers
                .get(CORRELATION_HEADER)
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(ids.len(), 1);

    // A second logical call gets a fresh id
    client.get("/api/flaky").await.unwrap();
    let requests = mock_server.received_requests().await.unwrap();
    let last = requests[3].headers.get(CORRELATION_HEADER).unwrap();
    assert!(!ids.contains(last.to_str().unwrap()));
}

#[tokio::test]
async fn test_server_error_exhausts_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/always-fail"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 3);
    let err = client.get("/api/always-fail").await.unwrap_err();

    assert!(matches!(err, Error::HttpStatus { status: 500, ref body } if body == "Server error"));
}

#[test_case(401 ; "unauthorized")]
#[test_case(403 ; "forbidden")]
#[test_case(404 ; "not found")]
#[test_case(422 ; "unprocessable")]
#[tokio::test]
async fn test_client_errors_are_not_retried(status: u16) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/resource"))
        .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 3);
    let err = client.get("/api/resource").await.unwrap_err();
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_429_surfaces_rate_limited_without_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/limited"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "17")
                .set_body_string("Rate limited"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 3);
    let err = client.get("/api/limited").await.unwrap_err();

    assert!(matches!(
        err,
        Error::RateLimited {
            retry_after_seconds: Some(17)
        }
    ));
    assert_eq!(err.kind(), ErrorKind::RateLimit);
}

#[tokio::test]
async fn test_401_invalidates_cached_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "stale",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;

    let mut client = fast_client(&mock_server.uri(), 3);
    client.set_auth(Arc::new(Authenticator::new(
        AuthConfig::Oauth2ClientCredentials {
            token_url: format!("{}/oauth/token", mock_server.uri()),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            scopes: vec![],
        },
    )));

    for _ in 0..2 {
        let err = client.get("/api/me").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }
}

#[tokio::test]
async fn test_transport_failure_is_retryable_integration_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = fast_client(&format!("http://127.0.0.1:{port}"), 2);
    let err = client.get("/api/anything").await.unwrap_err();

    assert!(matches!(err, Error::Http(_)));
    assert!(err.is_retryable());
    assert_eq!(err.kind(), ErrorKind::Integration);
}

#[tokio::test]
async fn test_request_timeout_is_classified() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 1);
    let err = client
        .get_with_config(
            "/api/slow",
            RequestConfig::new().timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout { timeout_ms: 50 }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_deadline_bounds_the_whole_call() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 3);
    let started = std::time::Instant::now();
    let err = client
        .request(
            Method::GET,
            "/api/slow",
            RequestConfig::new().deadline_in(Duration::from_millis(150)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded { .. }));
    assert!(!err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_full_url_bypasses_base() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/test"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let client = fast_client("https://unused.example.com", 1);
    let response = client
        .get(&format!("{}/api/test", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_requests_pass_through_rate_limiter() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/data"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .rate_limit(RateLimiterConfig::per_minute(100))
        .build();
    let client = IntegrationClient::new(config).unwrap();

    for _ in 0..3 {
        client.get("/api/data").await.unwrap();
    }

    let limiter = client.rate_limiter().unwrap();
    assert_eq!(limiter.remaining(), 97);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_check_healthy() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;

    let config = HttpClientConfig::builder()
        .base_url(mock_server.uri())
        .provider("crm")
        .health_path("/status")
        .no_rate_limit()
        .build();
    let client = IntegrationClient::new(config).unwrap();

    let report = client.health_check().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.integration, "crm");
    assert!(report.details.is_none());
}

#[tokio::test]
async fn test_health_check_never_fails() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = fast_client(&mock_server.uri(), 3);
    let report = client.health_check().await;

    assert_eq!(report.status, HealthStatus::Unhealthy);
    assert!(report.details.unwrap().contains("503"));
}
