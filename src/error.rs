//! Error types for source-unify
//!
//! This module defines the error hierarchy for the entire crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Every variant maps onto one [`ErrorKind`] of the integration taxonomy, and
//! [`Error::is_retryable`] is the single retry predicate used by the HTTP layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The main error type for source-unify
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Credential '{reference}' could not be resolved: {message}")]
    Credential { reference: String, message: String },

    // ============================================================================
    // Authentication Errors
    // ============================================================================
    #[error("Authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("Token refresh failed: {message}")]
    TokenRefresh { message: String },

    #[error("JWT generation failed: {message}")]
    JwtGeneration { message: String },

    // ============================================================================
    // HTTP Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited by provider{}", retry_after_hint(.retry_after_seconds))]
    RateLimited { retry_after_seconds: Option<u64> },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Deadline exceeded for {operation} after {elapsed_ms}ms")]
    DeadlineExceeded { operation: String, elapsed_ms: u64 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // Discovery / Data Errors
    // ============================================================================
    #[error("JSONPath error: {message}")]
    JsonPath { message: String },

    #[error("Stream '{stream}' not found in catalog")]
    StreamNotFound { stream: String },

    #[error("Discovery failed for stream '{stream}': {message}")]
    Discovery { stream: String, message: String },

    #[error("Schema inference failed: {message}")]
    SchemaInference { message: String },

    #[error("Unknown entity: {entity}")]
    UnknownEntity { entity: String },

    #[error("Record rejected for '{entity}': {errors:?}")]
    RecordRejected { entity: String, errors: Vec<String> },

    // ============================================================================
    // Storage Errors
    // ============================================================================
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

fn retry_after_hint(retry_after_seconds: &Option<u64>) -> String {
    match retry_after_seconds {
        Some(secs) => format!(", retry after {secs}s"),
        None => String::new(),
    }
}

/// Coarse failure taxonomy exposed to callers and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credentials rejected by the provider (401/403)
    Authentication,
    /// Provider throttled the request (429)
    RateLimit,
    /// Record or schema shape problem
    Validation,
    /// Construction-time misconfiguration
    Configuration,
    /// Transport or non-auth HTTP failure
    Integration,
    /// Per-request timeout or caller deadline
    Timeout,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Validation => "validation",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Integration => "integration",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn authentication(status: u16, message: impl Into<String>) -> Self {
        Self::Authentication {
            status,
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a deadline error
    pub fn deadline(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Create a JSONPath error
    pub fn json_path(message: impl Into<String>) -> Self {
        Self::JsonPath {
            message: message.into(),
        }
    }

    /// Create a per-stream discovery error
    pub fn discovery(stream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Discovery {
            stream: stream.into(),
            message: message.into(),
        }
    }

    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// Map this error onto the integration taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authentication { .. } | Error::TokenRefresh { .. } | Error::JwtGeneration { .. } => {
                ErrorKind::Authentication
            }
            Error::RateLimited { .. } => ErrorKind::RateLimit,
            Error::Timeout { .. } | Error::DeadlineExceeded { .. } => ErrorKind::Timeout,
            Error::Config { .. }
            | Error::MissingConfigField { .. }
            | Error::InvalidConfigValue { .. }
            | Error::YamlParse(_)
            | Error::Credential { .. }
            | Error::InvalidUrl(_)
            | Error::UnknownEntity { .. } => ErrorKind::Configuration,
            Error::JsonParse(_)
            | Error::JsonPath { .. }
            | Error::Discovery { .. }
            | Error::SchemaInference { .. }
            | Error::RecordRejected { .. } => ErrorKind::Validation,
            Error::Http(e) if e.is_timeout() => ErrorKind::Timeout,
            _ => ErrorKind::Integration,
        }
    }

    /// Check if this error is retryable
    ///
    /// Only transport faults and 5xx responses are retried. Authentication
    /// failures, provider throttling and caller deadlines are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_builder() && !e.is_decode(),
            Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Check if an HTTP status code is retryable
pub(crate) fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status)
}

/// Result type alias for source-unify
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
