//! Source configuration and runtime state

use crate::auth::{AuthConfig, Location};
use crate::error::{Error, Result};
use crate::http::{RateLimiterConfig, RetryPolicy};
use crate::schema::JsonTypeOrArray;
use crate::types::{BackoffType, HealthReport, HealthStatus, JwtAlgorithm, SyncMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ============================================================================
// Source Configuration
// ============================================================================

/// How a source is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// REST API reached through the integration client
    #[default]
    Rest,
    /// Relational database attached through DuckDB
    Database,
}

/// Database engine for database sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseEngine {
    #[default]
    Duckdb,
    Sqlite,
    Postgres,
    Mysql,
}

/// Connection settings for database sources
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Engine to attach
    #[serde(default)]
    pub engine: DatabaseEngine,
    /// File path or connection string; the resolved credential wins when set
    #[serde(default)]
    pub path: Option<String>,
}

/// Auth scheme as declared in config; the secret comes from `credential_ref`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthSpec {
    #[default]
    None,
    ApiKey {
        #[serde(default)]
        location: Location,
        #[serde(default)]
        header_name: Option<String>,
        #[serde(default)]
        query_param: Option<String>,
        #[serde(default)]
        prefix: Option<String>,
    },
    /// Username from config (or the credential itself when absent)
    Basic {
        #[serde(default)]
        username: Option<String>,
    },
    Bearer,
    Oauth2ClientCredentials {
        token_url: String,
        client_id: String,
        #[serde(default)]
        scopes: Vec<String>,
    },
    /// Credential is the refresh token captured out of band
    Oauth2Refresh {
        token_url: String,
        client_id: String,
        client_secret_ref: String,
    },
    /// Credential is the PEM private key
    Jwt {
        issuer: String,
        #[serde(default)]
        subject: Option<String>,
        audience: String,
        #[serde(default)]
        algorithm: JwtAlgorithm,
        #[serde(default = "default_token_lifetime")]
        token_lifetime_seconds: u64,
        #[serde(default)]
        token_url: Option<String>,
    },
    /// Credential sent verbatim in a provider-specific header
    CustomHeader { name: String },
}

fn default_token_lifetime() -> u64 {
    3600
}

impl AuthSpec {
    /// Whether this scheme obtains tokens through an OAuth exchange
    pub fn is_oauth(&self) -> bool {
        matches!(
            self,
            AuthSpec::Oauth2ClientCredentials { .. } | AuthSpec::Oauth2Refresh { .. }
        )
    }

    /// Build the runtime auth config from resolved secrets
    ///
    /// `secret` is the resolved `credential_ref`; `lookup` resolves any
    /// additional references the scheme names.
    pub fn resolve(
        &self,
        secret: Option<String>,
        lookup: impl Fn(&str) -> Result<String>,
    ) -> Result<AuthConfig> {
        if matches!(self, AuthSpec::None) {
            return Ok(AuthConfig::None);
        }
        let secret = secret.ok_or_else(|| Error::missing_field("credential_ref"))?;

        Ok(match self {
            AuthSpec::None => AuthConfig::None,
            AuthSpec::ApiKey {
                location,
                header_name,
                query_param,
                prefix,
            } => AuthConfig::ApiKey {
                location: *location,
                header_name: header_name.clone(),
                query_param: query_param.clone(),
                prefix: prefix.clone(),
                value: secret,
            },
            AuthSpec::Basic { username } => match username {
                Some(username) => AuthConfig::Basic {
                    username: username.clone(),
                    password: secret,
                },
                None => AuthConfig::Basic {
                    username: secret,
                    password: String::new(),
                },
            },
            AuthSpec::Bearer => AuthConfig::Bearer { token: secret },
            AuthSpec::Oauth2ClientCredentials {
                token_url,
                client_id,
                scopes,
            } => AuthConfig::Oauth2ClientCredentials {
                token_url: token_url.clone(),
                client_id: client_id.clone(),
                client_secret: secret,
                scopes: scopes.clone(),
            },
            AuthSpec::Oauth2Refresh {
                token_url,
                client_id,
                client_secret_ref,
            } => AuthConfig::Oauth2Refresh {
                token_url: token_url.clone(),
                client_id: client_id.clone(),
                client_secret: lookup(client_secret_ref)?,
                refresh_token: secret,
            },
            AuthSpec::Jwt {
                issuer,
                subject,
                audience,
                algorithm,
                token_lifetime_seconds,
                token_url,
            } => AuthConfig::Jwt {
                issuer: issuer.clone(),
                subject: subject.clone(),
                audience: audience.clone(),
                private_key: secret,
                algorithm: *algorithm,
                token_lifetime_seconds: *token_lifetime_seconds,
                token_url: token_url.clone(),
            },
            AuthSpec::CustomHeader { name } => {
                let mut headers = std::collections::HashMap::new();
                headers.insert(name.clone(), secret);
                AuthConfig::CustomHeaders { headers }
            }
        })
    }
}

/// Rate limit as declared in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub requests_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window_secs: default_window_secs(),
        }
    }
}

impl From<RateLimitSettings> for RateLimiterConfig {
    fn from(settings: RateLimitSettings) -> Self {
        RateLimiterConfig::new(
            settings.requests_per_window,
            Duration::from_secs(settings.window_secs),
        )
    }
}

/// Retry policy as declared in config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub backoff: BackoffType,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffType::default(),
        }
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts,
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            backoff_type: settings.backoff,
        }
    }
}

/// A field declared in a stream's catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredField {
    pub name: String,
    #[serde(rename = "type")]
    pub json_type: JsonTypeOrArray,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// One stream exposed by a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name (table name for database sources)
    pub name: String,
    /// Namespace (database schema for database sources)
    #[serde(default)]
    pub namespace: Option<String>,
    /// REST path, relative to the base URL; defaults to `/{name}`
    #[serde(default)]
    pub path: Option<String>,
    /// JSONPath selecting records in the response body
    #[serde(default)]
    pub records_path: Option<String>,
    /// Query parameter carrying the sample size
    #[serde(default)]
    pub limit_param: Option<String>,
    /// Extra query parameters
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub sync_modes: Vec<SyncMode>,
    /// Declared fields; empty means "infer from samples"
    #[serde(default)]
    pub fields: Vec<DeclaredField>,
}

impl StreamConfig {
    /// Create a stream config with defaults
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            path: None,
            records_path: None,
            limit_param: None,
            query: BTreeMap::new(),
            primary_key: Vec::new(),
            cursor_field: None,
            sync_modes: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// REST path for this stream
    pub fn request_path(&self) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("/{}", self.name))
    }
}

/// Per-provider source configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Provider identifier, unique within a tenant
    pub provider: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    /// Reference to the secret, e.g. `env:CRM_TOKEN`; never the secret itself
    #[serde(default)]
    pub credential_ref: Option<String>,
    #[serde(default)]
    pub auth: AuthSpec,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub health_path: Option<String>,
    /// Connection was established through an OAuth consent flow
    #[serde(default)]
    pub requires_oauth: bool,
    #[serde(default)]
    pub streams: Vec<StreamConfig>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("provider", &self.provider)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("credential_ref", &self.credential_ref.as_ref().map(|_| "[REDACTED]"))
            .field("auth", &self.auth)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .field("streams", &self.streams.len())
            .finish_non_exhaustive()
    }
}

impl SourceConfig {
    /// Create a REST source config
    pub fn rest(provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: SourceKind::Rest,
            base_url: Some(base_url.into()),
            database: None,
            credential_ref: None,
            auth: AuthSpec::None,
            rate_limit: RateLimitSettings::default(),
            retry: RetrySettings::default(),
            timeout_secs: default_timeout_secs(),
            health_path: None,
            requires_oauth: false,
            streams: Vec::new(),
        }
    }

    /// Create a database source config
    pub fn database(
        provider: impl Into<String>,
        engine: DatabaseEngine,
        path: impl Into<String>,
    ) -> Self {
        Self {
            kind: SourceKind::Database,
            base_url: None,
            database: Some(DatabaseSettings {
                engine,
                path: Some(path.into()),
            }),
            ..Self::rest(provider, String::new())
        }
    }

    /// Add a stream
    #[must_use]
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.streams.push(stream);
        self
    }

    /// Set auth scheme and credential reference
    #[must_use]
    pub fn with_auth(mut self, auth: AuthSpec, credential_ref: impl Into<String>) -> Self {
        self.auth = auth;
        self.credential_ref = Some(credential_ref.into());
        self
    }

    /// Look up a stream by name
    pub fn stream(&self, name: &str) -> Result<&StreamConfig> {
        self.streams
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::StreamNotFound {
                stream: name.to_string(),
            })
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate before any network activity
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(Error::missing_field("provider"));
        }
        match self.kind {
            SourceKind::Rest => {
                if self.base_url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                    return Err(Error::invalid_value(
                        format!("sources.{}.base_url", self.provider),
                        "REST sources require a base URL",
                    ));
                }
            }
            SourceKind::Database => {
                let has_path = self
                    .database
                    .as_ref()
                    .and_then(|d| d.path.as_ref())
                    .is_some();
                if !has_path && self.credential_ref.is_none() {
                    return Err(Error::invalid_value(
                        format!("sources.{}.database", self.provider),
                        "database sources require a path or credential_ref",
                    ));
                }
            }
        }
        if self.rate_limit.requests_per_window == 0 {
            return Err(Error::invalid_value(
                format!("sources.{}.rate_limit.requests_per_window", self.provider),
                "must be greater than zero",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::invalid_value(
                format!("sources.{}.retry.max_attempts", self.provider),
                "must be at least 1",
            ));
        }
        if self.requires_oauth && !self.auth.is_oauth() {
            return Err(Error::invalid_value(
                format!("sources.{}.auth", self.provider),
                "source was connected through OAuth but declares a direct credential",
            ));
        }
        if !matches!(self.auth, AuthSpec::None) && self.credential_ref.is_none() {
            return Err(Error::missing_field(format!(
                "sources.{}.credential_ref",
                self.provider
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Runtime State
// ============================================================================

/// Identity of a source within the process
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
    pub tenant_id: String,
    pub provider: String,
}

impl SourceKey {
    pub fn new(tenant_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            provider: provider.into(),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.provider)
    }
}

/// A connected source and its health
#[derive(Debug, Clone)]
pub struct Source {
    pub tenant_id: String,
    pub config: SourceConfig,
    health: HealthStatus,
    last_report: Option<HealthReport>,
    last_probe_at: Option<DateTime<Utc>>,
    enabled: bool,
    connected_at: DateTime<Utc>,
}

impl Source {
    /// Create a source after a successful authentication test
    pub fn connected(tenant_id: impl Into<String>, config: SourceConfig) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            config,
            health: HealthStatus::Healthy,
            last_report: None,
            last_probe_at: None,
            enabled: true,
            connected_at: Utc::now(),
        }
    }

    pub fn key(&self) -> SourceKey {
        SourceKey::new(&self.tenant_id, &self.config.provider)
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    pub fn health(&self) -> HealthStatus {
        self.health
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_probe_at(&self) -> Option<DateTime<Utc>> {
        self.last_probe_at
    }

    /// Recompute health from a probe
    pub fn record_probe(&mut self, report: &HealthReport) {
        self.health = report.status;
        self.last_report = Some(report.clone());
        self.last_probe_at = Some(Utc::now());
    }

    /// Disable on disconnect; health becomes unknown
    pub fn disable(&mut self) {
        self.enabled = false;
        self.health = HealthStatus::Unknown;
    }

    /// Report for the health surface
    pub fn health_report(&self) -> HealthReport {
        if !self.enabled {
            return HealthReport {
                status: HealthStatus::Unknown,
                details: Some("disconnected".to_string()),
                integration: self.config.provider.clone(),
            };
        }
        self.last_report.clone().unwrap_or_else(|| HealthReport {
            status: self.health,
            details: None,
            integration: self.config.provider.clone(),
        })
    }
}
