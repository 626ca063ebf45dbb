//! Auth configuration types
//!
//! These types represent the runtime auth configuration after the source's
//! credential reference has been resolved. Secret values never appear in
//! `Debug` output.

use crate::types::JwtAlgorithm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Location for API key placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Place in HTTP header
    #[default]
    Header,
    /// Place in query parameter
    Query,
}

/// Authentication configuration (after credential resolution)
#[derive(Clone, Default)]
pub enum AuthConfig {
    /// No authentication required
    #[default]
    None,

    /// API Key authentication (header or query)
    ApiKey {
        /// Where to place the API key
        location: Location,
        /// Header name (for header location)
        header_name: Option<String>,
        /// Query parameter name (for query location)
        query_param: Option<String>,
        /// Prefix to add before the value (e.g., "Bearer ")
        prefix: Option<String>,
        /// The API key value
        value: String,
    },

    /// HTTP Basic authentication
    Basic {
        /// Username
        username: String,
        /// Password
        password: String,
    },

    /// Bearer token authentication
    Bearer {
        /// The bearer token
        token: String,
    },

    /// OAuth2 Client Credentials flow
    Oauth2ClientCredentials {
        /// Token endpoint URL
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Requested scopes
        scopes: Vec<String>,
    },

    /// OAuth2 Refresh Token flow (token captured out of band)
    Oauth2Refresh {
        /// Token endpoint URL
        token_url: String,
        /// Client ID
        client_id: String,
        /// Client secret
        client_secret: String,
        /// Refresh token
        refresh_token: String,
    },

    /// JWT authentication (service account style)
    Jwt {
        /// Token issuer (iss claim)
        issuer: String,
        /// Token subject (sub claim, optional)
        subject: Option<String>,
        /// Token audience (aud claim)
        audience: String,
        /// Private key for signing (PEM format)
        private_key: String,
        /// Signing algorithm
        algorithm: JwtAlgorithm,
        /// Token lifetime in seconds
        token_lifetime_seconds: u64,
        /// Optional token endpoint for two-step auth
        token_url: Option<String>,
    },

    /// Custom headers
    CustomHeaders {
        /// Headers to add to each request
        headers: HashMap<String, String>,
    },
}

impl AuthConfig {
    /// Short name of the auth scheme, safe to log
    pub fn scheme(&self) -> &'static str {
        match self {
            AuthConfig::None => "none",
            AuthConfig::ApiKey { .. } => "api_key",
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::Oauth2ClientCredentials { .. } => "oauth2_client_credentials",
            AuthConfig::Oauth2Refresh { .. } => "oauth2_refresh",
            AuthConfig::Jwt { .. } => "jwt",
            AuthConfig::CustomHeaders { .. } => "custom_headers",
        }
    }

    /// Whether this scheme obtains tokens through an OAuth-style exchange
    pub fn is_token_based(&self) -> bool {
        matches!(
            self,
            AuthConfig::Oauth2ClientCredentials { .. }
                | AuthConfig::Oauth2Refresh { .. }
                | AuthConfig::Jwt { .. }
        )
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthConfig::None => f.write_str("AuthConfig::None"),
            AuthConfig::ApiKey {
                location,
                header_name,
                query_param,
                ..
            } => f
                .debug_struct("AuthConfig::ApiKey")
                .field("location", location)
                .field("header_name", header_name)
                .field("query_param", query_param)
                .field("value", &"<redacted>")
                .finish(),
            AuthConfig::Basic { username, .. } => f
                .debug_struct("AuthConfig::Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            AuthConfig::Bearer { .. } => f
                .debug_struct("AuthConfig::Bearer")
                .field("token", &"<redacted>")
                .finish(),
            AuthConfig::Oauth2ClientCredentials {
                token_url,
                client_id,
                scopes,
                ..
            } => f
                .debug_struct("AuthConfig::Oauth2ClientCredentials")
                .field("token_url", token_url)
                .field("client_id", client_id)
                .field("scopes", scopes)
                .field("client_secret", &"<redacted>")
                .finish(),
            AuthConfig::Oauth2Refresh {
                token_url,
                client_id,
                ..
            } => f
                .debug_struct("AuthConfig::Oauth2Refresh")
                .field("token_url", token_url)
                .field("client_id", client_id)
                .field("refresh_token", &"<redacted>")
                .finish(),
            AuthConfig::Jwt {
                issuer,
                audience,
                algorithm,
                ..
            } => f
                .debug_struct("AuthConfig::Jwt")
                .field("issuer", issuer)
                .field("audience", audience)
                .field("algorithm", algorithm)
                .field("private_key", &"<redacted>")
                .finish(),
            AuthConfig::CustomHeaders { headers } => {
                let names: Vec<_> = headers.keys().collect();
                f.debug_struct("AuthConfig::CustomHeaders")
                    .field("headers", &names)
                    .finish()
            }
        }
    }
}

/// Cached token with expiration
#[derive(Clone)]
pub struct CachedToken {
    /// The access token
    pub token: String,
    /// When the token expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    /// Create a new cached token
    pub fn new(token: String, expires_at: Option<DateTime<Utc>>) -> Self {
        Self { token, expires_at }
    }

    /// Create a token that expires in N seconds from now
    pub fn expires_in(token: String, seconds: i64) -> Self {
        let expires_at = Utc::now() + chrono::Duration::seconds(seconds);
        Self {
            token,
            expires_at: Some(expires_at),
        }
    }

    /// Check if the token is expired (with 30 second buffer)
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                let buffer = chrono::Duration::seconds(30);
                Utc::now() + buffer >= expires_at
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    #[test]
    fn test_cached_token_not_expired() {
        let token = CachedToken::expires_in("test".to_string(), 3600);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_cached_token_expired() {
        let token = CachedToken::expires_in("test".to_string(), -100);
        assert!(token.is_expired());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = AuthConfig::Basic {
            username: "svc".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{config:?}");
        assert!(debug.contains("svc"));
        assert!(!debug.contains("hunter2"));

        let token = CachedToken::new("tok_live_123".to_string(), None);
        assert!(!format!("{token:?}").contains("tok_live_123"));
    }

    #[test]
    fn test_scheme_names() {
        assert_eq!(AuthConfig::default().scheme(), "none");
        assert!(AuthConfig::Oauth2Refresh {
            token_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
        }
        .is_token_based());
        assert!(!AuthConfig::Bearer {
            token: String::new()
        }
        .is_token_based());
    }
}
