//! Credential references
//!
//! Sources name their secrets by reference (`env:CRM_TOKEN`, `file:/run/secrets/key`).
//! Resolution happens once, when a client is built.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Resolves a credential reference to the secret it names
pub trait CredentialResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String>;
}

/// Resolves `env:NAME` and `file:PATH` references
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentialResolver;

impl CredentialResolver for EnvCredentialResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        if let Some(name) = reference.strip_prefix("env:") {
            return std::env::var(name).map_err(|_| Error::Credential {
                reference: reference.to_string(),
                message: format!("environment variable {name} is not set"),
            });
        }
        if let Some(path) = reference.strip_prefix("file:") {
            return std::fs::read_to_string(path)
                .map(|s| s.trim_end().to_string())
                .map_err(|e| Error::Credential {
                    reference: reference.to_string(),
                    message: e.to_string(),
                });
        }
        Err(Error::Credential {
            reference: reference.to_string(),
            message: "expected an 'env:' or 'file:' reference".to_string(),
        })
    }
}

/// In-memory credential store, keyed by the full reference
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
    secrets: RwLock<HashMap<String, String>>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret
    #[must_use]
    pub fn with(self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(reference, secret);
        self
    }

    /// Store (or replace) a secret
    pub fn insert(&self, reference: impl Into<String>, secret: impl Into<String>) {
        self.secrets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(reference.into(), secret.into());
    }
}

impl CredentialResolver for StaticCredentialResolver {
    fn resolve(&self, reference: &str) -> Result<String> {
        self.secrets
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::Credential {
                reference: reference.to_string(),
                message: "no such credential".to_string(),
            })
    }
}
