//! Client registry
//!
//! Explicit factory and cache for integration clients, one per
//! (tenant, provider). Also owns the `Source` health records the health
//! surface reads from.

use super::credentials::CredentialResolver;
use super::types::{Source, SourceConfig, SourceKey, SourceKind};
use crate::auth::{AuthConfig, Authenticator};
use crate::error::{Error, ErrorKind, Result};
use crate::http::{HttpClientConfig, IntegrationClient, RequestConfig};
use crate::types::HealthReport;
use futures::future::join_all;
use reqwest::Method;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Builds and caches integration clients
pub struct ClientRegistry {
    resolver: Arc<dyn CredentialResolver>,
    clients: RwLock<HashMap<SourceKey, Arc<IntegrationClient>>>,
    sources: RwLock<HashMap<SourceKey, Source>>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            resolver,
            clients: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// The credential resolver
    pub fn resolver(&self) -> &Arc<dyn CredentialResolver> {
        &self.resolver
    }

    /// Resolve a source's credential reference, if it has one
    pub fn resolve_secret(&self, config: &SourceConfig) -> Result<Option<String>> {
        config
            .credential_ref
            .as_deref()
            .map(|r| self.resolver.resolve(r))
            .transpose()
    }

    /// Build the runtime auth config for a source
    pub fn resolve_auth(&self, config: &SourceConfig) -> Result<AuthConfig> {
        let secret = self.resolve_secret(config)?;
        config
            .auth
            .resolve(secret, |reference| self.resolver.resolve(reference))
    }

    /// Build a fresh client for a source without caching it
    pub fn build_client(&self, config: &SourceConfig) -> Result<IntegrationClient> {
        if config.kind != SourceKind::Rest {
            return Err(Error::invalid_value(
                format!("sources.{}.kind", config.provider),
                "only REST sources use an integration client",
            ));
        }
        config.validate()?;

        let mut builder = HttpClientConfig::builder()
            .provider(&config.provider)
            .timeout(config.timeout())
            .retry(config.retry.into())
            .rate_limit(config.rate_limit.into());
        if let Some(base_url) = &config.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(path) = &config.health_path {
            builder = builder.health_path(path);
        }

        let auth = self.resolve_auth(config)?;
        let mut client = IntegrationClient::new(builder.build())?;
        if !matches!(auth, AuthConfig::None) {
            let authenticator = Authenticator::with_client(auth, client.inner().clone());
            client.set_auth(Arc::new(authenticator));
        }
        Ok(client)
    }

    /// Get the cached client for a source, building it on first use
    pub fn get_or_create(&self, tenant_id: &str, config: &SourceConfig) -> Result<Arc<IntegrationClient>> {
        let key = SourceKey::new(tenant_id, &config.provider);
        if let Some(client) = self.read_clients().get(&key) {
            return Ok(client.clone());
        }

        let client = Arc::new(self.build_client(config)?);
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        // Keep the first client if another caller raced us, so the limiter stays shared
        Ok(clients.entry(key).or_insert(client).clone())
    }

    /// Cached client lookup
    pub fn client(&self, tenant_id: &str, provider: &str) -> Option<Arc<IntegrationClient>> {
        self.read_clients()
            .get(&SourceKey::new(tenant_id, provider))
            .cloned()
    }

    /// Test authentication against a REST source and register it on success
    pub async fn connect(&self, tenant_id: &str, config: &SourceConfig) -> Result<HealthReport> {
        let client = self.get_or_create(tenant_id, config)?;
        let path = config.health_path.clone().unwrap_or_default();

        match client
            .request(Method::GET, &path, RequestConfig::new().attempts(1))
            .await
        {
            Ok(_) => {
                let report = HealthReport::healthy(&config.provider);
                self.record_connected(tenant_id, config, &report);
                Ok(report)
            }
            Err(e) => {
                let key = SourceKey::new(tenant_id, &config.provider);
                if e.kind() == ErrorKind::Authentication {
                    self.write_clients().remove(&key);
                }
                // An already registered source keeps its entry, marked unhealthy
                if let Some(source) = self.write_sources().get_mut(&key) {
                    let report = HealthReport::unhealthy(&config.provider, e.to_string());
                    source.record_probe(&report);
                }
                warn!(tenant_id, provider = %config.provider, error = %e, "Connection test failed");
                Err(e)
            }
        }
    }

    /// Register a source whose authentication test already succeeded
    pub fn record_connected(&self, tenant_id: &str, config: &SourceConfig, report: &HealthReport) {
        let mut source = Source::connected(tenant_id, config.clone());
        source.record_probe(report);
        info!(tenant_id, provider = %config.provider, "Source connected");
        self.write_sources().insert(source.key(), source);
    }

    /// Disable a source and drop its client; returns false if unknown
    pub fn disconnect(&self, tenant_id: &str, provider: &str) -> bool {
        let key = SourceKey::new(tenant_id, provider);
        self.write_clients().remove(&key);
        match self.write_sources().get_mut(&key) {
            Some(source) => {
                source.disable();
                info!(tenant_id, provider, "Source disconnected");
                true
            }
            None => false,
        }
    }

    /// Snapshot of one source
    pub fn source(&self, tenant_id: &str, provider: &str) -> Option<Source> {
        self.read_sources()
            .get(&SourceKey::new(tenant_id, provider))
            .cloned()
    }

    /// Snapshot of a tenant's sources, ordered by provider
    pub fn sources(&self, tenant_id: &str) -> Vec<Source> {
        let mut sources: Vec<Source> = self
            .read_sources()
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.provider().cmp(b.provider()));
        sources
    }

    /// Probe one source and recompute its health
    pub async fn probe(&self, tenant_id: &str, provider: &str) -> Option<HealthReport> {
        let key = SourceKey::new(tenant_id, provider);
        let enabled = self.read_sources().get(&key).map(Source::is_enabled)?;
        if !enabled {
            return self.source(tenant_id, provider).map(|s| s.health_report());
        }

        let client = self.read_clients().get(&key).cloned();
        let report = match client {
            Some(client) => client.health_check().await,
            None => return self.source(tenant_id, provider).map(|s| s.health_report()),
        };

        if let Some(source) = self.write_sources().get_mut(&key) {
            source.record_probe(&report);
        }
        Some(report)
    }

    /// Re-probe every source of a tenant concurrently, keyed by provider
    pub async fn tenant_health(&self, tenant_id: &str) -> BTreeMap<String, HealthReport> {
        let providers: Vec<String> = self
            .sources(tenant_id)
            .into_iter()
            .map(|s| s.config.provider)
            .collect();

        let probes = providers.iter().map(|provider| self.probe(tenant_id, provider));
        let reports = join_all(probes).await;

        providers
            .into_iter()
            .zip(reports)
            .filter_map(|(provider, report)| report.map(|r| (provider, r)))
            .collect()
    }

    fn read_clients(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<SourceKey, Arc<IntegrationClient>>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<SourceKey, Arc<IntegrationClient>>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_sources(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SourceKey, Source>> {
        self.sources.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sources(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SourceKey, Source>> {
        self.sources.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("clients", &self.read_clients().len())
            .field("sources", &self.read_sources().len())
            .finish_non_exhaustive()
    }
}
