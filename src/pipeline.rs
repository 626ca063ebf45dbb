//! Tenant reconciliation pipeline
//!
//! Discovery runs concurrently, one task per source. Reconciliation starts
//! only once every task has settled or the overall deadline has passed; a
//! source that did not finish in time is reported, never waited on.

use crate::config::TenantConfig;
use crate::connector::{connector_for, SourceConnector};
use crate::error::{Error, Result};
use crate::reconcile::{ReconciliationReport, SchemaReconciler, SourceStatus};
use crate::schema::{DiscoveryResult, SchemaDiscoveryService};
use crate::source::{ClientRegistry, SourceConfig};
use crate::types::{HealthReport, HealthStatus};
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default bound on a whole reconciliation run
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of the concurrent discovery phase
#[derive(Debug, Default)]
pub struct DiscoveryRound {
    /// Sources that finished, in configuration order
    pub results: Vec<DiscoveryResult>,
    /// Sources that failed as a whole
    pub failures: Vec<(String, Error)>,
    /// Sources still running when the deadline passed
    pub pending: Vec<String>,
    pub timed_out: bool,
}

/// Discovers and reconciles every source of one tenant
pub struct TenantPipeline {
    tenant_id: String,
    sources: Vec<SourceConfig>,
    registry: Arc<ClientRegistry>,
    discovery: Arc<SchemaDiscoveryService>,
    reconciler: Arc<SchemaReconciler>,
    timeout: Duration,
    connectors: HashMap<String, Arc<dyn SourceConnector>>,
}

impl std::fmt::Debug for TenantPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantPipeline")
            .field("tenant_id", &self.tenant_id)
            .field("sources", &self.sources.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TenantPipeline {
    pub fn new(
        tenant_id: impl Into<String>,
        sources: Vec<SourceConfig>,
        registry: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            sources,
            registry,
            discovery: Arc::new(SchemaDiscoveryService::new()),
            reconciler: Arc::new(SchemaReconciler::new()),
            timeout: DEFAULT_RUN_TIMEOUT,
            connectors: HashMap::new(),
        }
    }

    /// Pipeline for a loaded tenant configuration
    pub fn from_config(config: &TenantConfig, registry: Arc<ClientRegistry>) -> Result<Self> {
        Ok(Self::new(&config.tenant_id, config.sources.clone(), registry)
            .with_discovery(config.discovery_service()?)
            .with_reconciler(config.reconciler()?)
            .with_timeout(config.timeout()))
    }

    #[must_use]
    pub fn with_discovery(mut self, discovery: SchemaDiscoveryService) -> Self {
        self.discovery = Arc::new(discovery);
        self
    }

    #[must_use]
    pub fn with_reconciler(mut self, reconciler: SchemaReconciler) -> Self {
        self.reconciler = Arc::new(reconciler);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a specific connector for one provider instead of the built-in one
    #[must_use]
    pub fn with_connector(
        mut self,
        provider: impl Into<String>,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        self.connectors.insert(provider.into(), connector);
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    fn connector(&self, source: &SourceConfig) -> Arc<dyn SourceConnector> {
        self.connectors
            .get(&source.provider)
            .cloned()
            .unwrap_or_else(|| connector_for(source.kind, Arc::clone(&self.registry)))
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Authenticate and discover every source concurrently, up to `deadline`
    pub async fn discover(&self, deadline: Instant) -> DiscoveryRound {
        let mut tasks: FuturesUnordered<_> = self
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                let connector = self.connector(source);
                let discovery = Arc::clone(&self.discovery);
                let tenant_id = self.tenant_id.clone();
                let source = source.clone();
                let span = info_span!(
                    "discover_source",
                    tenant = %tenant_id,
                    provider = %source.provider,
                    correlation_id = %Uuid::new_v4(),
                );
                async move {
                    let outcome = async {
                        let handle = connector.authenticate(&tenant_id, &source).await?;
                        discovery
                            .discover(connector.as_ref(), &handle, Some(deadline))
                            .await
                    }
                    .await;
                    (index, outcome)
                }
                .instrument(span)
            })
            .collect();

        let mut outcomes: Vec<Option<Result<DiscoveryResult>>> =
            self.sources.iter().map(|_| None).collect();
        let mut timed_out = false;

        loop {
            match tokio::time::timeout_at(deadline, tasks.next()).await {
                Ok(Some((index, outcome))) => outcomes[index] = Some(outcome),
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }
        // Unfinished tasks are cancelled here
        drop(tasks);

        let mut round = DiscoveryRound {
            timed_out,
            ..DiscoveryRound::default()
        };
        for (source, outcome) in self.sources.iter().zip(outcomes) {
            match outcome {
                Some(Ok(result)) => round.results.push(result),
                Some(Err(e)) if matches!(e, Error::DeadlineExceeded { .. }) => {
                    round.timed_out = true;
                    round.pending.push(source.provider.clone());
                }
                Some(Err(e)) => {
                    warn!(
                        tenant = %self.tenant_id,
                        provider = %source.provider,
                        error = %e,
                        "Source discovery failed"
                    );
                    round.failures.push((source.provider.clone(), e));
                }
                None => round.pending.push(source.provider.clone()),
            }
        }
        round
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Discover every source and reconcile what arrived in time
    ///
    /// Never fails: failed sources become warnings and source statuses, a
    /// timeout becomes a report error next to the partial result.
    pub async fn run(&self) -> ReconciliationReport {
        let started = Instant::now();
        info!(tenant = %self.tenant_id, sources = self.sources.len(), "Reconciliation started");

        let round = self.discover(started + self.timeout).await;
        let mut report = self.reconciler.reconcile(&self.tenant_id, &round.results);

        for (provider, error) in &round.failures {
            report
                .warnings
                .push(format!("{provider}: source skipped: {error}"));
            report.sources.insert(
                provider.clone(),
                SourceStatus {
                    health: HealthStatus::Unhealthy,
                    streams: 0,
                    failures: Vec::new(),
                    error: Some(error.to_string()),
                },
            );
        }
        for provider in &round.pending {
            report.sources.insert(
                provider.clone(),
                SourceStatus {
                    health: HealthStatus::Unknown,
                    streams: 0,
                    failures: Vec::new(),
                    error: Some("timed out".to_string()),
                },
            );
        }

        if round.timed_out || report.timed_out {
            let mut late: Vec<&str> = round.pending.iter().map(String::as_str).collect();
            late.extend(
                round
                    .results
                    .iter()
                    .filter(|r| r.timed_out)
                    .map(|r| r.provider.as_str()),
            );
            report.timed_out = true;
            report.errors.push(format!(
                "reconciliation timed out after {}ms; incomplete sources: {}",
                self.timeout.as_millis(),
                late.join(", ")
            ));
        }

        info!(
            tenant = %self.tenant_id,
            entities = report.entities.len(),
            relationships = report.relationships.len(),
            warnings = report.warnings.len(),
            errors = report.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reconciliation finished"
        );
        report
    }

    // ========================================================================
    // Health
    // ========================================================================

    /// Authenticate every source and collect their health, keyed by provider
    pub async fn check(&self) -> BTreeMap<String, HealthReport> {
        let attempts = self.sources.iter().map(|source| async move {
            let outcome = self
                .connector(source)
                .authenticate(&self.tenant_id, source)
                .await;
            (source.provider.clone(), outcome)
        });
        let outcomes = join_all(attempts).await;

        let mut health = self.registry.tenant_health(&self.tenant_id).await;
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(_) => {
                    health
                        .entry(provider.clone())
                        .or_insert_with(|| HealthReport::healthy(provider));
                }
                Err(e) => {
                    health.insert(provider.clone(), HealthReport::unhealthy(provider, e.to_string()));
                }
            }
        }
        health
    }
}
