//! Tenant configuration
//!
//! One YAML file describes a tenant: its sources, how reconciliation runs and
//! the field mappings layered over the generated schema. Files are validated
//! on load, before any network activity.

use crate::error::{Error, Result, ResultExt};
use crate::mapping::FieldMapping;
use crate::reconcile::{EntityMatcher, MatcherConfig, SchemaReconciler, DEFAULT_ISOLATION_FIELD};
use crate::sampling::{DataSamplingService, DEFAULT_MAX_SAMPLE};
use crate::schema::SchemaDiscoveryService;
use crate::source::SourceConfig;
use crate::types::OptionStringExt;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Tenant Config
// ============================================================================

/// Complete tenant configuration loaded from YAML
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,

    /// Field every unified entity is scoped by
    #[serde(default = "default_isolation_field")]
    pub isolation_field: String,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,

    pub sources: Vec<SourceConfig>,

    /// Mapping overrides keyed by unified entity name
    #[serde(default)]
    pub mappings: BTreeMap<String, Vec<FieldMapping>>,

    #[serde(default)]
    pub storage: StorageSettings,
}

fn default_isolation_field() -> String {
    DEFAULT_ISOLATION_FIELD.to_string()
}

/// How a reconciliation run behaves
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationSettings {
    /// Bound on the whole discovery and merge run
    #[serde(default = "default_run_timeout_secs")]
    pub timeout_secs: u64,

    /// Records sampled per stream during discovery
    #[serde(default = "default_sample_limit")]
    pub sample_limit: usize,

    #[serde(default = "default_true")]
    pub sampling: bool,

    /// Hard cap on any sample request
    #[serde(default)]
    pub max_sample: Option<usize>,

    #[serde(default)]
    pub matcher: MatcherConfig,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_run_timeout_secs(),
            sample_limit: default_sample_limit(),
            sampling: true,
            max_sample: None,
            matcher: MatcherConfig::default(),
        }
    }
}

fn default_run_timeout_secs() -> u64 {
    30
}

fn default_sample_limit() -> usize {
    25
}

fn default_true() -> bool {
    true
}

/// Where validated records go
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    /// DuckDB file; unset or empty means an in-memory database
    #[serde(default)]
    pub path: Option<String>,
}

impl StorageSettings {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.path.clone().none_if_empty().map(PathBuf::from)
    }
}

impl TenantConfig {
    /// Overall run timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.reconciliation.timeout_secs)
    }

    /// Reconciler with the configured matcher and isolation field
    pub fn reconciler(&self) -> Result<SchemaReconciler> {
        let matcher: Arc<dyn EntityMatcher> = self.reconciliation.matcher.build()?;
        Ok(SchemaReconciler::new()
            .with_matcher(matcher)
            .with_isolation_field(&self.isolation_field))
    }

    /// Discovery service with the configured sampling
    pub fn discovery_service(&self) -> Result<SchemaDiscoveryService> {
        let sampler = DataSamplingService::with_max_limit(
            self.reconciliation.max_sample.unwrap_or(DEFAULT_MAX_SAMPLE),
        )?;
        Ok(SchemaDiscoveryService::new()
            .with_sampler(sampler)
            .with_sample_limit(self.reconciliation.sample_limit)
            .with_sampling(self.reconciliation.sampling))
    }

    pub fn source(&self, provider: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.provider == provider)
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load a tenant configuration from a YAML file
pub fn load_tenant(path: impl AsRef<Path>) -> Result<TenantConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tenant file '{}'", path.display()))?;
    load_tenant_from_str(&content)
}

/// Load a tenant configuration from a YAML string
pub fn load_tenant_from_str(yaml: &str) -> Result<TenantConfig> {
    let config: TenantConfig = serde_yaml::from_str(yaml)
        .map_err(|e| Error::config(format!("Failed to parse tenant YAML: {e}")))?;

    validate_tenant(&config)?;
    Ok(config)
}

/// Validate a tenant configuration
fn validate_tenant(config: &TenantConfig) -> Result<()> {
    if config.tenant_id.trim().is_empty() {
        return Err(Error::missing_field("tenant_id"));
    }
    if config.isolation_field.trim().is_empty() {
        return Err(Error::invalid_value("isolation_field", "cannot be empty"));
    }

    let settings = &config.reconciliation;
    if settings.timeout_secs == 0 {
        return Err(Error::invalid_value(
            "reconciliation.timeout_secs",
            "must be greater than zero",
        ));
    }
    if settings.max_sample == Some(0) {
        return Err(Error::invalid_value(
            "reconciliation.max_sample",
            "must be greater than zero",
        ));
    }
    settings.matcher.build()?;

    if config.sources.is_empty() {
        return Err(Error::config("Tenant must have at least one source"));
    }
    let mut providers = HashSet::new();
    for source in &config.sources {
        source.validate()?;
        if !providers.insert(source.provider.as_str()) {
            return Err(Error::config(format!(
                "Duplicate source provider: {}",
                source.provider
            )));
        }
    }

    for (entity, fields) in &config.mappings {
        for field in fields {
            if field.target.trim().is_empty() || field.source.trim().is_empty() {
                return Err(Error::invalid_value(
                    format!("mappings.{entity}"),
                    "field mappings need a source and a target",
                ));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Transform;
    use crate::source::SourceKind;
    use std::io::Write;

    const TENANT: &str = r#"
tenant_id: acme
reconciliation:
  timeout_secs: 10
  sample_limit: 5
  matcher: { kind: key_overlap, keys: [email] }
sources:
  - provider: crm
    base_url: https://crm.example.com/api
    credential_ref: env:CRM_TOKEN
    auth: { type: bearer }
    rate_limit: { requests_per_window: 100, window_secs: 60 }
    streams:
      - name: contacts
        path: /contacts
        records_path: "$.data[*]"
        primary_key: [id]
  - provider: billing
    base_url: https://billing.example.com
    streams:
      - name: customers
        path: /customers
mappings:
  contact:
    - { source: email, target: email, required: true, transform: lowercase, validate: email }
"#;

    #[test]
    fn test_load_tenant_from_str() {
        let config = load_tenant_from_str(TENANT).unwrap();

        assert_eq!(config.tenant_id, "acme");
        assert_eq!(config.isolation_field, "tenant_id");
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.reconciliation.sample_limit, 5);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.source("crm").unwrap().kind, SourceKind::Rest);
        assert!(config.source("erp").is_none());

        let contact = &config.mappings["contact"];
        assert_eq!(contact.len(), 1);
        assert!(contact[0].required);
        assert!(matches!(contact[0].transform, Some(Transform::Lowercase)));

        assert!(config.storage.database_path().is_none());
        config.reconciler().unwrap();
        config.discovery_service().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = load_tenant_from_str(
            "tenant_id: acme\nsources:\n  - provider: crm\n    base_url: https://crm.example.com\n",
        )
        .unwrap();

        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.reconciliation.sample_limit, 25);
        assert!(config.reconciliation.sampling);
        assert_eq!(config.reconciliation.matcher, MatcherConfig::Default);
        assert!(config.mappings.is_empty());
    }

    #[test]
    fn test_custom_isolation_field_reaches_reconciler() {
        let config = load_tenant_from_str(
            "tenant_id: acme\nisolation_field: org_id\nsources:\n  - provider: crm\n    base_url: https://crm.example.com\n",
        )
        .unwrap();
        assert_eq!(config.reconciler().unwrap().isolation_field(), "org_id");
    }

    #[test]
    fn test_rejects_invalid_tenants() {
        let cases = [
            "tenant_id: ''\nsources:\n  - provider: crm\n    base_url: https://x.io\n",
            "tenant_id: acme\nsources: []\n",
            "tenant_id: acme\nsources:\n  - provider: crm\n",
            "tenant_id: acme\nsources:\n  - provider: crm\n    base_url: https://x.io\n  - provider: crm\n    base_url: https://y.io\n",
            "tenant_id: acme\nreconciliation:\n  timeout_secs: 0\nsources:\n  - provider: crm\n    base_url: https://x.io\n",
            "tenant_id: acme\nreconciliation:\n  matcher: { kind: key_overlap, keys: [] }\nsources:\n  - provider: crm\n    base_url: https://x.io\n",
            "tenant_id: acme\nsources:\n  - provider: crm\n    base_url: https://x.io\n    rate_limit: { requests_per_window: 0 }\n",
            "tenant_id: acme\nsources:\n  - provider: crm\n    base_url: https://x.io\nmappings:\n  contact:\n    - { source: email, target: '' }\n",
        ];
        for yaml in cases {
            assert!(load_tenant_from_str(yaml).is_err(), "accepted: {yaml}");
        }
    }

    #[test]
    fn test_unknown_transform_is_a_parse_error() {
        let yaml = "tenant_id: acme\nsources:\n  - provider: crm\n    base_url: https://x.io\nmappings:\n  contact:\n    - { source: email, target: email, transform: shout }\n";
        let err = load_tenant_from_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("unknown transform"));
    }

    #[test]
    fn test_load_tenant_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TENANT.as_bytes()).unwrap();

        let config = load_tenant(file.path()).unwrap();
        assert_eq!(config.tenant_id, "acme");

        let missing = load_tenant("/nonexistent/tenant.yaml");
        assert!(matches!(missing, Err(Error::FileNotFound { .. })));
    }
}
