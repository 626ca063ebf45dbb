//! CLI runner - executes commands

use crate::cli::commands::{Cli, Commands, OutputFormat};
use crate::config::{load_tenant, StorageSettings, TenantConfig};
use crate::error::{Error, Result, ResultExt};
use crate::mapping::DataMappingValidator;
use crate::persistence::{DuckDbStore, MemoryStore, RecordIngestor, RecordStore, StoreSelector};
use crate::pipeline::TenantPipeline;
use crate::source::{ClientRegistry, EnvCredentialResolver};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// CLI runner
pub struct Runner {
    cli: Cli,
}

impl Runner {
    /// Create a new runner
    pub fn new(cli: Cli) -> Self {
        Self { cli }
    }

    /// Run the CLI command
    pub async fn run(&self) -> Result<()> {
        match &self.cli.command {
            Commands::Check => self.check().await,
            Commands::Discover { timeout } => self.discover(*timeout).await,
            Commands::Reconcile { timeout } => self.reconcile(*timeout).await,
            Commands::Validate {
                entity,
                input,
                ingest,
            } => self.validate(entity, input, *ingest).await,
            Commands::Serve { port } => {
                let config = self.load_tenant()?;
                let pipeline = Self::pipeline(&config, None)?;
                crate::cli::serve(Arc::new(pipeline), *port).await
            }
        }
    }

    /// Load the tenant configuration
    fn load_tenant(&self) -> Result<TenantConfig> {
        let path = self
            .cli
            .tenant
            .as_ref()
            .ok_or_else(|| Error::config("Tenant file not specified (use -t flag)"))?;
        load_tenant(path)
    }

    /// Pipeline with env-backed credentials
    fn pipeline(config: &TenantConfig, timeout: Option<u64>) -> Result<TenantPipeline> {
        let registry = Arc::new(ClientRegistry::new(Arc::new(EnvCredentialResolver)));
        let pipeline = TenantPipeline::from_config(config, registry)?;
        Ok(match timeout {
            Some(secs) => pipeline.with_timeout(Duration::from_secs(secs)),
            None => pipeline,
        })
    }

    /// Check every source connection
    async fn check(&self) -> Result<()> {
        let config = self.load_tenant()?;
        let pipeline = Self::pipeline(&config, None)?;

        self.log("INFO", &format!("Checking {} source(s)", config.sources.len()));
        for (provider, report) in pipeline.check().await {
            self.output_message(&json!({
                "type": "CONNECTION_STATUS",
                "provider": provider,
                "connectionStatus": report,
            }));
        }
        Ok(())
    }

    /// Discover every source
    async fn discover(&self, timeout: Option<u64>) -> Result<()> {
        let config = self.load_tenant()?;
        let pipeline = Self::pipeline(&config, timeout)?;
        let timeout = timeout.map_or_else(|| config.timeout(), Duration::from_secs);

        let round = pipeline.discover(Instant::now() + timeout).await;
        for result in &round.results {
            self.output_message(&json!({ "type": "CATALOG", "catalog": result }));
        }
        for (provider, error) in &round.failures {
            self.output_message(&json!({
                "type": "SOURCE_FAILED",
                "provider": provider,
                "kind": error.kind(),
                "message": error.to_string(),
            }));
        }
        if round.timed_out {
            self.log(
                "WARN",
                &format!("Timed out waiting for: {}", round.pending.join(", ")),
            );
        }
        Ok(())
    }

    /// Reconcile and print the report
    async fn reconcile(&self, timeout: Option<u64>) -> Result<()> {
        let config = self.load_tenant()?;
        let report = Self::pipeline(&config, timeout)?.run().await;
        self.output_message(&json!({ "type": "REPORT", "report": report }));
        Ok(())
    }

    /// Validate records from a JSON-lines file, optionally storing them
    async fn validate(&self, entity: &str, input: &Path, ingest: bool) -> Result<()> {
        let config = self.load_tenant()?;
        let content = fs::read_to_string(input)
            .with_context(|| format!("Failed to read records file '{}'", input.display()))?;

        let report = Arc::new(Self::pipeline(&config, None)?.run().await);
        if report.entity(entity).is_none() {
            return Err(Error::UnknownEntity {
                entity: entity.to_string(),
            });
        }
        let validator = Arc::new(DataMappingValidator::from_report(&report, &config.mappings));

        let ingestor = if ingest {
            let store = open_store(&config.storage).await;
            let ingestor = RecordIngestor::new(Arc::clone(&report), Arc::clone(&validator), store);
            ingestor.prepare().await?;
            Some(ingestor)
        } else {
            None
        };

        let mut accepted = 0usize;
        let mut rejected = 0usize;
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let line_no = index + 1;
            let record: Value = serde_json::from_str(line)
                .map_err(|e| Error::config(format!("Invalid JSON on line {line_no}: {e}")))?;

            let result = validator.validate(&record, entity)?;
            if !result.valid {
                rejected += 1;
                self.output_message(&json!({ "type": "VALIDATION", "line": line_no, "result": result }));
                continue;
            }

            accepted += 1;
            match &ingestor {
                Some(ingestor) => {
                    let record_id = ingestor.ingest(entity, &record).await?;
                    self.output_message(&json!({
                        "type": "RECORD",
                        "line": line_no,
                        "entity": entity,
                        "record_id": record_id,
                    }));
                }
                None => {
                    self.output_message(&json!({ "type": "VALIDATION", "line": line_no, "result": result }));
                }
            }
        }

        self.log(
            "INFO",
            &format!("{entity}: {accepted} valid, {rejected} rejected"),
        );
        Ok(())
    }

    fn log(&self, level: &str, message: &str) {
        self.output_message(&json!({
            "type": "LOG",
            "log": { "level": level, "message": message }
        }));
    }

    /// Output a JSON message
    fn output_message(&self, msg: &Value) {
        match self.cli.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(msg).unwrap_or_default());
            }
            OutputFormat::Pretty => {
                println!("{}", serde_json::to_string_pretty(msg).unwrap_or_default());
            }
        }
    }
}

/// DuckDB at the configured path when it answers, memory otherwise
pub(crate) async fn open_store(storage: &StorageSettings) -> Arc<dyn RecordStore> {
    let fallback: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
    let primary = match storage.database_path() {
        Some(path) => DuckDbStore::open(path),
        None => DuckDbStore::in_memory(),
    };
    match primary {
        Ok(primary) => {
            let (_, store) = StoreSelector::new(Arc::new(primary), fallback).select().await;
            store
        }
        Err(e) => {
            warn!(error = %e, "Primary store could not be opened, using memory store");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_store_defaults_to_duckdb() {
        let store = open_store(&StorageSettings::default()).await;
        assert_eq!(store.name(), "duckdb");
    }

    #[tokio::test]
    async fn test_open_store_falls_back_to_memory() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = StorageSettings {
            path: Some(dir.path().join("missing").join("records.duckdb").display().to_string()),
        };
        let store = open_store(&storage).await;
        assert_eq!(store.name(), "memory");
    }
}
