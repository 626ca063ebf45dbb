//! Source connector boundary
//!
//! A connector knows how to authenticate against one kind of source, list the
//! streams it exposes and fetch a bounded sample from a stream. Discovery and
//! sampling only ever talk to sources through this trait.
//!
//! # Implementations
//!
//! - [`RestConnector`]: config-declared REST streams over the integration client
//! - [`DatabaseConnector`]: DuckDB-attached databases (DuckDB, SQLite, PostgreSQL, MySQL)

mod database;
mod rest;

pub use database::DatabaseConnector;
pub(crate) use database::{duckdb_value_to_json, quote_ident};
pub use rest::{extract_records, RestConnector};

use crate::error::Result;
use crate::http::IntegrationClient;
use crate::schema::Catalog;
use crate::source::{ClientRegistry, SourceConfig, SourceKind};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// An authenticated session with one source
#[derive(Clone)]
pub struct SourceHandle {
    pub tenant_id: String,
    pub config: Arc<SourceConfig>,
    session: Session,
}

#[derive(Clone)]
enum Session {
    Rest(Arc<IntegrationClient>),
    Database(Arc<Mutex<duckdb::Connection>>),
    /// Sessions owned by connectors outside this crate
    Detached,
}

impl SourceHandle {
    /// Handle for a connector that manages its own session
    pub fn detached(tenant_id: impl Into<String>, config: SourceConfig) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            config: Arc::new(config),
            session: Session::Detached,
        }
    }

    pub(crate) fn rest(
        tenant_id: impl Into<String>,
        config: SourceConfig,
        client: Arc<IntegrationClient>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            config: Arc::new(config),
            session: Session::Rest(client),
        }
    }

    pub(crate) fn database(
        tenant_id: impl Into<String>,
        config: SourceConfig,
        conn: duckdb::Connection,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            config: Arc::new(config),
            session: Session::Database(Arc::new(Mutex::new(conn))),
        }
    }

    /// Provider of the source
    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// Integration client, for REST sessions
    pub fn client(&self) -> Option<&Arc<IntegrationClient>> {
        match &self.session {
            Session::Rest(client) => Some(client),
            _ => None,
        }
    }

    pub(crate) fn connection(&self) -> Option<&Arc<Mutex<duckdb::Connection>>> {
        match &self.session {
            Session::Database(conn) => Some(conn),
            _ => None,
        }
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let session = match &self.session {
            Session::Rest(_) => "rest",
            Session::Database(_) => "database",
            Session::Detached => "detached",
        };
        f.debug_struct("SourceHandle")
            .field("tenant_id", &self.tenant_id)
            .field("provider", &self.config.provider)
            .field("session", &session)
            .finish()
    }
}

/// Source connector interface
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Test credentials and open a session
    async fn authenticate(&self, tenant_id: &str, source: &SourceConfig) -> Result<SourceHandle>;

    /// List the streams a source exposes
    async fn list_streams(&self, handle: &SourceHandle) -> Result<Catalog>;

    /// Fetch at most `limit` raw records from a stream
    async fn fetch_sample(
        &self,
        handle: &SourceHandle,
        stream: &str,
        limit: usize,
    ) -> Result<Vec<Value>>;
}

/// Pick the built-in connector for a source kind
pub fn connector_for(kind: SourceKind, registry: Arc<ClientRegistry>) -> Arc<dyn SourceConnector> {
    match kind {
        SourceKind::Rest => Arc::new(RestConnector::new(registry)),
        SourceKind::Database => Arc::new(DatabaseConnector::new(registry)),
    }
}
