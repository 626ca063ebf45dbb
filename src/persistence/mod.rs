//! Record persistence
//!
//! Only validated records reach a store. The store owns the isolation and
//! audit fields: it writes the tenant id and timestamps itself, whatever the
//! record carried.
//!
//! # Overview
//!
//! - `RecordStore` - the persistence boundary
//! - `DuckDbStore` - primary store, one table per unified entity
//! - `MemoryStore` - fallback store
//! - `StoreSelector` - probes the primary and picks a store explicitly
//! - `RecordIngestor` - validate, then upsert

mod duckdb_store;
mod ingestor;
mod memory;
mod selector;

pub use duckdb_store::DuckDbStore;
pub use ingestor::RecordIngestor;
pub use memory::MemoryStore;
pub use selector::{StoreChoice, StoreSelector};

use crate::error::Result;
use crate::reconcile::UnifiedEntity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Column holding the record id within a tenant
pub const RECORD_ID_FIELD: &str = "_record_id";

/// A tenant-scoped record store
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Prepare storage for an entity; repeated calls are no-ops
    async fn ensure_entity(&self, entity: &UnifiedEntity) -> Result<()>;

    /// Insert or replace one record
    ///
    /// `_created_at` survives replacement; `_updated_at` is refreshed.
    async fn upsert(
        &self,
        entity: &str,
        tenant_id: &str,
        record_id: &str,
        data: &Map<String, Value>,
    ) -> Result<()>;

    /// Stored record, including isolation and audit fields
    async fn get(
        &self,
        entity: &str,
        tenant_id: &str,
        record_id: &str,
    ) -> Result<Option<Map<String, Value>>>;

    /// Number of records a tenant holds for an entity
    async fn count(&self, entity: &str, tenant_id: &str) -> Result<usize>;

    async fn health_check(&self) -> Result<()>;
}

/// Audit timestamp as stored and returned by every store
pub(crate) fn audit_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}
