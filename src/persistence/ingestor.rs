//! Validate-then-store ingestion

use super::RecordStore;
use crate::error::{Error, Result};
use crate::mapping::DataMappingValidator;
use crate::reconcile::ReconciliationReport;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Hands only validated records to a store
///
/// Holds the report it was built from; a new reconciliation means a new
/// ingestor, so validation never mixes two schemas.
#[derive(Clone)]
pub struct RecordIngestor {
    report: Arc<ReconciliationReport>,
    validator: Arc<DataMappingValidator>,
    store: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for RecordIngestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordIngestor")
            .field("tenant_id", &self.report.tenant_id)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl RecordIngestor {
    pub fn new(
        report: Arc<ReconciliationReport>,
        validator: Arc<DataMappingValidator>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            report,
            validator,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create storage for every entity of the report
    pub async fn prepare(&self) -> Result<()> {
        for entity in &self.report.entities {
            self.store.ensure_entity(entity).await?;
        }
        Ok(())
    }

    /// Validate a record and upsert it, returning its record id
    ///
    /// The id is the entity key taken from the validated record; entities
    /// without a complete key get a fresh UUID. Rejected records never
    /// reach the store.
    pub async fn ingest(&self, entity: &str, record: &Value) -> Result<String> {
        let unified = self
            .report
            .entity(entity)
            .ok_or_else(|| Error::UnknownEntity {
                entity: entity.to_string(),
            })?;

        let result = self.validator.validate(record, entity)?;
        if !result.valid {
            warn!(entity, errors = result.errors.len(), "Record rejected");
            return Err(Error::RecordRejected {
                entity: entity.to_string(),
                errors: result.messages(),
            });
        }

        let record_id = record_id(&unified.primary_key, &result.transformed_data)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.store
            .upsert(
                entity,
                &self.report.tenant_id,
                &record_id,
                &result.transformed_data,
            )
            .await?;

        debug!(entity, record_id = %record_id, store = self.store.name(), "Record stored");
        Ok(record_id)
    }
}

/// Record id from the key values, if every key field is present
///
/// A single-column key is its value as text. A composite key is the JSON
/// array of its values, so separators inside values cannot collide.
pub(crate) fn record_id(key: &[String], data: &Map<String, Value>) -> Option<String> {
    let values = key
        .iter()
        .map(|field| data.get(field).filter(|v| !v.is_null()))
        .collect::<Option<Vec<_>>>()?;
    match values.as_slice() {
        [] => None,
        [Value::String(s)] => Some(s.clone()),
        [other] => Some(other.to_string()),
        _ => serde_json::to_string(&values).ok(),
    }
}
