//! In-memory record store

use super::{audit_timestamp, RecordStore, RECORD_ID_FIELD};
use crate::error::{Error, Result};
use crate::reconcile::{UnifiedEntity, CREATED_AT_FIELD, UPDATED_AT_FIELD};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type RecordKey = (String, String, String);

#[derive(Debug, Default)]
struct Tables {
    /// Entity name to isolation field
    entities: BTreeMap<String, String>,
    records: BTreeMap<RecordKey, Map<String, Value>>,
}

/// Records kept in process memory; lost on restart
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record of a tenant for an entity, by record id
    pub async fn records(&self, entity: &str, tenant_id: &str) -> Vec<Map<String, Value>> {
        let tables = self.tables.read().await;
        tables
            .records
            .iter()
            .filter(|((e, t, _), _)| e == entity && t == tenant_id)
            .map(|(_, record)| record.clone())
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn ensure_entity(&self, entity: &UnifiedEntity) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .entities
            .entry(entity.name.clone())
            .or_insert_with(|| entity.isolation_field.clone());
        Ok(())
    }

    async fn upsert(
        &self,
        entity: &str,
        tenant_id: &str,
        record_id: &str,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let isolation_field = tables
            .entities
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity {
                entity: entity.to_string(),
            })?;

        let key = (entity.to_string(), tenant_id.to_string(), record_id.to_string());
        let now = Value::String(audit_timestamp(Utc::now()));
        let created_at = tables
            .records
            .get(&key)
            .and_then(|existing| existing.get(CREATED_AT_FIELD).cloned())
            .unwrap_or_else(|| now.clone());

        let mut record = data.clone();
        record.insert(RECORD_ID_FIELD.to_string(), Value::String(record_id.to_string()));
        record.insert(isolation_field, Value::String(tenant_id.to_string()));
        record.insert(CREATED_AT_FIELD.to_string(), created_at);
        record.insert(UPDATED_AT_FIELD.to_string(), now);

        tables.records.insert(key, record);
        Ok(())
    }

    async fn get(
        &self,
        entity: &str,
        tenant_id: &str,
        record_id: &str,
    ) -> Result<Option<Map<String, Value>>> {
        let tables = self.tables.read().await;
        let key = (entity.to_string(), tenant_id.to_string(), record_id.to_string());
        Ok(tables.records.get(&key).cloned())
    }

    async fn count(&self, entity: &str, tenant_id: &str) -> Result<usize> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .keys()
            .filter(|(e, t, _)| e == entity && t == tenant_id)
            .count())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
