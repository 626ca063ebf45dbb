//! DuckDB-backed record store
//!
//! One table per unified entity, keyed by (isolation field, record id).
//! All DuckDB work runs on the blocking pool.

use super::{audit_timestamp, RecordStore, RECORD_ID_FIELD};
use crate::connector::{duckdb_value_to_json, quote_ident};
use crate::error::{Error, Result};
use crate::reconcile::{UnifiedEntity, UnifiedField, CREATED_AT_FIELD, UPDATED_AT_FIELD};
use crate::schema::JsonType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info};

/// Column layout of one entity table
#[derive(Debug, Clone)]
struct TableLayout {
    isolation_field: String,
    /// Provider columns and their SQL types
    columns: Vec<(String, &'static str)>,
}

impl TableLayout {
    fn for_entity(entity: &UnifiedEntity) -> Self {
        Self {
            isolation_field: entity.isolation_field.clone(),
            columns: entity
                .inbound_fields()
                .filter(|f| f.name() != RECORD_ID_FIELD)
                .map(|f| (f.name().to_string(), column_type(f)))
                .collect(),
        }
    }

    /// Every column in table order, with its SQL type
    fn all_columns(&self) -> Vec<(&str, &'static str)> {
        let mut all = vec![
            (RECORD_ID_FIELD, "VARCHAR"),
            (self.isolation_field.as_str(), "VARCHAR"),
        ];
        all.extend(self.columns.iter().map(|(name, ty)| (name.as_str(), *ty)));
        all.push((CREATED_AT_FIELD, "TIMESTAMP"));
        all.push((UPDATED_AT_FIELD, "TIMESTAMP"));
        all
    }
}

/// Records in a DuckDB database file (or in memory)
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
    tables: Arc<RwLock<BTreeMap<String, TableLayout>>>,
    location: String,
}

impl std::fmt::Debug for DuckDbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbStore")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl DuckDbStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            Error::database(format!("Failed to open DuckDB store '{}': {e}", path.display()))
        })?;
        Ok(Self::with_connection(conn, path.display().to_string()))
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database(format!("Failed to create DuckDB connection: {e}")))?;
        Ok(Self::with_connection(conn, ":memory:".to_string()))
    }

    fn with_connection(conn: Connection, location: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            tables: Arc::new(RwLock::new(BTreeMap::new())),
            location,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn layout(&self, entity: &str) -> Result<TableLayout> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(entity)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    async fn run<T, F>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            task(&conn)
        })
        .await
        .map_err(|e| Error::persistence(format!("Store task failed: {e}")))?
    }
}

#[async_trait]
impl RecordStore for DuckDbStore {
    fn name(&self) -> &str {
        "duckdb"
    }

    async fn ensure_entity(&self, entity: &UnifiedEntity) -> Result<()> {
        let layout = TableLayout::for_entity(entity);
        let ddl = create_table_sql(&entity.name, &layout, &entity.indexed_fields());
        debug!(entity = %entity.name, "Creating table:\n{ddl}");

        let name = entity.name.clone();
        self.run(move |conn| {
            conn.execute_batch(&ddl)
                .map_err(|e| Error::database(format!("Failed to create table {name}: {e}")))
        })
        .await?;

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.insert(entity.name.clone(), layout);
        Ok(())
    }

    async fn upsert(
        &self,
        entity: &str,
        tenant_id: &str,
        record_id: &str,
        data: &Map<String, Value>,
    ) -> Result<()> {
        let layout = self.layout(entity)?;
        let sql = upsert_sql(entity, &layout);

        let now = sql_timestamp(Utc::now());
        let mut params: Vec<Option<String>> =
            vec![Some(record_id.to_string()), Some(tenant_id.to_string())];
        params.extend(
            layout
                .columns
                .iter()
                .map(|(name, _)| data.get(name).and_then(sql_param)),
        );
        params.push(Some(now.clone()));
        params.push(Some(now));

        let entity = entity.to_string();
        self.run(move |conn| {
            conn.execute(&sql, duckdb::params_from_iter(params))
                .map_err(|e| Error::persistence(format!("Failed to upsert into {entity}: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        entity: &str,
        tenant_id: &str,
        record_id: &str,
    ) -> Result<Option<Map<String, Value>>> {
        let layout = self.layout(entity)?;
        let names: Vec<String> = layout
            .all_columns()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? AND {} = ?",
            names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", "),
            quote_ident(entity),
            quote_ident(&layout.isolation_field),
            quote_ident(RECORD_ID_FIELD),
        );

        let entity = entity.to_string();
        let (tenant_id, record_id) = (tenant_id.to_string(), record_id.to_string());
        self.run(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| Error::persistence(format!("Failed to prepare read of {entity}: {e}")))?;
            let mut rows = stmt
                .query(duckdb::params![tenant_id, record_id])
                .map_err(|e| Error::persistence(format!("Failed to read {entity}: {e}")))?;

            let Some(row) = rows
                .next()
                .map_err(|e| Error::persistence(format!("Failed to read {entity}: {e}")))?
            else {
                return Ok(None);
            };

            let mut record = Map::new();
            for (i, name) in names.iter().enumerate() {
                let value: duckdb::types::Value = row
                    .get(i)
                    .map_err(|e| Error::persistence(format!("Failed to read {name}: {e}")))?;
                let value = duckdb_value_to_json(value);
                if !value.is_null() {
                    record.insert(name.clone(), value);
                }
            }
            Ok(Some(record))
        })
        .await
    }

    async fn count(&self, entity: &str, tenant_id: &str) -> Result<usize> {
        let layout = self.layout(entity)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            quote_ident(entity),
            quote_ident(&layout.isolation_field)
        );
        let entity = entity.to_string();
        let tenant_id = tenant_id.to_string();
        self.run(move |conn| {
            let count: i64 = conn
                .query_row(&sql, [tenant_id], |row| row.get(0))
                .map_err(|e| Error::persistence(format!("Failed to count {entity}: {e}")))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }

    async fn health_check(&self) -> Result<()> {
        self.run(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0))
                .map_err(|e| Error::database(format!("Store health check failed: {e}")))?;
            Ok(())
        })
        .await?;
        info!(location = %self.location, "DuckDB store healthy");
        Ok(())
    }
}

// ============================================================================
// SQL generation
// ============================================================================

/// SQL type for a unified field
fn column_type(field: &UnifiedField) -> &'static str {
    let types: Vec<JsonType> = field
        .descriptor
        .types
        .iter()
        .copied()
        .filter(|t| *t != JsonType::Null)
        .collect();
    match types.as_slice() {
        [JsonType::Integer] => "BIGINT",
        [JsonType::Number] | [JsonType::Number, JsonType::Integer] => "DOUBLE",
        [JsonType::Boolean] => "BOOLEAN",
        _ => "VARCHAR",
    }
}

fn create_table_sql(entity: &str, layout: &TableLayout, indexed: &[&str]) -> String {
    let mut lines: Vec<String> = layout
        .all_columns()
        .into_iter()
        .map(|(name, ty)| {
            let not_null = name == RECORD_ID_FIELD
                || name == layout.isolation_field
                || name == CREATED_AT_FIELD
                || name == UPDATED_AT_FIELD;
            format!(
                "    {} {ty}{}",
                quote_ident(name),
                if not_null { " NOT NULL" } else { "" }
            )
        })
        .collect();
    lines.push(format!(
        "    PRIMARY KEY ({}, {})",
        quote_ident(&layout.isolation_field),
        quote_ident(RECORD_ID_FIELD)
    ));

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n);",
        quote_ident(entity),
        lines.join(",\n")
    );
    for field in indexed.iter().filter(|f| **f != layout.isolation_field) {
        sql.push_str(&format!(
            "\nCREATE INDEX IF NOT EXISTS {} ON {} ({});",
            quote_ident(&format!("{entity}_{field}_idx")),
            quote_ident(entity),
            quote_ident(field)
        ));
    }
    sql
}

fn upsert_sql(entity: &str, layout: &TableLayout) -> String {
    let columns = layout.all_columns();
    let names: Vec<String> = columns.iter().map(|(name, _)| quote_ident(name)).collect();
    let values: Vec<String> = columns
        .iter()
        .map(|(_, ty)| format!("CAST(? AS {ty})"))
        .collect();
    let updates: Vec<String> = columns
        .iter()
        .filter(|(name, _)| {
            *name != RECORD_ID_FIELD && *name != layout.isolation_field && *name != CREATED_AT_FIELD
        })
        .map(|(name, _)| format!("{0} = EXCLUDED.{0}", quote_ident(name)))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}, {}) DO UPDATE SET {}",
        quote_ident(entity),
        names.join(", "),
        values.join(", "),
        quote_ident(&layout.isolation_field),
        quote_ident(RECORD_ID_FIELD),
        updates.join(", ")
    )
}

/// Text form of a JSON value, cast by DuckDB to the column type
fn sql_param(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn sql_timestamp(at: DateTime<Utc>) -> String {
    // Same instant as the audit string, in DuckDB's literal form
    audit_timestamp(at).replacen('T', " ", 1).trim_end_matches('Z').to_string()
}
