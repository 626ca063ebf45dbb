//! Database connector
//!
//! Attaches the source database to an in-memory DuckDB read-only, under the
//! alias `source_db`, and reads table metadata through DuckDB's
//! `information_schema`. PostgreSQL, MySQL and SQLite go through the matching
//! DuckDB extension.

use super::{SourceConnector, SourceHandle};
use crate::error::{Error, Result};
use crate::schema::{Catalog, CatalogStream, FieldDescriptor, JsonType, StreamDescriptor};
use crate::source::{ClientRegistry, DatabaseEngine, SourceConfig, SourceKind, StreamConfig};
use crate::types::HealthReport;
use async_trait::async_trait;
use duckdb::Connection;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const ATTACH_ALIAS: &str = "source_db";

/// Connector for DuckDB-attached databases
#[derive(Debug)]
pub struct DatabaseConnector {
    registry: Arc<ClientRegistry>,
}

impl DatabaseConnector {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }

    fn connection_string(&self, source: &SourceConfig) -> Result<String> {
        if let Some(secret) = self.registry.resolve_secret(source)? {
            return Ok(secret);
        }
        source
            .database
            .as_ref()
            .and_then(|d| d.path.clone())
            .ok_or_else(|| Error::missing_field(format!("sources.{}.database.path", source.provider)))
    }
}

#[async_trait]
impl SourceConnector for DatabaseConnector {
    async fn authenticate(&self, tenant_id: &str, source: &SourceConfig) -> Result<SourceHandle> {
        if source.kind != SourceKind::Database {
            return Err(Error::invalid_value(
                format!("sources.{}.kind", source.provider),
                "database connector needs a database source",
            ));
        }
        source.validate()?;

        let engine = source.database.as_ref().map(|d| d.engine).unwrap_or_default();
        let connection_string = self.connection_string(source)?;
        let masked = mask_password(&connection_string);

        let conn = tokio::task::spawn_blocking(move || open_attached(engine, &connection_string))
            .await
            .map_err(|e| Error::database(format!("Attach task failed: {e}")))??;

        info!(tenant_id, provider = %source.provider, connection = %masked, "Database attached");
        self.registry
            .record_connected(tenant_id, source, &HealthReport::healthy(&source.provider));
        Ok(SourceHandle::database(tenant_id, source.clone(), conn))
    }

    async fn list_streams(&self, handle: &SourceHandle) -> Result<Catalog> {
        let conn = session(handle)?;
        let config = handle.config.clone();

        tokio::task::spawn_blocking(move || -> Result<Catalog> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let tables = list_tables(&conn)?;
            let mut streams = Vec::new();

            for (schema, table) in tables {
                let declared = config.streams.iter().find(|s| s.name == table);
                if !config.streams.is_empty() && declared.is_none() {
                    continue;
                }

                match describe_table(&conn, &schema, &table, declared) {
                    Ok(entry) => streams.push(entry),
                    Err(e) => {
                        warn!(table = %table, error = %e, "Table introspection failed");
                        let mut entry = CatalogStream::unavailable(&table, e.to_string());
                        entry.namespace = Some(schema);
                        streams.push(entry);
                    }
                }
            }

            debug!(count = streams.len(), "Listed database tables");
            Ok(Catalog::new(streams))
        })
        .await
        .map_err(|e| Error::database(format!("Catalog task failed: {e}")))?
    }

    async fn fetch_sample(
        &self,
        handle: &SourceHandle,
        stream: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let conn = session(handle)?;
        let namespace = handle
            .config
            .streams
            .iter()
            .find(|s| s.name == stream)
            .and_then(|s| s.namespace.clone());
        let stream = stream.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Value>> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let schema = match namespace {
                Some(schema) => schema,
                None => table_schema(&conn, &stream)?,
            };
            sample_rows(&conn, &schema, &stream, limit)
        })
        .await
        .map_err(|e| Error::database(format!("Sample task failed: {e}")))?
    }
}

/// Catalog entry for one table, from its declared stream or its columns
fn describe_table(
    conn: &Connection,
    schema: &str,
    table: &str,
    declared: Option<&StreamConfig>,
) -> Result<CatalogStream> {
    let mut entry = CatalogStream::new(table);
    entry.namespace = Some(schema.to_string());
    let mut descriptor = StreamDescriptor::new(table);

    match declared {
        Some(stream) if !stream.fields.is_empty() => {
            for field in &stream.fields {
                let mut descriptor_field =
                    FieldDescriptor::with_types(&field.name, field.json_type.types())?;
                descriptor_field.format = field.format.clone();
                descriptor_field.required = field.required;
                descriptor.fields.push(descriptor_field);
            }
        }
        _ => descriptor.fields = table_columns(conn, schema, table)?,
    }

    entry.primary_key = match declared {
        Some(stream) if !stream.primary_key.is_empty() => stream.primary_key.clone(),
        _ => primary_key(conn, schema, table),
    };
    if let Some(stream) = declared {
        entry.cursor_field = stream.cursor_field.clone();
        entry.sync_modes = stream.sync_modes.clone();
    }
    entry.json_schema = Some(descriptor.to_json_schema());
    Ok(entry)
}

fn session(handle: &SourceHandle) -> Result<Arc<Mutex<Connection>>> {
    handle
        .connection()
        .cloned()
        .ok_or_else(|| Error::config("database connector needs a database session"))
}

// ============================================================================
// DuckDB plumbing
// ============================================================================

/// Open an in-memory DuckDB and attach the source read-only
fn open_attached(engine: DatabaseEngine, connection_string: &str) -> Result<Connection> {
    let conn = Connection::open_in_memory()
        .map_err(|e| Error::database(format!("Failed to create DuckDB connection: {e}")))?;
    let target = connection_string.replace('\'', "''");

    let (extension, attach_type) = match engine {
        DatabaseEngine::Postgres => (Some("postgres"), Some("POSTGRES")),
        DatabaseEngine::Mysql => (Some("mysql"), Some("MYSQL")),
        DatabaseEngine::Sqlite => (Some("sqlite"), Some("SQLITE")),
        DatabaseEngine::Duckdb => (None, None),
    };

    if let Some(extension) = extension {
        conn.execute_batch(&format!("INSTALL {extension}; LOAD {extension};"))
            .map_err(|e| Error::database(format!("Failed to load {extension} extension: {e}")))?;
    }

    let attach_sql = match attach_type {
        Some(kind) => format!("ATTACH '{target}' AS {ATTACH_ALIAS} (TYPE {kind}, READ_ONLY);"),
        None => format!("ATTACH '{target}' AS {ATTACH_ALIAS} (READ_ONLY);"),
    };
    conn.execute_batch(&attach_sql)
        .map_err(|e| Error::database(format!("Failed to attach database: {e}")))?;

    // Connection check
    list_tables(&conn)?;
    Ok(conn)
}

/// (schema, table) pairs of the attached database
fn list_tables(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare(
            "SELECT table_schema, table_name
             FROM information_schema.tables
             WHERE table_catalog = ?
               AND table_schema NOT IN ('information_schema', 'pg_catalog')
             ORDER BY table_schema, table_name",
        )
        .map_err(|e| Error::database(format!("Failed to prepare table listing: {e}")))?;

    let tables = stmt
        .query_map([ATTACH_ALIAS], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(|e| Error::database(format!("Failed to list tables: {e}")))?
        .collect::<std::result::Result<Vec<(String, String)>, _>>()
        .map_err(|e| Error::database(format!("Failed to read table listing: {e}")))?;
    Ok(tables)
}

/// Schema holding a table, first match in schema order
fn table_schema(conn: &Connection, table: &str) -> Result<String> {
    list_tables(conn)?
        .into_iter()
        .find(|(_, name)| name == table)
        .map(|(schema, _)| schema)
        .ok_or_else(|| Error::StreamNotFound {
            stream: table.to_string(),
        })
}

struct Column {
    name: String,
    data_type: String,
    nullable: bool,
}

fn columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<Column>> {
    let mut stmt = conn
        .prepare(
            "SELECT column_name, data_type, is_nullable
             FROM information_schema.columns
             WHERE table_catalog = ? AND table_schema = ? AND table_name = ?
             ORDER BY ordinal_position",
        )
        .map_err(|e| Error::database(format!("Failed to prepare column listing: {e}")))?;

    let columns = stmt
        .query_map([ATTACH_ALIAS, schema, table], |row| {
            let nullable: String = row.get(2)?;
            Ok(Column {
                name: row.get(0)?,
                data_type: row.get(1)?,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            })
        })
        .map_err(|e| Error::database(format!("Failed to list columns of {table}: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(format!("Failed to read columns of {table}: {e}")))?;
    Ok(columns)
}

fn table_columns(conn: &Connection, schema: &str, table: &str) -> Result<Vec<FieldDescriptor>> {
    columns(conn, schema, table)?
        .into_iter()
        .map(|column| {
            let (json_type, format) = sql_type_to_json(&column.data_type);
            let mut types = BTreeSet::from([json_type]);
            if column.nullable {
                types.insert(JsonType::Null);
            }
            let mut field = FieldDescriptor::with_types(column.name, types)?;
            field.format = format.map(String::from);
            field.required = !column.nullable;
            Ok(field)
        })
        .collect()
}

/// Declared primary key columns; empty when the engine exposes none
fn primary_key(conn: &Connection, schema: &str, table: &str) -> Vec<String> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT constraint_column_names
         FROM duckdb_constraints()
         WHERE database_name = ? AND schema_name = ? AND table_name = ?
           AND constraint_type = 'PRIMARY KEY'",
    ) else {
        return Vec::new();
    };

    let key = stmt.query_row([ATTACH_ALIAS, schema, table], |row| {
        row.get::<_, duckdb::types::Value>(0)
    });
    match key {
        Ok(duckdb::types::Value::List(names)) => names
            .into_iter()
            .filter_map(|name| match name {
                duckdb::types::Value::Text(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn sample_rows(conn: &Connection, schema: &str, table: &str, limit: usize) -> Result<Vec<Value>> {
    let columns = columns(conn, schema, table)?;
    if columns.is_empty() {
        return Err(Error::StreamNotFound {
            stream: table.to_string(),
        });
    }

    let select_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let query = format!(
        "SELECT {select_list} FROM {}.{}.{} LIMIT {limit}",
        quote_ident(ATTACH_ALIAS),
        quote_ident(schema),
        quote_ident(table)
    );
    debug!(query = %query, "Sampling table");

    let mut stmt = conn
        .prepare(&query)
        .map_err(|e| Error::database(format!("Failed to prepare sample query: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            let mut record = Map::new();
            for (i, column) in columns.iter().enumerate() {
                let value: duckdb::types::Value = row.get(i)?;
                record.insert(column.name.clone(), duckdb_value_to_json(value));
            }
            Ok(Value::Object(record))
        })
        .map_err(|e| Error::database(format!("Failed to sample {table}: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(format!("Failed to read rows of {table}: {e}")))?;
    Ok(rows)
}

pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Map a DuckDB column type onto a JSON type and format hint
pub(crate) fn sql_type_to_json(data_type: &str) -> (JsonType, Option<&'static str>) {
    let upper = data_type.trim().to_ascii_uppercase();
    if upper.ends_with(']') {
        return (JsonType::Array, None);
    }
    let base = upper.split('(').next().unwrap_or_default().trim();

    match base {
        "BOOLEAN" | "BOOL" => (JsonType::Boolean, None),
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "UTINYINT" | "USMALLINT"
        | "UINTEGER" | "UBIGINT" => (JsonType::Integer, None),
        "FLOAT" | "REAL" | "DOUBLE" | "DECIMAL" | "NUMERIC" => (JsonType::Number, None),
        "DATE" => (JsonType::String, Some("date")),
        "TIMESTAMP" | "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" | "DATETIME" => {
            (JsonType::String, Some("date-time"))
        }
        "TIME" => (JsonType::String, Some("time")),
        "UUID" => (JsonType::String, Some("uuid")),
        "STRUCT" | "MAP" | "JSON" => (JsonType::Object, None),
        "LIST" => (JsonType::Array, None),
        // HUGEINT and friends are rendered as strings to keep precision
        _ => (JsonType::String, None),
    }
}

/// Convert a DuckDB value to JSON
pub(crate) fn duckdb_value_to_json(value: duckdb::types::Value) -> Value {
    use duckdb::types::Value as Db;

    match value {
        Db::Null => Value::Null,
        Db::Boolean(b) => Value::Bool(b),
        Db::TinyInt(i) => Value::Number(i.into()),
        Db::SmallInt(i) => Value::Number(i.into()),
        Db::Int(i) => Value::Number(i.into()),
        Db::BigInt(i) => Value::Number(i.into()),
        Db::HugeInt(i) => Value::String(i.to_string()),
        Db::UTinyInt(i) => Value::Number(i.into()),
        Db::USmallInt(i) => Value::Number(i.into()),
        Db::UInt(i) => Value::Number(i.into()),
        Db::UBigInt(i) => Value::Number(i.into()),
        Db::Float(f) => serde_json::Number::from_f64(f64::from(f)).map_or(Value::Null, Value::Number),
        Db::Double(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        Db::Decimal(d) => d
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| Value::String(d.to_string()), Value::Number),
        Db::Text(s) | Db::Enum(s) => Value::String(s),
        Db::Blob(b) => Value::String(base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b,
        )),
        Db::Timestamp(_, i) => {
            let secs = i.div_euclid(1_000_000);
            let nsecs = (i.rem_euclid(1_000_000) * 1000) as u32;
            chrono::DateTime::from_timestamp(secs, nsecs)
                .map(|dt| Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()))
                .unwrap_or(Value::Number(i.into()))
        }
        Db::Date32(d) => {
            // 719_163 days separate 0001-01-01 from the Unix epoch
            chrono::NaiveDate::from_num_days_from_ce_opt(d + 719_163)
                .map(|date| Value::String(date.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Number(d.into()))
        }
        Db::Time64(_, t) => {
            let secs = t / 1_000_000;
            let micros = t % 1_000_000;
            Value::String(format!(
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                micros
            ))
        }
        Db::List(items) => Value::Array(items.into_iter().map(duckdb_value_to_json).collect()),
        other => Value::String(format!("{other:?}")),
    }
}

/// Connection string with any password masked, for logging
pub(crate) fn mask_password(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@') {
        if let Some(colon_pos) = connection_string[..at_pos].rfind(':') {
            // Skip the scheme separator in `postgresql://user@host`
            if !connection_string[colon_pos..].starts_with("://") {
                let before_pass = &connection_string[..=colon_pos];
                let after_at = &connection_string[at_pos..];
                return format!("{before_pass}****{after_at}");
            }
        }
    }
    connection_string.to_string()
}
