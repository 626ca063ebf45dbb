//! REST connector
//!
//! Streams are declared in the source config. Records are pulled out of the
//! response body with a JSONPath (`$.data[*]`) or a plain dotted path
//! (`data.items`).

use super::{SourceConnector, SourceHandle};
use crate::error::{Error, Result};
use crate::http::RequestConfig;
use crate::schema::{Catalog, CatalogStream, FieldDescriptor, StreamDescriptor};
use crate::source::{ClientRegistry, SourceConfig, StreamConfig};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_LIMIT_PARAM: &str = "limit";

/// Connector for config-declared REST APIs
#[derive(Debug)]
pub struct RestConnector {
    registry: Arc<ClientRegistry>,
}

impl RestConnector {
    pub fn new(registry: Arc<ClientRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl SourceConnector for RestConnector {
    async fn authenticate(&self, tenant_id: &str, source: &SourceConfig) -> Result<SourceHandle> {
        self.registry.connect(tenant_id, source).await?;
        let client = self.registry.get_or_create(tenant_id, source)?;
        Ok(SourceHandle::rest(tenant_id, source.clone(), client))
    }

    async fn list_streams(&self, handle: &SourceHandle) -> Result<Catalog> {
        let streams = handle
            .config
            .streams
            .iter()
            .map(catalog_entry)
            .collect::<Result<Vec<_>>>()?;
        Ok(Catalog::new(streams))
    }

    async fn fetch_sample(
        &self,
        handle: &SourceHandle,
        stream: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        let client = handle
            .client()
            .ok_or_else(|| Error::config("REST connector needs a REST session"))?;
        let stream_config = handle.config.stream(stream)?;

        let mut request = RequestConfig::new().query(
            stream_config
                .limit_param
                .as_deref()
                .unwrap_or(DEFAULT_LIMIT_PARAM),
            limit.to_string(),
        );
        for (key, value) in &stream_config.query {
            request = request.query(key, value);
        }

        let body: Value = client
            .request_json(Method::GET, &stream_config.request_path(), request)
            .await?;
        let mut records = extract_records(&body, stream_config.records_path.as_deref())?;

        // Providers are free to ignore the limit parameter
        records.truncate(limit);
        debug!(
            provider = %handle.provider(),
            stream,
            count = records.len(),
            "Fetched sample"
        );
        Ok(records)
    }
}

/// Catalog entry for a declared stream; declared fields become its JSON Schema
fn catalog_entry(stream: &StreamConfig) -> Result<CatalogStream> {
    let mut entry = CatalogStream::new(&stream.name);
    entry.namespace = stream.namespace.clone();
    entry.primary_key = stream.primary_key.clone();
    entry.cursor_field = stream.cursor_field.clone();
    entry.sync_modes = stream.sync_modes.clone();

    if !stream.fields.is_empty() {
        let mut descriptor = StreamDescriptor::new(&stream.name);
        for declared in &stream.fields {
            let mut field = FieldDescriptor::with_types(&declared.name, declared.json_type.types())?;
            field.format = declared.format.clone();
            field.required = declared.required;
            descriptor.fields.push(field);
        }
        entry.json_schema = Some(descriptor.to_json_schema());
    }
    Ok(entry)
}

/// Pull records out of a response body
///
/// Without a path, an array body is the record list and any other body is a
/// single record. Paths containing `*` go through JSONPath; anything else is a
/// dotted walk. A path that matches nothing yields no records.
pub fn extract_records(body: &Value, path: Option<&str>) -> Result<Vec<Value>> {
    let Some(path) = path else {
        return Ok(match body {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        });
    };

    if path.contains('*') {
        return extract_with_jsonpath(body, path);
    }

    let trimmed = path.trim_start_matches('$').trim_start_matches('.');
    let mut current = body;
    for part in trimmed.split('.').filter(|p| !p.is_empty()) {
        match current.get(part) {
            Some(next) => current = next,
            None => return Ok(Vec::new()),
        }
    }

    Ok(match current {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    })
}

fn extract_with_jsonpath(value: &Value, path: &str) -> Result<Vec<Value>> {
    use jsonpath_rust::JsonPath;

    let jp = JsonPath::try_from(path)
        .map_err(|e| Error::json_path(format!("Invalid JSONPath '{path}': {e}")))?;

    match jp.find(value) {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Ok(vec![other]),
    }
}
