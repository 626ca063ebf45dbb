//! Schema discovery and inference tests

use super::*;
use crate::connector::{SourceConnector, SourceHandle};
use crate::error::{Error, ErrorKind, Result};
use crate::source::SourceConfig;
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Descriptors
// ============================================================================

#[test]
fn test_json_type_of() {
    assert_eq!(JsonType::of(&json!(1)), JsonType::Integer);
    assert_eq!(JsonType::of(&json!(1.5)), JsonType::Number);
    assert_eq!(JsonType::of(&json!("x")), JsonType::String);
    assert_eq!(JsonType::of(&json!(null)), JsonType::Null);
    assert_eq!(JsonType::of(&json!([1])), JsonType::Array);
    assert_eq!(JsonType::of(&json!({"a": 1})), JsonType::Object);
    assert!(JsonType::Number.accepts(JsonType::Integer));
    assert!(!JsonType::Integer.accepts(JsonType::Number));
}

#[test]
fn test_field_descriptor_rejects_empty_type_set() {
    assert!(FieldDescriptor::with_types("id", BTreeSet::new()).is_err());
}

#[test]
fn test_field_merge_widens_types() {
    let mut left = FieldDescriptor::new("amount", JsonType::Integer)
        .required()
        .with_format("cents");
    let right = FieldDescriptor::new("amount", JsonType::String).nullable();

    left.merge(&right);

    assert_eq!(
        left.types,
        BTreeSet::from([JsonType::String, JsonType::Integer, JsonType::Null])
    );
    assert!(!left.required);
    assert_eq!(left.format, None);
    assert!(left.accepts(&json!(5)));
    assert!(left.accepts(&json!(null)));
    assert!(!left.accepts(&json!(true)));
}

#[test]
fn test_stream_schema_round_trips_through_json_schema() {
    let stream = StreamDescriptor::new("contacts")
        .with_field(FieldDescriptor::new("id", JsonType::Integer).required())
        .with_field(
            FieldDescriptor::new("email", JsonType::String)
                .nullable()
                .with_format("email"),
        );

    let schema = stream.to_json_schema();
    assert_eq!(schema["type"], json!("object"));
    assert_eq!(schema["required"], json!(["id"]));
    assert_eq!(schema["properties"]["email"]["type"], json!(["string", "null"]));

    let fields = fields_from_json_schema(&schema).unwrap();
    let email = fields.iter().find(|f| f.name == "email").unwrap();
    assert_eq!(email.format.as_deref(), Some("email"));
    assert!(email.is_nullable());
    assert!(fields.iter().find(|f| f.name == "id").unwrap().required);
}

#[test]
fn test_fields_from_json_schema_errors() {
    assert!(fields_from_json_schema(&json!("nope")).is_err());
    assert!(fields_from_json_schema(&json!({"properties": []})).is_err());
    assert!(fields_from_json_schema(&json!({"properties": {"a": {"type": "decimal"}}})).is_err());
    assert!(fields_from_json_schema(&json!({"type": "object"}))
        .unwrap()
        .is_empty());
}

#[test]
fn test_effective_key() {
    let mut stream = StreamDescriptor::new("contacts");
    assert_eq!(stream.effective_key(), None);

    // Unique in the sample is not enough to identify records
    stream.candidate_keys = vec!["email".to_string()];
    assert_eq!(stream.effective_key(), None);

    let stream = stream.with_field(FieldDescriptor::new("id", JsonType::String));
    assert_eq!(stream.effective_key(), Some(vec!["id".to_string()]));

    let stream = stream.with_primary_key(&["code"]);
    assert_eq!(stream.effective_key(), Some(vec!["code".to_string()]));
}

// ============================================================================
// Inference
// ============================================================================

#[test]
fn test_infer_fields_types_and_nullability() {
    let records = vec![
        json!({"id": 1, "email": "a@example.com", "score": 1.5, "tags": ["x"]}),
        json!({"id": 2, "email": null, "score": 2}),
        json!({"id": 3, "email": "c@example.com", "score": 3.0, "tags": []}),
    ];

    let fields = SchemaInferrer::new().infer_fields(&records);
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["id", "email", "score", "tags"]);

    let id = &fields[0];
    assert_eq!(id.types, BTreeSet::from([JsonType::Integer]));
    assert!(id.required);

    let email = &fields[1];
    assert!(email.is_nullable());
    assert!(!email.required);
    assert_eq!(email.format.as_deref(), Some("email"));

    let score = &fields[2];
    assert_eq!(
        score.types,
        BTreeSet::from([JsonType::Number, JsonType::Integer])
    );

    // Missing from one record
    let tags = &fields[3];
    assert!(tags.is_nullable());
    assert_eq!(tags.primary_type(), Some(JsonType::Array));
}

#[test]
fn test_infer_fields_format_detection() {
    let records = vec![
        json!({"created": "2024-01-15T10:00:00Z", "day": "2024-01-15", "site": "https://a.io", "ref": "6f1c0a52-3b7e-4c1f-9d0a-2a0b1c3d4e5f", "mixed": "2024-01-15"}),
        json!({"created": "2024-02-01 08:30:00", "day": "2024-02-01", "site": "http://b.io", "ref": "0d6e8f2a-1b3c-4d5e-8f9a-0b1c2d3e4f5a", "mixed": "hello"}),
    ];

    let fields = SchemaInferrer::new().infer_fields(&records);
    let format = |name: &str| {
        fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.format.clone())
    };
    assert_eq!(format("created").as_deref(), Some("date-time"));
    assert_eq!(format("day").as_deref(), Some("date"));
    assert_eq!(format("site").as_deref(), Some("uri"));
    assert_eq!(format("ref").as_deref(), Some("uuid"));
    assert_eq!(format("mixed"), None);

    let plain = SchemaInferrer::new()
        .with_format_detection(false)
        .infer_fields(&records);
    assert!(plain.iter().all(|f| f.format.is_none()));
}

#[test]
fn test_infer_fields_ignores_non_objects() {
    let records = vec![json!(1), json!("x"), json!({"id": 1})];
    let fields = SchemaInferrer::new().infer_fields(&records);
    assert_eq!(fields.len(), 1);
    assert!(fields[0].required);
    assert!(SchemaInferrer::new().infer_fields(&[]).is_empty());
}

#[test]
fn test_candidate_keys_order() {
    let records = vec![
        json!({"id": 1, "email": "a@x.io", "plan": "pro", "code": "A"}),
        json!({"id": 2, "email": "b@x.io", "plan": "pro", "code": "B"}),
    ];
    let fields = SchemaInferrer::new().infer_fields(&records);

    let keys = candidate_keys(&fields, &records, &[]);
    assert_eq!(keys, vec!["id", "email", "code"]);

    let keys = candidate_keys(&fields, &records, &["code".to_string()]);
    assert_eq!(keys, vec!["code", "id", "email"]);

    // Composite keys are not a single candidate
    let keys = candidate_keys(&fields, &[], &["id".to_string(), "plan".to_string()]);
    assert_eq!(keys, vec!["id"]);
}

// ============================================================================
// Discovery
// ============================================================================

/// Connector serving canned catalogs and samples
#[derive(Default)]
struct CannedConnector {
    streams: Vec<CatalogStream>,
    samples: HashMap<String, Vec<Value>>,
    failing: Vec<String>,
    fail_listing: bool,
    delay: Duration,
}

#[async_trait]
impl SourceConnector for CannedConnector {
    async fn authenticate(&self, tenant_id: &str, source: &SourceConfig) -> Result<SourceHandle> {
        Ok(SourceHandle::detached(tenant_id, source.clone()))
    }

    async fn list_streams(&self, _handle: &SourceHandle) -> Result<Catalog> {
        if self.fail_listing {
            return Err(Error::authentication(401, "token revoked"));
        }
        Ok(Catalog::new(self.streams.clone()))
    }

    async fn fetch_sample(
        &self,
        _handle: &SourceHandle,
        stream: &str,
        limit: usize,
    ) -> Result<Vec<Value>> {
        tokio::time::sleep(self.delay).await;
        if self.failing.iter().any(|s| s == stream) {
            return Err(Error::http_status(500, "boom"));
        }
        let mut records = self.samples.get(stream).cloned().unwrap_or_default();
        records.truncate(limit);
        Ok(records)
    }
}

fn handle() -> SourceHandle {
    SourceHandle::detached("acme", SourceConfig::rest("crm", "http://localhost"))
}

fn declared_contacts() -> CatalogStream {
    let schema = StreamDescriptor::new("contacts")
        .with_field(FieldDescriptor::new("id", JsonType::Integer).required())
        .with_field(FieldDescriptor::new("email", JsonType::String))
        .to_json_schema();
    let mut stream = CatalogStream::new("contacts").with_schema(schema);
    stream.primary_key = vec!["id".to_string()];
    stream
}

#[tokio::test]
async fn test_discover_declared_and_inferred_streams() {
    let connector = CannedConnector {
        streams: vec![declared_contacts(), CatalogStream::new("deals")],
        samples: HashMap::from([
            (
                "contacts".to_string(),
                vec![json!({"id": 1, "email": "a@x.io"})],
            ),
            (
                "deals".to_string(),
                vec![
                    json!({"deal_id": "d1", "amount": 100, "contact_id": 1}),
                    json!({"deal_id": "d2", "amount": 250, "contact_id": 1}),
                ],
            ),
        ]),
        ..CannedConnector::default()
    };

    let result = SchemaDiscoveryService::new()
        .discover(&connector, &handle(), None)
        .await
        .unwrap();

    assert_eq!(result.provider, "crm");
    assert!(result.failures.is_empty());
    assert_eq!(result.streams.len(), 2);

    let contacts = result.stream("contacts").unwrap();
    assert_eq!(contacts.field_origin, FieldOrigin::Declared);
    assert_eq!(contacts.primary_key, Some(vec!["id".to_string()]));
    assert_eq!(contacts.candidate_keys[0], "id");

    let deals = result.stream("deals").unwrap();
    assert_eq!(deals.field_origin, FieldOrigin::Inferred);
    assert_eq!(deals.fields.len(), 3);
    assert_eq!(deals.primary_key, None);
    assert_eq!(deals.candidate_keys, vec!["deal_id", "amount"]);
    assert_eq!(result.sample_data("deals").len(), 2);
}

#[tokio::test]
async fn test_discover_zero_field_stream_without_sampling() {
    let connector = CannedConnector {
        streams: vec![CatalogStream::new("events")],
        samples: HashMap::from([("events".to_string(), vec![json!({"id": 1})])]),
        ..CannedConnector::default()
    };

    let result = SchemaDiscoveryService::new()
        .with_sampling(false)
        .discover(&connector, &handle(), None)
        .await
        .unwrap();

    let events = result.stream("events").unwrap();
    assert!(events.fields.is_empty());
    assert!(result.samples.is_empty());
}

#[tokio::test]
async fn test_discover_records_stream_failure_and_continues() {
    let connector = CannedConnector {
        streams: vec![
            CatalogStream::new("broken"),
            CatalogStream::new("bad_schema").with_schema(json!({"properties": {"a": {"type": 7}}})),
            declared_contacts(),
        ],
        failing: vec!["broken".to_string()],
        ..CannedConnector::default()
    };

    let result = SchemaDiscoveryService::new()
        .discover(&connector, &handle(), None)
        .await
        .unwrap();

    assert_eq!(result.streams.len(), 1);
    assert_eq!(result.streams[0].name, "contacts");
    assert_eq!(result.failures.len(), 2);
    assert_eq!(result.failures[0].stream, "broken");
    assert_eq!(result.failures[0].kind, ErrorKind::Integration);
    assert_eq!(result.failures[1].stream, "bad_schema");
    assert_eq!(result.failures[1].kind, ErrorKind::Validation);
    assert!(!result.timed_out);
}

#[tokio::test]
async fn test_declared_stream_survives_failed_sampling() {
    let connector = CannedConnector {
        streams: vec![declared_contacts(), CatalogStream::new("deals")],
        failing: vec!["contacts".to_string(), "deals".to_string()],
        ..CannedConnector::default()
    };

    let result = SchemaDiscoveryService::new()
        .discover(&connector, &handle(), None)
        .await
        .unwrap();

    // Declared schema kept, undeclared stream has nothing to describe it
    assert_eq!(result.streams.len(), 1);
    let contacts = result.stream("contacts").unwrap();
    assert_eq!(contacts.field_origin, FieldOrigin::Declared);
    assert_eq!(contacts.fields.len(), 2);
    assert_eq!(contacts.effective_key(), Some(vec!["id".to_string()]));
    assert!(result.sample_data("contacts").is_empty());

    let failed: Vec<&str> = result.failures.iter().map(|f| f.stream.as_str()).collect();
    assert_eq!(failed, vec!["contacts", "deals"]);
    assert_eq!(result.failures[0].kind, ErrorKind::Integration);
    assert_eq!(result.failures[0].message, "HTTP 500: boom");
}

#[tokio::test]
async fn test_unavailable_catalog_entry_is_a_stream_failure() {
    let connector = CannedConnector {
        streams: vec![
            CatalogStream::unavailable("broken_view", "Binder Error: table t does not exist"),
            declared_contacts(),
        ],
        ..CannedConnector::default()
    };

    let result = SchemaDiscoveryService::new()
        .discover(&connector, &handle(), None)
        .await
        .unwrap();

    assert_eq!(result.streams.len(), 1);
    assert_eq!(result.streams[0].name, "contacts");
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].stream, "broken_view");
    assert!(result.failures[0].message.contains("does not exist"));
}

#[tokio::test]
async fn test_discover_listing_failure_fails_source() {
    let connector = CannedConnector {
        fail_listing: true,
        ..CannedConnector::default()
    };

    let result = SchemaDiscoveryService::new()
        .discover(&connector, &handle(), None)
        .await;
    assert!(matches!(result, Err(Error::Authentication { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_discover_deadline_keeps_partial_result() {
    let connector = CannedConnector {
        streams: vec![CatalogStream::new("a"), CatalogStream::new("b")],
        delay: Duration::from_secs(5),
        ..CannedConnector::default()
    };
    let deadline = Instant::now() + Duration::from_secs(1);

    let result = SchemaDiscoveryService::new()
        .discover(&connector, &handle(), Some(deadline))
        .await
        .unwrap();

    assert!(result.timed_out);
    assert!(result.streams.is_empty());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].kind, ErrorKind::Timeout);
}
