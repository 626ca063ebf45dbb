//! Schema inference from sampled records

use super::types::{FieldDescriptor, JsonType};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

static DATETIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .unwrap()
});
pub(crate) static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Infers field descriptors from semi-structured records
#[derive(Debug, Clone)]
pub struct SchemaInferrer {
    detect_formats: bool,
}

impl Default for SchemaInferrer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct FieldStats {
    types: BTreeSet<JsonType>,
    seen: usize,
    formats: BTreeSet<Option<&'static str>>,
}

impl SchemaInferrer {
    /// Create an inferrer with format detection enabled
    pub fn new() -> Self {
        Self {
            detect_formats: true,
        }
    }

    /// Enable/disable format detection
    #[must_use]
    pub fn with_format_detection(mut self, enabled: bool) -> Self {
        self.detect_formats = enabled;
        self
    }

    /// Infer top-level fields from a batch of records
    ///
    /// Fields keep first-seen order. A field is required only when it is
    /// present and non-null in every record; one missing from any record
    /// gains `null` in its type set. Non-object records are ignored.
    pub fn infer_fields(&self, records: &[Value]) -> Vec<FieldDescriptor> {
        let mut order: Vec<String> = Vec::new();
        let mut stats: BTreeMap<String, FieldStats> = BTreeMap::new();
        let mut record_count = 0usize;

        for record in records {
            let Value::Object(map) = record else { continue };
            record_count += 1;

            for (key, value) in map {
                let entry = stats.entry(key.clone()).or_insert_with(|| {
                    order.push(key.clone());
                    FieldStats::default()
                });
                entry.seen += 1;
                entry.types.insert(JsonType::of(value));
                if let Value::String(s) = value {
                    entry.formats.insert(self.detect_format(s));
                }
            }
        }

        order
            .into_iter()
            .filter_map(|name| {
                let mut field_stats = stats.remove(&name)?;
                if field_stats.seen < record_count {
                    field_stats.types.insert(JsonType::Null);
                }
                let required = !field_stats.types.contains(&JsonType::Null);
                // A format is kept only when every string value agreed on it
                let format = match field_stats.formats.len() {
                    1 => field_stats.formats.into_iter().next().flatten(),
                    _ => None,
                };

                Some(FieldDescriptor {
                    name,
                    types: field_stats.types,
                    format: format.map(String::from),
                    required,
                })
            })
            .collect()
    }

    fn detect_format(&self, s: &str) -> Option<&'static str> {
        if !self.detect_formats {
            return None;
        }
        if DATETIME_RE.is_match(s) {
            Some("date-time")
        } else if DATE_RE.is_match(s) {
            Some("date")
        } else if s.starts_with("http://") || s.starts_with("https://") {
            Some("uri")
        } else if UUID_RE.is_match(s) {
            Some("uuid")
        } else if EMAIL_RE.is_match(s) {
            Some("email")
        } else {
            None
        }
    }
}

/// Derive candidate key fields, best first
///
/// Order: the declared primary key (single column), then `id`, then any
/// other field whose sampled values are all present, scalar and unique.
pub fn candidate_keys(
    fields: &[FieldDescriptor],
    records: &[Value],
    declared: &[String],
) -> Vec<String> {
    let mut keys = Vec::new();
    if let [single] = declared {
        keys.push(single.clone());
    }
    if fields.iter().any(|f| f.name == "id") && !keys.iter().any(|k| k == "id") {
        keys.push("id".to_string());
    }
    if records.is_empty() {
        return keys;
    }

    for field in fields {
        if keys.contains(&field.name) {
            continue;
        }
        if is_unique_scalar(&field.name, records) {
            keys.push(field.name.clone());
        }
    }
    keys
}

fn is_unique_scalar(field: &str, records: &[Value]) -> bool {
    let mut seen = HashSet::with_capacity(records.len());
    records.iter().all(|record| match record.get(field) {
        Some(value @ (Value::String(_) | Value::Number(_))) => seen.insert(value.to_string()),
        _ => false,
    })
}
