//! Schema types

use crate::error::{Error, Result};
use crate::types::SyncMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Primitive JSON type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Null,
}

impl JsonType {
    /// Type of a concrete JSON value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => JsonType::Null,
            Value::Bool(_) => JsonType::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => JsonType::Integer,
            Value::Number(_) => JsonType::Number,
            Value::String(_) => JsonType::String,
            Value::Array(_) => JsonType::Array,
            Value::Object(_) => JsonType::Object,
        }
    }

    /// Whether a value of type `other` is acceptable where `self` is declared
    pub fn accepts(self, other: JsonType) -> bool {
        self == other || (self == JsonType::Number && other == JsonType::Integer)
    }
}

impl std::fmt::Display for JsonType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JsonType::String => write!(f, "string"),
            JsonType::Number => write!(f, "number"),
            JsonType::Integer => write!(f, "integer"),
            JsonType::Boolean => write!(f, "boolean"),
            JsonType::Object => write!(f, "object"),
            JsonType::Array => write!(f, "array"),
            JsonType::Null => write!(f, "null"),
        }
    }
}

/// JSON Schema `type` keyword: a single type or an array of types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonTypeOrArray {
    Single(JsonType),
    Multiple(Vec<JsonType>),
}

impl JsonTypeOrArray {
    /// The set of types named
    pub fn types(&self) -> BTreeSet<JsonType> {
        match self {
            JsonTypeOrArray::Single(t) => BTreeSet::from([*t]),
            JsonTypeOrArray::Multiple(types) => types.iter().copied().collect(),
        }
    }

    /// Check if null is among the types
    pub fn is_nullable(&self) -> bool {
        self.types().contains(&JsonType::Null)
    }

    /// Compact form of a type set
    pub fn from_types(types: &BTreeSet<JsonType>) -> Self {
        if types.len() == 1 {
            if let Some(t) = types.iter().next() {
                return JsonTypeOrArray::Single(*t);
            }
        }
        JsonTypeOrArray::Multiple(types.iter().copied().collect())
    }
}

// ============================================================================
// Field & Stream Descriptors
// ============================================================================

/// One field of a stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Never empty; `Null` marks a nullable field
    pub types: BTreeSet<JsonType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl FieldDescriptor {
    /// Create a non-null, optional field
    pub fn new(name: impl Into<String>, json_type: JsonType) -> Self {
        Self {
            name: name.into(),
            types: BTreeSet::from([json_type]),
            format: None,
            required: false,
        }
    }

    /// Create a field from a type set; an empty set is rejected
    pub fn with_types(name: impl Into<String>, types: BTreeSet<JsonType>) -> Result<Self> {
        let name = name.into();
        if types.is_empty() {
            return Err(Error::SchemaInference {
                message: format!("field '{name}' has no type"),
            });
        }
        Ok(Self {
            name,
            types,
            format: None,
            required: false,
        })
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.types.insert(JsonType::Null);
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn is_nullable(&self) -> bool {
        self.types.contains(&JsonType::Null)
    }

    /// First non-null type, if any
    pub fn primary_type(&self) -> Option<JsonType> {
        self.types.iter().copied().find(|t| *t != JsonType::Null)
    }

    /// Merge another descriptor of the same field
    ///
    /// Types widen to the union, required only if both are required, and a
    /// format survives only when both agree.
    pub fn merge(&mut self, other: &FieldDescriptor) {
        self.types.extend(other.types.iter().copied());
        self.required = self.required && other.required;
        if self.format != other.format {
            self.format = None;
        }
    }

    /// Check a value against the declared types
    pub fn accepts(&self, value: &Value) -> bool {
        let actual = JsonType::of(value);
        self.types.iter().any(|t| t.accepts(actual))
    }

    /// JSON Schema property for this field
    pub fn to_json_schema(&self) -> Value {
        let mut property = Map::new();
        property.insert(
            "type".to_string(),
            serde_json::to_value(JsonTypeOrArray::from_types(&self.types)).unwrap_or(Value::Null),
        );
        if let Some(format) = &self.format {
            property.insert("format".to_string(), Value::String(format.clone()));
        }
        Value::Object(property)
    }
}

/// Where a stream's fields came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    /// Declared in the source's catalog
    #[default]
    Declared,
    /// Inferred from sampled records
    Inferred,
}

/// Structural description of one stream, captured at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Ordered field list; may be empty
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub sync_modes: Vec<SyncMode>,
    /// Fields that could serve as a key, best first
    #[serde(default)]
    pub candidate_keys: Vec<String>,
    pub field_origin: FieldOrigin,
    pub discovered_at: DateTime<Utc>,
}

impl StreamDescriptor {
    /// Create a descriptor with no fields
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            fields: Vec::new(),
            primary_key: None,
            cursor_field: None,
            sync_modes: vec![SyncMode::FullRefresh],
            candidate_keys: Vec::new(),
            field_origin: FieldOrigin::Declared,
            discovered_at: Utc::now(),
        }
    }

    /// Add a field
    #[must_use]
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the declared primary key
    #[must_use]
    pub fn with_primary_key(mut self, key: &[&str]) -> Self {
        self.primary_key = Some(key.iter().map(|k| (*k).to_string()).collect());
        self
    }

    /// Look up a field
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Key used to identify records: declared primary key, else an `id` field
    ///
    /// Fields that were merely unique within the sample stay candidates and
    /// never identify records.
    pub fn effective_key(&self) -> Option<Vec<String>> {
        self.primary_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| self.field("id").map(|f| vec![f.name.clone()]))
    }

    /// Render as a JSON Schema object
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name.clone(), f.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "title": self.name,
            "properties": properties,
            "required": required,
        })
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A stream as listed by a connector, before discovery interprets it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogStream {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    /// Declared JSON Schema; `None` when the source publishes no schema
    #[serde(default)]
    pub json_schema: Option<Value>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub cursor_field: Option<String>,
    #[serde(default)]
    pub sync_modes: Vec<SyncMode>,
    /// Why the connector could not describe this stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CatalogStream {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            json_schema: None,
            primary_key: Vec::new(),
            cursor_field: None,
            sync_modes: Vec::new(),
            error: None,
        }
    }

    /// A listed stream the connector failed to describe
    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.json_schema = Some(schema);
        self
    }
}

/// Streams exposed by one source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub streams: Vec<CatalogStream>,
}

impl Catalog {
    pub fn new(streams: Vec<CatalogStream>) -> Self {
        Self { streams }
    }
}

/// Read field descriptors out of a JSON Schema object
///
/// Properties come back in key order. A property without a `type` keyword
/// is typed as `string`.
pub fn fields_from_json_schema(schema: &Value) -> Result<Vec<FieldDescriptor>> {
    let Some(object) = schema.as_object() else {
        return Err(Error::SchemaInference {
            message: "schema must be a JSON object".to_string(),
        });
    };
    let required: BTreeSet<&str> = object
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(properties) = object.get("properties") else {
        return Ok(Vec::new());
    };
    let properties = properties.as_object().ok_or_else(|| Error::SchemaInference {
        message: "'properties' must be an object".to_string(),
    })?;

    properties
        .iter()
        .map(|(name, property)| {
            let types = match property.get("type") {
                Some(t) => serde_json::from_value::<JsonTypeOrArray>(t.clone())
                    .map_err(|e| Error::SchemaInference {
                        message: format!("field '{name}': {e}"),
                    })?
                    .types(),
                None => BTreeSet::from([JsonType::String]),
            };
            let mut field = FieldDescriptor::with_types(name, types)?;
            field.format = property
                .get("format")
                .and_then(Value::as_str)
                .map(String::from);
            field.required = required.contains(name.as_str());
            Ok(field)
        })
        .collect()
}
