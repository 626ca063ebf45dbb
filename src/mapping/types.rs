//! Field mapping types

use crate::reconcile::UnifiedEntity;
use crate::schema::JsonTypeOrArray;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

// ============================================================================
// Transforms
// ============================================================================

/// Caller-supplied transform; an `Err` becomes a field error
pub type TransformFn = dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync;

/// Caller-supplied predicate; an `Err` carries the rejection message
pub type ValidatorFn = dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync;

/// Named closure, so mappings stay `Debug`
pub struct Custom<F: ?Sized> {
    pub name: String,
    pub func: Arc<F>,
}

impl<F: ?Sized> Clone for Custom<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<F: ?Sized> std::fmt::Debug for Custom<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Custom({})", self.name)
    }
}

/// Value transform applied before validation
///
/// Written in config as a bare name (`lowercase`) or, for `default`, as a
/// single-key map (`{ default: free }`).
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "TransformDef")]
pub enum Transform {
    Trim,
    Lowercase,
    Uppercase,
    ToString,
    ToInteger,
    ToNumber,
    ToBoolean,
    /// RFC 3339 in UTC, from RFC 3339, `YYYY-MM-DD[ HH:MM:SS]` or epoch seconds/millis
    Timestamp,
    /// Integer minor units to a decimal amount
    CentsToUnits,
    /// Value used when the source field is absent; present values pass through
    Default(Value),
    Custom(Custom<TransformFn>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TransformDef {
    Named(String),
    Default { default: Value },
}

impl TryFrom<TransformDef> for Transform {
    type Error = String;

    fn try_from(def: TransformDef) -> std::result::Result<Self, Self::Error> {
        let name = match def {
            TransformDef::Default { default } => return Ok(Transform::Default(default)),
            TransformDef::Named(name) => name,
        };
        Ok(match name.as_str() {
            "trim" => Transform::Trim,
            "lowercase" => Transform::Lowercase,
            "uppercase" => Transform::Uppercase,
            "to_string" => Transform::ToString,
            "to_integer" => Transform::ToInteger,
            "to_number" => Transform::ToNumber,
            "to_boolean" => Transform::ToBoolean,
            "timestamp" => Transform::Timestamp,
            "cents_to_units" => Transform::CentsToUnits,
            other => return Err(format!("unknown transform '{other}'")),
        })
    }
}

impl Transform {
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Transform::Custom(Custom {
            name: name.into(),
            func: Arc::new(func),
        })
    }
}

// ============================================================================
// Validations
// ============================================================================

/// Compiled regular expression
#[derive(Debug, Clone)]
pub struct Pattern(pub Regex);

impl Pattern {
    pub fn new(pattern: &str) -> crate::error::Result<Self> {
        Regex::new(pattern)
            .map(Pattern)
            .map_err(|e| crate::error::Error::invalid_value("validate.regex", e.to_string()))
    }
}

/// Predicate run on the transformed value
///
/// Written in config as a bare name (`email`, `non_empty`) or a single-key
/// map (`{ enum: [free, pro] }`, `{ range: { min: 0 } }`).
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "ValidationDef")]
pub enum Validation {
    /// JSON type (or union of types)
    Type(JsonTypeOrArray),
    /// One of the listed values
    Enum(Vec<Value>),
    Regex(Pattern),
    Email,
    /// Not an empty string, array or object
    NonEmpty,
    /// Inclusive numeric bounds
    Range { min: Option<f64>, max: Option<f64> },
    Custom(Custom<ValidatorFn>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ValidationDef {
    Named(String),
    Type {
        #[serde(rename = "type")]
        json_type: JsonTypeOrArray,
    },
    Enum {
        #[serde(rename = "enum")]
        values: Vec<Value>,
    },
    Regex {
        regex: String,
    },
    Range {
        range: RangeDef,
    },
}

#[derive(Deserialize)]
struct RangeDef {
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl TryFrom<ValidationDef> for Validation {
    type Error = String;

    fn try_from(def: ValidationDef) -> std::result::Result<Self, Self::Error> {
        Ok(match def {
            ValidationDef::Named(name) => match name.as_str() {
                "email" => Validation::Email,
                "non_empty" => Validation::NonEmpty,
                other => return Err(format!("unknown validation '{other}'")),
            },
            ValidationDef::Type { json_type } => Validation::Type(json_type),
            ValidationDef::Enum { values } => Validation::Enum(values),
            ValidationDef::Regex { regex } => {
                Validation::Regex(Pattern(Regex::new(&regex).map_err(|e| e.to_string())?))
            }
            ValidationDef::Range { range } => Validation::Range {
                min: range.min,
                max: range.max,
            },
        })
    }
}

impl Validation {
    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Validation::Custom(Custom {
            name: name.into(),
            func: Arc::new(func),
        })
    }
}

// ============================================================================
// Mappings
// ============================================================================

/// Binds one inbound field to one stored field
#[derive(Debug, Clone, Deserialize)]
pub struct FieldMapping {
    /// Dotted path into the inbound record (`billing.address.city`)
    pub source: String,
    /// Name written to the output
    pub target: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub transform: Option<Transform>,
    #[serde(default)]
    pub validate: Option<Validation>,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            required: false,
            transform: None,
            validate: None,
        }
    }

    /// Same name on both sides
    pub fn identity(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(name.clone(), name)
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validate = Some(validation);
        self
    }
}

/// The mappings of one unified entity
#[derive(Debug, Clone, Default)]
pub struct EntityMapping {
    pub entity: String,
    pub fields: Vec<FieldMapping>,
}

impl EntityMapping {
    pub fn new(entity: impl Into<String>, fields: Vec<FieldMapping>) -> Self {
        Self {
            entity: entity.into(),
            fields,
        }
    }

    /// Identity mappings for every inbound field of an entity
    ///
    /// Required flags and type checks come from the unified field; isolation
    /// and audit fields are written by the store, not mapped.
    pub fn from_entity(entity: &UnifiedEntity) -> Self {
        let fields = entity
            .inbound_fields()
            .map(|field| {
                let mut mapping = FieldMapping::identity(field.name()).with_validation(
                    Validation::Type(JsonTypeOrArray::from_types(&field.descriptor.types)),
                );
                mapping.required = field.is_required();
                mapping
            })
            .collect();
        Self::new(&entity.name, fields)
    }

    /// Replace mappings targeting the same field, append the rest
    #[must_use]
    pub fn overlay(mut self, overrides: Vec<FieldMapping>) -> Self {
        for mapping in overrides {
            match self.fields.iter_mut().find(|f| f.target == mapping.target) {
                Some(existing) => *existing = mapping,
                None => self.fields.push(mapping),
            }
        }
        self
    }

    /// Fields the store needs that no mapping targets
    ///
    /// The store needs every required inbound field and every key field.
    pub fn missing_targets(&self, entity: &UnifiedEntity) -> Vec<String> {
        entity
            .inbound_fields()
            .filter(|f| f.is_required() || entity.primary_key.iter().any(|k| k == f.name()))
            .map(|f| f.name().to_string())
            .filter(|name| !self.fields.iter().any(|m| &m.target == name))
            .collect()
    }
}

// ============================================================================
// Results
// ============================================================================

/// Why a field failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    Missing,
    Transform,
    Validation,
}

/// One field-level problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Source path of the field
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Outcome of validating one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// `errors.is_empty()`
    pub valid: bool,
    pub errors: Vec<FieldError>,
    /// Fields that passed, under their target names
    pub transformed_data: Map<String, Value>,
}

impl ValidationResult {
    pub(crate) fn new(errors: Vec<FieldError>, transformed_data: Map<String, Value>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            transformed_data,
        }
    }

    /// Error messages, one per field problem
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    /// Whether a given source field has an error
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }
}
