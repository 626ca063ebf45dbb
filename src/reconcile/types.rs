//! Reconciliation types

use crate::schema::{DiscoveryResult, FieldDescriptor, JsonType, StreamDescriptor, StreamFailure};
use crate::types::HealthStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Default name of the tenant isolation field
pub const DEFAULT_ISOLATION_FIELD: &str = "tenant_id";
pub const CREATED_AT_FIELD: &str = "_created_at";
pub const UPDATED_AT_FIELD: &str = "_updated_at";

// ============================================================================
// Inputs
// ============================================================================

/// One (source, stream) pair
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntitySource {
    pub source: String,
    pub stream: String,
}

impl EntitySource {
    pub fn new(source: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stream: stream.into(),
        }
    }
}

impl std::fmt::Display for EntitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.stream)
    }
}

/// A stream waiting to be folded into a unified entity
#[derive(Debug, Clone)]
pub struct CandidateEntity {
    pub origin: EntitySource,
    pub descriptor: StreamDescriptor,
    pub samples: Vec<Value>,
}

impl CandidateEntity {
    pub fn new(source: impl Into<String>, descriptor: StreamDescriptor) -> Self {
        Self {
            origin: EntitySource::new(source, &descriptor.name),
            descriptor,
            samples: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_samples(mut self, samples: Vec<Value>) -> Self {
        self.samples = samples;
        self
    }

    /// Candidate name, `{provider}_{stream}`
    pub fn name(&self) -> String {
        format!("{}_{}", self.origin.source, self.origin.stream)
    }

    /// Non-null sampled values of a field
    pub fn sampled_values<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.samples
            .iter()
            .filter_map(move |record| record.get(field))
            .filter(|v| !v.is_null())
    }

    /// Candidates for every stream of a discovery result
    pub fn from_discovery(result: &DiscoveryResult) -> Vec<Self> {
        result
            .streams
            .iter()
            .map(|stream| {
                CandidateEntity::new(&result.provider, stream.clone())
                    .with_samples(result.sample_data(&stream.name))
            })
            .collect()
    }
}

// ============================================================================
// Unified schema
// ============================================================================

/// What a unified field is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Carried over from provider data
    #[default]
    Provider,
    /// Tenant isolation, injected
    Isolation,
    /// Write timestamps, injected
    Audit,
}

/// A field of a unified entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedField {
    #[serde(flatten)]
    pub descriptor: FieldDescriptor,
    pub role: FieldRole,
    #[serde(default)]
    pub indexed: bool,
    /// Streams that contributed this field
    #[serde(default)]
    pub origins: Vec<EntitySource>,
}

impl UnifiedField {
    pub fn provider(descriptor: FieldDescriptor, origin: EntitySource) -> Self {
        Self {
            descriptor,
            role: FieldRole::Provider,
            indexed: false,
            origins: vec![origin],
        }
    }

    pub(crate) fn isolation(name: &str) -> Self {
        Self {
            descriptor: FieldDescriptor::new(name, JsonType::String).required(),
            role: FieldRole::Isolation,
            indexed: true,
            origins: Vec::new(),
        }
    }

    pub(crate) fn audit(name: &str) -> Self {
        Self {
            descriptor: FieldDescriptor::new(name, JsonType::String).with_format("date-time"),
            role: FieldRole::Audit,
            indexed: false,
            origins: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_required(&self) -> bool {
        self.descriptor.required
    }

    /// Supplied by inbound records rather than injected
    pub fn is_inbound(&self) -> bool {
        self.role == FieldRole::Provider
    }
}

/// A tenant-scoped logical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedEntity {
    pub name: String,
    pub sources: Vec<EntitySource>,
    pub fields: Vec<UnifiedField>,
    /// Key of the entity within a tenant; empty when none could be derived
    #[serde(default)]
    pub primary_key: Vec<String>,
    pub isolation_field: String,
}

impl UnifiedEntity {
    pub fn field(&self, name: &str) -> Option<&UnifiedField> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(UnifiedField::name).collect()
    }

    /// Fields supplied by inbound records
    pub fn inbound_fields(&self) -> impl Iterator<Item = &UnifiedField> {
        self.fields.iter().filter(|f| f.is_inbound())
    }

    /// Fields with a storage index
    pub fn indexed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.indexed)
            .map(UnifiedField::name)
            .collect()
    }

    /// The single-column key, if the entity has one
    pub fn single_key(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [key] => Some(key.as_str()),
            _ => None,
        }
    }
}

/// Cardinality of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

/// Directed edge from a referenced entity to the entity referencing it
///
/// `from_fields` are key fields on `from`; `to_fields` are the matching
/// reference fields on `to`. Many-to-many edges name the join entity in `via`
/// and both field lists refer to its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossEntityRelationship {
    pub from: String,
    pub to: String,
    pub kind: RelationshipKind,
    pub from_fields: Vec<String>,
    pub to_fields: Vec<String>,
    /// `from` owns `to`; ownership edges must stay acyclic
    pub ownership: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

// ============================================================================
// Report
// ============================================================================

/// Per-source summary carried in the report
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceStatus {
    pub health: HealthStatus,
    pub streams: usize,
    #[serde(default)]
    pub failures: Vec<StreamFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of one reconciliation run; never mutated after it is built
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub tenant_id: String,
    pub entities: Vec<UnifiedEntity>,
    pub relationships: Vec<CrossEntityRelationship>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceStatus>,
    #[serde(default)]
    pub timed_out: bool,
}

impl ReconciliationReport {
    pub fn entity(&self, name: &str) -> Option<&UnifiedEntity> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// No structural errors and no timeout
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.timed_out
    }

    /// Entity names, sorted
    pub fn entity_names(&self) -> BTreeSet<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }
}
