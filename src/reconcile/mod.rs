//! Cross-source schema reconciliation
//!
//! Merges the discovered streams of every source of a tenant into one set of
//! unified entities with tenant isolation, audit fields and inferred
//! relationships. Structural problems (ambiguous references, ownership
//! cycles) are reported, never resolved silently.

mod graph;
mod matcher;
mod reconciler;
mod types;

pub use graph::{describe_cycle, ownership_cycles};
pub use matcher::{
    default_matcher, normalize_name, singular, CompositeMatcher, EntityMatcher, EquivalenceClass,
    ExplicitMatcher, KeyOverlapMatcher, MatcherConfig, NameSimilarityMatcher,
};
pub use reconciler::SchemaReconciler;
pub use types::{
    CandidateEntity, CrossEntityRelationship, EntitySource, FieldRole, ReconciliationReport,
    RelationshipKind, SourceStatus, UnifiedEntity, UnifiedField, CREATED_AT_FIELD,
    DEFAULT_ISOLATION_FIELD, UPDATED_AT_FIELD,
};

#[cfg(test)]
mod tests;
