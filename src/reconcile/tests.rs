//! Reconciliation tests

use super::*;
use crate::error::ErrorKind;
use crate::sampling::SampleRecord;
use crate::schema::{
    DiscoveryResult, FieldDescriptor, JsonType, StreamDescriptor, StreamFailure,
};
use chrono::Utc;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use test_case::test_case;

fn stream(name: &str, fields: &[(&str, JsonType)]) -> StreamDescriptor {
    fields.iter().fold(StreamDescriptor::new(name), |s, (field, t)| {
        s.with_field(FieldDescriptor::new(*field, *t).required())
    })
}

fn keyed(name: &str, fields: &[(&str, JsonType)]) -> StreamDescriptor {
    stream(name, fields).with_primary_key(&["id"])
}

fn candidate(source: &str, descriptor: StreamDescriptor) -> CandidateEntity {
    CandidateEntity::new(source, descriptor)
}

fn crm_billing() -> Vec<CandidateEntity> {
    vec![
        candidate(
            "crm",
            keyed("contacts", &[("id", JsonType::String), ("email", JsonType::String)]),
        ),
        candidate(
            "billing",
            keyed(
                "customers",
                &[
                    ("id", JsonType::String),
                    ("email", JsonType::String),
                    ("plan", JsonType::String),
                ],
            ),
        ),
    ]
}

fn explicit(groups: Vec<EquivalenceClass>) -> SchemaReconciler {
    SchemaReconciler::new().with_matcher(Arc::new(ExplicitMatcher::new(groups)))
}

// ============================================================================
// Entity folding
// ============================================================================

#[test]
fn test_crm_billing_end_to_end() {
    let report = SchemaReconciler::new().reconcile_candidates("acme", crm_billing());

    assert_eq!(report.entities.len(), 1);
    let contact = report.entity("contact").unwrap();

    let provider_fields: BTreeSet<&str> = contact.inbound_fields().map(UnifiedField::name).collect();
    assert_eq!(provider_fields, BTreeSet::from(["id", "email", "plan"]));
    assert!(contact.field("tenant_id").is_some());
    assert_eq!(
        contact.sources,
        vec![
            EntitySource::new("crm", "contacts"),
            EntitySource::new("billing", "customers"),
        ]
    );

    let tenant = contact.field("tenant_id").unwrap();
    assert!(tenant.is_required());
    assert!(tenant.indexed);
    assert_eq!(tenant.role, FieldRole::Isolation);
    assert_eq!(contact.isolation_field, "tenant_id");
    assert_eq!(
        contact
            .fields
            .iter()
            .filter(|f| f.role == FieldRole::Isolation)
            .count(),
        1
    );

    assert_eq!(contact.field(CREATED_AT_FIELD).unwrap().role, FieldRole::Audit);
    assert_eq!(contact.field(UPDATED_AT_FIELD).unwrap().role, FieldRole::Audit);
    assert_eq!(contact.primary_key, vec!["id".to_string()]);

    // Only billing carries a plan
    assert!(!contact.field("plan").unwrap().is_required());
    assert!(contact.field("email").unwrap().is_required());
    assert_eq!(contact.field("email").unwrap().origins.len(), 2);
    assert!(report.errors.is_empty());
}

#[test]
fn test_every_source_field_survives() {
    let mut candidates = crm_billing();
    candidates.push(candidate(
        "crm",
        keyed(
            "deals",
            &[("id", JsonType::Integer), ("amount", JsonType::Number)],
        ),
    ));
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates.clone());

    for candidate in &candidates {
        let entity = report
            .entities
            .iter()
            .find(|e| e.sources.contains(&candidate.origin))
            .unwrap();
        for field in &candidate.descriptor.fields {
            assert!(
                entity.field(&field.name).is_some(),
                "{} lost {}",
                candidate.origin,
                field.name
            );
        }
    }
    // Each candidate lands in exactly one entity
    let placed: usize = report.entities.iter().map(|e| e.sources.len()).sum();
    assert_eq!(placed, candidates.len());
}

#[test]
fn test_reconciliation_is_deterministic() {
    let mut candidates = crm_billing();
    candidates[0].samples = vec![json!({"id": "c1", "email": "a@x.io"})];
    candidates.push(candidate(
        "crm",
        keyed(
            "deals",
            &[("id", JsonType::String), ("contact_id", JsonType::String)],
        ),
    ));

    let reconciler = SchemaReconciler::new();
    let first = reconciler.reconcile_candidates("acme", candidates.clone());
    let second = reconciler.reconcile_candidates("acme", candidates);
    assert_eq!(first, second);
}

#[test]
fn test_conflicting_types_widen_to_union() {
    let candidates = vec![
        candidate("crm", keyed("contacts", &[("id", JsonType::Integer), ("email", JsonType::String)])),
        candidate("billing", keyed("customers", &[("id", JsonType::String), ("email", JsonType::String)])),
    ];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    let id = report.entity("contact").unwrap().field("id").unwrap();
    assert_eq!(
        id.descriptor.types,
        BTreeSet::from([JsonType::Integer, JsonType::String])
    );
}

#[test]
fn test_isolation_field_wins_over_provider_field() {
    let candidates = vec![candidate(
        "crm",
        keyed(
            "contacts",
            &[("id", JsonType::String), ("tenant_id", JsonType::Integer)],
        ),
    )];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    let entity = report.entity("crm_contacts").unwrap();
    let tenant = entity.field("tenant_id").unwrap();
    assert_eq!(tenant.role, FieldRole::Isolation);
    assert_eq!(tenant.descriptor.types, BTreeSet::from([JsonType::String]));
    assert_eq!(entity.fields.iter().filter(|f| f.name() == "tenant_id").count(), 1);
    assert!(report.warnings.iter().any(|w| w.contains("crm/contacts") && w.contains("tenant_id")));
}

#[test]
fn test_custom_isolation_field() {
    let report = SchemaReconciler::new()
        .with_isolation_field("org_id")
        .reconcile_candidates("acme", crm_billing());

    let contact = report.entity("contact").unwrap();
    assert_eq!(contact.isolation_field, "org_id");
    assert_eq!(contact.indexed_fields(), vec!["org_id"]);
    assert!(contact.field("tenant_id").is_none());
}

#[test]
fn test_chained_proposals_fold_into_one_entity() {
    let candidates = vec![
        candidate("a", keyed("people", &[("id", JsonType::String)])),
        candidate("b", keyed("persons", &[("id", JsonType::String)])),
        candidate("c", keyed("users", &[("id", JsonType::String)])),
    ];
    let reconciler = explicit(vec![
        EquivalenceClass::new(["a_people", "b_persons"]),
        EquivalenceClass::new(["b/persons", "c/users"]),
    ]);
    let report = reconciler.reconcile_candidates("acme", candidates);

    assert_eq!(report.entities.len(), 1);
    assert_eq!(report.entities[0].name, "people");
    assert_eq!(report.entities[0].sources.len(), 3);
}

#[test]
fn test_explicit_name_and_unknown_members() {
    let reconciler = explicit(vec![
        EquivalenceClass::new(["crm_contacts", "billing_customers", "erp_accounts"]).named("party"),
    ]);
    let report = reconciler.reconcile_candidates("acme", crm_billing());

    assert_eq!(report.entity_names(), BTreeSet::from(["party"]));
    assert!(report.warnings.iter().any(|w| w.contains("erp_accounts")));
}

#[test]
fn test_name_collisions_are_suffixed() {
    let candidates = vec![
        candidate("crm", keyed("contacts", &[("id", JsonType::String)])),
        candidate("billing", keyed("customers", &[("id", JsonType::String)])),
        candidate("erp", keyed("contact", &[("id", JsonType::String)])),
        candidate("hr", keyed("people", &[("id", JsonType::String)])),
    ];
    let reconciler = explicit(vec![
        EquivalenceClass::new(["crm_contacts", "billing_customers"]),
        EquivalenceClass::new(["erp_contact", "hr_people"]),
    ]);
    let report = reconciler.reconcile_candidates("acme", candidates);

    assert_eq!(report.entity_names(), BTreeSet::from(["contact", "contact_2"]));
    assert!(report.warnings.iter().any(|w| w.contains("contact_2")));
}

// ============================================================================
// Relationships
// ============================================================================

#[test]
fn test_reference_becomes_ownership_relationship() {
    let candidates = vec![
        candidate("crm", keyed("contacts", &[("id", JsonType::String)])),
        candidate(
            "crm",
            keyed(
                "deals",
                &[("id", JsonType::String), ("contact_id", JsonType::String)],
            ),
        ),
    ];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    assert_eq!(
        report.relationships,
        vec![CrossEntityRelationship {
            from: "crm_contacts".to_string(),
            to: "crm_deals".to_string(),
            kind: RelationshipKind::OneToMany,
            from_fields: vec!["id".to_string()],
            to_fields: vec!["contact_id".to_string()],
            ownership: true,
            via: None,
        }]
    );
    let deals = report.entity("crm_deals").unwrap();
    assert!(deals.field("contact_id").unwrap().indexed);
    assert!(report.errors.is_empty());
}

#[test]
fn test_reference_through_folded_alias() {
    let mut candidates = crm_billing();
    candidates.push(candidate(
        "billing",
        keyed(
            "invoices",
            &[("id", JsonType::String), ("customer_id", JsonType::String)],
        ),
    ));
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    let rel = &report.relationships[0];
    assert_eq!(rel.from, "contact");
    assert_eq!(rel.to, "billing_invoices");
}

#[test]
fn test_one_to_one_when_reference_is_the_key() {
    let candidates = vec![
        candidate("crm", keyed("users", &[("id", JsonType::String)])),
        candidate(
            "crm",
            stream("profiles", &[("user_id", JsonType::String), ("bio", JsonType::String)])
                .with_primary_key(&["user_id"]),
        ),
    ];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    assert_eq!(report.relationships.len(), 1);
    let rel = &report.relationships[0];
    assert_eq!(rel.kind, RelationshipKind::OneToOne);
    assert_eq!(rel.from, "crm_users");
    assert_eq!(rel.to, "crm_profiles");
    assert!(rel.ownership);
}

#[test]
fn test_own_key_column_is_not_a_reference() {
    let candidates = vec![candidate(
        "erp",
        stream(
            "contacts",
            &[("contact_id", JsonType::Integer), ("name", JsonType::String)],
        )
        .with_primary_key(&["contact_id"]),
    )];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    assert!(report.relationships.is_empty());
    assert!(report.warnings.is_empty());
}

#[test]
fn test_unresolved_and_ambiguous_references_warn() {
    let candidates = vec![
        candidate("a", keyed("users", &[("id", JsonType::String)])),
        candidate("b", keyed("users", &[("id", JsonType::String)])),
        candidate(
            "c",
            keyed(
                "orders",
                &[
                    ("id", JsonType::String),
                    ("user_id", JsonType::String),
                    ("coupon_id", JsonType::String),
                ],
            ),
        ),
    ];
    let report = SchemaReconciler::new()
        .with_matcher(Arc::new(KeyOverlapMatcher::default()))
        .reconcile_candidates("acme", candidates);

    assert!(report.relationships.is_empty());
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("c_orders.user_id") && w.contains("ambiguous")));
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("c_orders.coupon_id") && w.contains("no entity")));
    assert!(report.errors.is_empty());
}

#[test]
fn test_ownership_cycle_is_an_error() {
    let candidates = vec![
        candidate(
            "x",
            keyed("alphas", &[("id", JsonType::String), ("beta_id", JsonType::String)]),
        ),
        candidate(
            "x",
            keyed("betas", &[("id", JsonType::String), ("alpha_id", JsonType::String)]),
        ),
    ];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    assert_eq!(report.relationships.len(), 2);
    assert_eq!(
        report.errors,
        vec!["circular ownership: x_alphas -> x_betas -> x_alphas".to_string()]
    );
    assert!(!report.is_clean());
}

#[test]
fn test_self_reference_is_not_ownership() {
    let candidates = vec![candidate(
        "org",
        keyed("nodes", &[("id", JsonType::String), ("node_id", JsonType::String)]),
    )];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    assert_eq!(report.relationships.len(), 1);
    assert!(!report.relationships[0].ownership);
    assert_eq!(report.relationships[0].from, report.relationships[0].to);
    assert!(report.errors.is_empty());
}

#[test]
fn test_join_entity_yields_many_to_many() {
    let candidates = vec![
        candidate("lms", keyed("students", &[("id", JsonType::String)])),
        candidate("lms", keyed("courses", &[("id", JsonType::String)])),
        candidate(
            "lms",
            keyed(
                "enrollments",
                &[
                    ("id", JsonType::String),
                    ("student_id", JsonType::String),
                    ("course_id", JsonType::String),
                ],
            ),
        ),
    ];
    let report = SchemaReconciler::new().reconcile_candidates("acme", candidates);

    let many: Vec<&CrossEntityRelationship> = report
        .relationships
        .iter()
        .filter(|r| r.kind == RelationshipKind::ManyToMany)
        .collect();
    assert_eq!(many.len(), 1);
    assert_eq!(many[0].from, "lms_students");
    assert_eq!(many[0].to, "lms_courses");
    assert_eq!(many[0].via.as_deref(), Some("lms_enrollments"));
    assert!(!many[0].ownership);
    assert_eq!(report.relationships.len(), 3);
}

#[test]
fn test_ownership_cycles_ignore_non_ownership_edges() {
    let edge = |from: &str, to: &str, ownership: bool| CrossEntityRelationship {
        from: from.to_string(),
        to: to.to_string(),
        kind: RelationshipKind::OneToMany,
        from_fields: vec!["id".to_string()],
        to_fields: vec![format!("{from}_id")],
        ownership,
        via: None,
    };

    let edges = vec![edge("c", "a", true), edge("a", "b", true), edge("b", "c", true)];
    assert_eq!(
        ownership_cycles(&edges),
        vec![vec!["a", "b", "c", "a"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()]
    );

    let edges = vec![edge("a", "b", true), edge("b", "a", false)];
    assert!(ownership_cycles(&edges).is_empty());
}

#[test]
fn test_ownership_chain_without_return_edge_is_not_a_cycle() {
    let edge = |from: &str, to: &str| CrossEntityRelationship {
        from: from.to_string(),
        to: to.to_string(),
        kind: RelationshipKind::OneToMany,
        from_fields: vec!["id".to_string()],
        to_fields: vec![format!("{from}_id")],
        ownership: true,
        via: None,
    };

    assert!(ownership_cycles(&[edge("a", "b"), edge("b", "c")]).is_empty());
    // Two owners of the same entity are still acyclic
    assert!(ownership_cycles(&[edge("a", "b"), edge("b", "c"), edge("a", "c")]).is_empty());
    assert_eq!(ownership_cycles(&[edge("a", "b"), edge("b", "c"), edge("c", "a")]).len(), 1);
}

// ============================================================================
// Matchers
// ============================================================================

#[test_case("contacts", "contact")]
#[test_case("companies", "company")]
#[test_case("addresses", "address")]
#[test_case("boxes", "box")]
#[test_case("matches", "match")]
#[test_case("class", "class")]
#[test_case("people", "people")]
fn test_singular(plural: &str, expected: &str) {
    assert_eq!(singular(plural), expected);
}

#[test]
fn test_name_similarity_matcher() {
    let candidates = vec![
        candidate("crm", stream("Contacts", &[])),
        candidate("erp", stream("contact", &[])),
        candidate("billing", stream("customers", &[])),
    ];

    let plain = NameSimilarityMatcher::new().propose(&candidates);
    assert_eq!(plain, vec![EquivalenceClass::new(["crm_Contacts", "erp_contact"])]);

    let with_synonym = NameSimilarityMatcher::new()
        .with_synonym("customers", "contacts")
        .propose(&candidates);
    assert_eq!(with_synonym[0].members.len(), 3);
}

#[test]
fn test_key_overlap_uses_samples_when_present() {
    let contacts = stream("contacts", &[("email", JsonType::String)]);
    let customers = stream("customers", &[("email", JsonType::String)]);
    let matcher = KeyOverlapMatcher::default();

    let overlapping = vec![
        candidate("crm", contacts.clone()).with_samples(vec![json!({"email": "Ann@X.io "})]),
        candidate("billing", customers.clone()).with_samples(vec![json!({"email": "ann@x.io"})]),
    ];
    assert_eq!(matcher.propose(&overlapping).len(), 1);

    let disjoint = vec![
        candidate("crm", contacts.clone()).with_samples(vec![json!({"email": "ann@x.io"})]),
        candidate("billing", customers).with_samples(vec![json!({"email": "bob@x.io"})]),
    ];
    assert!(matcher.propose(&disjoint).is_empty());

    // Same source never folds
    let same_source = vec![
        candidate("crm", contacts.clone()),
        candidate("crm", stream("leads", &[("email", JsonType::String)])),
    ];
    assert!(matcher.propose(&same_source).is_empty());
}

#[test]
fn test_matcher_config_from_yaml() {
    let config: MatcherConfig = serde_yaml::from_str("{ kind: key_overlap, keys: [email] }").unwrap();
    assert_eq!(
        config,
        MatcherConfig::KeyOverlap {
            keys: vec!["email".to_string()]
        }
    );
    assert_eq!(config.build().unwrap().name(), "key_overlap");

    let composite: MatcherConfig = serde_yaml::from_str(
        r#"
kind: composite
matchers:
  - kind: name_similarity
    synonyms: { customers: contacts }
  - kind: explicit
    groups:
      - { members: [crm/contacts, billing/customers], name: contact }
"#,
    )
    .unwrap();
    assert_eq!(composite.build().unwrap().name(), "composite");

    let empty = MatcherConfig::KeyOverlap { keys: vec![] };
    assert!(empty.build().is_err());
}

// ============================================================================
// Discovery input
// ============================================================================

fn discovery(provider: &str, streams: Vec<StreamDescriptor>) -> DiscoveryResult {
    DiscoveryResult {
        provider: provider.to_string(),
        streams,
        ..DiscoveryResult::default()
    }
}

#[test]
fn test_reconcile_discovery_results() {
    let mut crm = discovery(
        "crm",
        vec![keyed("contacts", &[("id", JsonType::String), ("email", JsonType::String)])],
    );
    crm.failures.push(StreamFailure {
        stream: "deals".to_string(),
        kind: ErrorKind::Integration,
        message: "HTTP 500: boom".to_string(),
    });
    crm.failures.push(StreamFailure {
        stream: "contacts".to_string(),
        kind: ErrorKind::Timeout,
        message: "sample timed out".to_string(),
    });
    let samples: Vec<SampleRecord> = vec![json!({"id": "1", "email": "a@x.io"})]
        .into_iter()
        .map(|data: Value| SampleRecord {
            source: "crm".to_string(),
            stream: "contacts".to_string(),
            fetched_at: Utc::now(),
            data,
        })
        .collect();
    crm.samples = BTreeMap::from([("contacts".to_string(), samples)]);

    let billing = discovery(
        "billing",
        vec![keyed(
            "customers",
            &[("id", JsonType::String), ("email", JsonType::String), ("plan", JsonType::String)],
        )],
    );

    let report = SchemaReconciler::new().reconcile("acme", &[crm, billing]);

    assert_eq!(report.tenant_id, "acme");
    assert!(report.entity("contact").is_some());
    assert_eq!(report.warnings[0], "crm/deals: stream skipped: HTTP 500: boom");
    assert_eq!(
        report.warnings[1],
        "crm/contacts: sampling failed, declared schema kept: sample timed out"
    );
    assert_eq!(report.sources["crm"].streams, 1);
    assert_eq!(report.sources["crm"].failures.len(), 2);
    assert!(report.sources["billing"].failures.is_empty());
    assert!(!report.timed_out);
}

#[test]
fn test_report_serializes() {
    let report = SchemaReconciler::new().reconcile_candidates("acme", crm_billing());
    let value = serde_json::to_value(&report).unwrap();

    assert_eq!(value["tenant_id"], json!("acme"));
    assert_eq!(value["entities"][0]["name"], json!("contact"));
    let fields = value["entities"][0]["fields"].as_array().unwrap();
    let tenant = fields.iter().find(|f| f["name"] == json!("tenant_id")).unwrap();
    assert_eq!(tenant["role"], json!("isolation"));
    assert_eq!(tenant["indexed"], json!(true));

    let back: ReconciliationReport = serde_json::from_value(value).unwrap();
    assert_eq!(back, report);
}
