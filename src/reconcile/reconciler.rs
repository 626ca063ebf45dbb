//! Schema reconciliation
//!
//! Folds the streams of every tenant source into unified entities:
//!
//! 1. one candidate per (source, stream)
//! 2. matcher proposals normalised into disjoint classes (union-find)
//! 3. fields merged by name, types widened to the union
//! 4. isolation and audit fields injected
//! 5. `*_id` references resolved into relationships
//! 6. ownership cycles reported as errors
//!
//! The same input always yields the same report.

use super::graph::{describe_cycle, ownership_cycles};
use super::matcher::{default_matcher, singular, EntityMatcher};
use super::types::{
    CandidateEntity, CrossEntityRelationship, ReconciliationReport,
    RelationshipKind, SourceStatus, UnifiedEntity, UnifiedField, CREATED_AT_FIELD,
    DEFAULT_ISOLATION_FIELD, UPDATED_AT_FIELD,
};
use crate::schema::DiscoveryResult;
use crate::types::HealthStatus;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Merges per-source schemas into one tenant schema
#[derive(Clone)]
pub struct SchemaReconciler {
    matcher: Arc<dyn EntityMatcher>,
    isolation_field: String,
}

impl Default for SchemaReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaReconciler")
            .field("matcher", &self.matcher.name())
            .field("isolation_field", &self.isolation_field)
            .finish()
    }
}

impl SchemaReconciler {
    /// Reconciler with the default matcher and `tenant_id` isolation
    pub fn new() -> Self {
        Self {
            matcher: default_matcher(),
            isolation_field: DEFAULT_ISOLATION_FIELD.to_string(),
        }
    }

    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn EntityMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    #[must_use]
    pub fn with_isolation_field(mut self, name: impl Into<String>) -> Self {
        self.isolation_field = name.into();
        self
    }

    pub fn isolation_field(&self) -> &str {
        &self.isolation_field
    }

    /// Reconcile the discovery results of every source of a tenant
    ///
    /// Per-stream discovery failures become warnings; the sources map
    /// summarises what each source contributed.
    pub fn reconcile(&self, tenant_id: &str, sources: &[DiscoveryResult]) -> ReconciliationReport {
        let candidates: Vec<CandidateEntity> =
            sources.iter().flat_map(CandidateEntity::from_discovery).collect();

        let mut warnings: Vec<String> = sources
            .iter()
            .flat_map(|result| {
                result.failures.iter().map(move |failure| {
                    // Declared streams survive a failed sampling call
                    let outcome = if result.stream(&failure.stream).is_some() {
                        "sampling failed, declared schema kept"
                    } else {
                        "stream skipped"
                    };
                    format!(
                        "{}/{}: {outcome}: {}",
                        result.provider, failure.stream, failure.message
                    )
                })
            })
            .collect();

        let mut report = self.reconcile_candidates(tenant_id, candidates);
        warnings.append(&mut report.warnings);
        report.warnings = warnings;

        for result in sources {
            report.sources.insert(
                result.provider.clone(),
                SourceStatus {
                    health: HealthStatus::Healthy,
                    streams: result.streams.len(),
                    failures: result.failures.clone(),
                    error: None,
                },
            );
        }
        report.timed_out = sources.iter().any(|s| s.timed_out);
        report
    }

    /// Reconcile a prepared candidate list
    pub fn reconcile_candidates(
        &self,
        tenant_id: &str,
        candidates: Vec<CandidateEntity>,
    ) -> ReconciliationReport {
        let mut report = ReconciliationReport {
            tenant_id: tenant_id.to_string(),
            ..ReconciliationReport::default()
        };

        let classes = self.fold_classes(&candidates, &mut report.warnings);

        let mut used_names = BTreeSet::new();
        for (members, proposed_name) in classes {
            let mut name = match proposed_name {
                Some(name) => name,
                None if members.len() == 1 => candidates[members[0]].name(),
                None => singular(&candidates[members[0]].origin.stream.to_lowercase()),
            };
            if used_names.contains(&name) {
                let base = name.clone();
                let mut n = 2;
                while used_names.contains(&format!("{base}_{n}")) {
                    n += 1;
                }
                name = format!("{base}_{n}");
                report
                    .warnings
                    .push(format!("entity name '{base}' already taken, using '{name}'"));
            }
            used_names.insert(name.clone());

            let member_refs: Vec<&CandidateEntity> = members.iter().map(|&i| &candidates[i]).collect();
            let entity = self.build_entity(name, &member_refs, &mut report.warnings);
            debug!(entity = %entity.name, sources = entity.sources.len(), "Unified entity");
            report.entities.push(entity);
        }

        report.relationships = infer_relationships(
            &mut report.entities,
            &self.isolation_field,
            &mut report.warnings,
        );

        for cycle in ownership_cycles(&report.relationships) {
            let message = describe_cycle(&cycle);
            warn!(tenant_id, "{message}");
            report.errors.push(message);
        }

        info!(
            tenant_id,
            entities = report.entities.len(),
            relationships = report.relationships.len(),
            warnings = report.warnings.len(),
            errors = report.errors.len(),
            "Reconciliation finished"
        );
        report
    }

    /// Disjoint classes of candidate indices, ordered by their first member
    fn fold_classes(
        &self,
        candidates: &[CandidateEntity],
        warnings: &mut Vec<String>,
    ) -> Vec<(Vec<usize>, Option<String>)> {
        let mut index: HashMap<String, usize> = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            if index.insert(candidate.name(), i).is_some() {
                warnings.push(format!("duplicate stream {}, keeping the last", candidate.origin));
            }
        }

        let mut sets = DisjointSets::new(candidates.len());
        let mut names: Vec<(usize, String)> = Vec::new();

        for class in self.matcher.propose(candidates) {
            let mut members = Vec::new();
            for member in &class.members {
                match index.get(member) {
                    Some(&i) => members.push(i),
                    None => warnings.push(format!(
                        "matcher '{}' proposed unknown candidate '{member}'",
                        self.matcher.name()
                    )),
                }
            }
            let Some((&first, rest)) = members.split_first() else {
                continue;
            };
            for &other in rest {
                sets.union(first, other);
            }
            if let Some(name) = class.name {
                names.push((first, name));
            }
        }

        let mut order: Vec<usize> = Vec::new();
        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for i in 0..candidates.len() {
            // Earlier duplicates were shadowed in the index
            if index.get(&candidates[i].name()) != Some(&i) {
                continue;
            }
            let root = sets.find(i);
            groups
                .entry(root)
                .or_insert_with(|| {
                    order.push(root);
                    Vec::new()
                })
                .push(i);
        }

        let mut class_names: HashMap<usize, String> = HashMap::new();
        for (member, name) in names {
            class_names.entry(sets.find(member)).or_insert(name);
        }

        order
            .into_iter()
            .filter_map(|root| {
                let members = groups.remove(&root)?;
                Some((members, class_names.remove(&root)))
            })
            .collect()
    }

    fn build_entity(
        &self,
        name: String,
        members: &[&CandidateEntity],
        warnings: &mut Vec<String>,
    ) -> UnifiedEntity {
        let injected = [
            self.isolation_field.as_str(),
            CREATED_AT_FIELD,
            UPDATED_AT_FIELD,
        ];
        let mut fields: Vec<UnifiedField> = Vec::new();
        let mut contributors: HashMap<String, usize> = HashMap::new();

        for member in members {
            for field in &member.descriptor.fields {
                if injected.contains(&field.name.as_str()) {
                    warnings.push(format!(
                        "{}: provider field '{}' replaced by the injected field of the same name",
                        member.origin, field.name
                    ));
                    continue;
                }
                *contributors.entry(field.name.clone()).or_default() += 1;
                match fields.iter_mut().find(|f| f.name() == field.name) {
                    Some(existing) => {
                        existing.descriptor.merge(field);
                        existing.origins.push(member.origin.clone());
                    }
                    None => fields.push(UnifiedField::provider(field.clone(), member.origin.clone())),
                }
            }
        }

        // Records from a member lacking the field cannot be required to carry it
        for field in &mut fields {
            if contributors.get(field.name()).copied().unwrap_or_default() < members.len() {
                field.descriptor.required = false;
            }
        }

        let primary_key = members
            .iter()
            .find_map(|m| m.descriptor.effective_key())
            .filter(|key| key.iter().all(|k| fields.iter().any(|f| f.name() == k)))
            .unwrap_or_default();

        fields.push(UnifiedField::isolation(&self.isolation_field));
        fields.push(UnifiedField::audit(CREATED_AT_FIELD));
        fields.push(UnifiedField::audit(UPDATED_AT_FIELD));

        UnifiedEntity {
            name,
            sources: members.iter().map(|m| m.origin.clone()).collect(),
            fields,
            primary_key,
            isolation_field: self.isolation_field.clone(),
        }
    }
}

// ============================================================================
// Relationships
// ============================================================================

fn aliases(entity: &UnifiedEntity) -> BTreeSet<String> {
    let mut names = BTreeSet::from([entity.name.clone(), singular(&entity.name)]);
    for source in &entity.sources {
        let stream = source.stream.to_lowercase();
        names.insert(singular(&stream));
        names.insert(format!("{}_{}", source.source, singular(&stream)));
        names.insert(stream);
    }
    names
}

/// Resolve `*_id` fields against other entities' keys
fn infer_relationships(
    entities: &mut [UnifiedEntity],
    isolation_field: &str,
    warnings: &mut Vec<String>,
) -> Vec<CrossEntityRelationship> {
    let alias_sets: Vec<BTreeSet<String>> = entities.iter().map(aliases).collect();
    let mut relationships = Vec::new();
    let mut references: BTreeMap<usize, Vec<(usize, String)>> = BTreeMap::new();

    for (i, entity) in entities.iter().enumerate() {
        for field in entity.inbound_fields() {
            let field_name = field.name();
            let Some(stem) = field_name.strip_suffix("_id") else {
                continue;
            };
            if stem.is_empty() || field_name == isolation_field {
                continue;
            }
            let is_key = entity.primary_key.iter().any(|k| k == field_name);

            // A key column naming its own entity is not a reference
            let matches: Vec<usize> = alias_sets
                .iter()
                .enumerate()
                .filter(|(j, names)| names.contains(stem) && !(is_key && *j == i))
                .map(|(j, _)| j)
                .collect();
            if matches.is_empty() && is_key {
                continue;
            }

            match matches.as_slice() {
                [] => warnings.push(format!(
                    "{}.{field_name}: no entity matches reference '{stem}'",
                    entity.name
                )),
                [target] => match entities[*target].single_key() {
                    Some(key) => {
                        let target_name = &entities[*target].name;
                        let kind = if entity.primary_key == [field_name] {
                            RelationshipKind::OneToOne
                        } else {
                            RelationshipKind::OneToMany
                        };
                        relationships.push(CrossEntityRelationship {
                            from: target_name.clone(),
                            to: entity.name.clone(),
                            kind,
                            from_fields: vec![key.to_string()],
                            to_fields: vec![field_name.to_string()],
                            // Self references are hierarchy, not ownership
                            ownership: *target != i,
                            via: None,
                        });
                        references
                            .entry(i)
                            .or_default()
                            .push((*target, field_name.to_string()));
                    }
                    None => warnings.push(format!(
                        "{}.{field_name}: referenced entity '{}' has no single-column key",
                        entity.name, entities[*target].name
                    )),
                },
                many => warnings.push(format!(
                    "{}.{field_name}: ambiguous reference, matches {}",
                    entity.name,
                    many.iter()
                        .map(|&j| entities[j].name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )),
            }
        }
    }

    // Join entities: nothing but a key and two references
    for (&i, refs) in &references {
        let [(left, left_field), (right, right_field)] = refs.as_slice() else {
            continue;
        };
        let entity = &entities[i];
        let only_links = entity.inbound_fields().all(|f| {
            f.name() == left_field.as_str()
                || f.name() == right_field.as_str()
                || entity.primary_key.iter().any(|k| k == f.name())
        });
        if only_links && left != right && *left != i && *right != i {
            relationships.push(CrossEntityRelationship {
                from: entities[*left].name.clone(),
                to: entities[*right].name.clone(),
                kind: RelationshipKind::ManyToMany,
                from_fields: vec![left_field.clone()],
                to_fields: vec![right_field.clone()],
                ownership: false,
                via: Some(entity.name.clone()),
            });
        }
    }

    // Reference columns get an index
    for (i, refs) in references {
        for (_, field_name) in refs {
            if let Some(field) = entities[i].fields.iter_mut().find(|f| f.name() == field_name) {
                field.indexed = true;
            }
        }
    }

    relationships
}

// ============================================================================
// Union-find
// ============================================================================

struct DisjointSets {
    parent: Vec<usize>,
}

impl DisjointSets {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = i;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    /// The smaller root wins, keeping roots stable across runs
    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}
