//! Entity matching
//!
//! A matcher proposes groups of candidates that describe the same real-world
//! concept. Proposals may overlap or chain; the reconciler folds them into
//! disjoint classes afterwards, so matchers stay simple.

use super::types::CandidateEntity;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A proposed group of candidates, by candidate name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceClass {
    pub members: Vec<String>,
    /// Canonical name to use instead of the derived one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EquivalenceClass {
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: members.into_iter().map(Into::into).collect(),
            name: None,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Proposes equivalence classes over candidates
pub trait EntityMatcher: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    fn propose(&self, candidates: &[CandidateEntity]) -> Vec<EquivalenceClass>;
}

// ============================================================================
// Name similarity
// ============================================================================

/// Matches streams whose names normalise to the same word
///
/// Normalisation lowercases, strips separators and singularises, so
/// `Contacts`, `contact` and `con-tacts` agree. Synonyms map additional
/// words onto a shared root.
#[derive(Debug, Clone, Default)]
pub struct NameSimilarityMatcher {
    synonyms: BTreeMap<String, String>,
}

impl NameSimilarityMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat `word` as another name for `root`
    #[must_use]
    pub fn with_synonym(mut self, word: &str, root: &str) -> Self {
        self.synonyms.insert(normalize_name(word), normalize_name(root));
        self
    }

    fn root(&self, stream: &str) -> String {
        let normalized = normalize_name(stream);
        self.synonyms.get(&normalized).cloned().unwrap_or(normalized)
    }
}

impl EntityMatcher for NameSimilarityMatcher {
    fn name(&self) -> &str {
        "name_similarity"
    }

    fn propose(&self, candidates: &[CandidateEntity]) -> Vec<EquivalenceClass> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for candidate in candidates {
            groups
                .entry(self.root(&candidate.origin.stream))
                .or_default()
                .push(candidate.name());
        }
        groups
            .into_values()
            .filter(|members| members.len() > 1)
            .map(EquivalenceClass::new)
            .collect()
    }
}

/// Lowercase, drop separators, singularise
pub fn normalize_name(name: &str) -> String {
    let compact: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    singular(&compact)
}

/// English singular for the common plural endings
pub fn singular(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        if !stem.is_empty() {
            return format!("{stem}y");
        }
    }
    for suffix in ["sses", "xes", "ches", "shes"] {
        if let Some(stem) = word.strip_suffix(suffix) {
            return format!("{stem}{}", &suffix[..suffix.len() - 2]);
        }
    }
    if word.ends_with('s') && !word.ends_with("ss") && word.len() > 1 {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

// ============================================================================
// Key overlap
// ============================================================================

/// Matches candidates from different sources sharing a natural key
///
/// Two candidates match when both carry one of the key fields. When both
/// have samples for that field, at least one value must also appear in
/// both; comparison ignores case and surrounding whitespace.
#[derive(Debug, Clone)]
pub struct KeyOverlapMatcher {
    keys: Vec<String>,
}

impl Default for KeyOverlapMatcher {
    fn default() -> Self {
        Self {
            keys: vec!["email".to_string()],
        }
    }
}

impl KeyOverlapMatcher {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    fn overlaps(&self, left: &CandidateEntity, right: &CandidateEntity) -> bool {
        self.keys.iter().any(|key| {
            if left.descriptor.field(key).is_none() || right.descriptor.field(key).is_none() {
                return false;
            }
            let left_values = normalized_values(left, key);
            let right_values = normalized_values(right, key);
            if left_values.is_empty() || right_values.is_empty() {
                return true;
            }
            !left_values.is_disjoint(&right_values)
        })
    }
}

fn normalized_values(candidate: &CandidateEntity, key: &str) -> BTreeSet<String> {
    candidate
        .sampled_values(key)
        .map(|value| match value {
            Value::String(s) => s.trim().to_lowercase(),
            other => other.to_string(),
        })
        .collect()
}

impl EntityMatcher for KeyOverlapMatcher {
    fn name(&self) -> &str {
        "key_overlap"
    }

    fn propose(&self, candidates: &[CandidateEntity]) -> Vec<EquivalenceClass> {
        let mut classes = Vec::new();
        for (i, left) in candidates.iter().enumerate() {
            for right in &candidates[i + 1..] {
                if left.origin.source != right.origin.source && self.overlaps(left, right) {
                    classes.push(EquivalenceClass::new([left.name(), right.name()]));
                }
            }
        }
        classes
    }
}

// ============================================================================
// Explicit groups
// ============================================================================

/// Matches configured groups verbatim
///
/// Members are candidate names (`crm_contacts`) or `provider/stream` pairs.
#[derive(Debug, Clone, Default)]
pub struct ExplicitMatcher {
    groups: Vec<EquivalenceClass>,
}

impl ExplicitMatcher {
    pub fn new(groups: Vec<EquivalenceClass>) -> Self {
        let groups = groups
            .into_iter()
            .map(|group| EquivalenceClass {
                members: group.members.iter().map(|m| m.replacen('/', "_", 1)).collect(),
                name: group.name,
            })
            .collect();
        Self { groups }
    }
}

impl EntityMatcher for ExplicitMatcher {
    fn name(&self) -> &str {
        "explicit"
    }

    fn propose(&self, _candidates: &[CandidateEntity]) -> Vec<EquivalenceClass> {
        self.groups.clone()
    }
}

// ============================================================================
// Composite
// ============================================================================

/// Concatenates the proposals of several matchers
#[derive(Clone, Default)]
pub struct CompositeMatcher {
    matchers: Vec<Arc<dyn EntityMatcher>>,
}

impl CompositeMatcher {
    pub fn new(matchers: Vec<Arc<dyn EntityMatcher>>) -> Self {
        Self { matchers }
    }

    #[must_use]
    pub fn with(mut self, matcher: Arc<dyn EntityMatcher>) -> Self {
        self.matchers.push(matcher);
        self
    }
}

impl std::fmt::Debug for CompositeMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.matchers.iter().map(|m| m.name()))
            .finish()
    }
}

impl EntityMatcher for CompositeMatcher {
    fn name(&self) -> &str {
        "composite"
    }

    fn propose(&self, candidates: &[CandidateEntity]) -> Vec<EquivalenceClass> {
        self.matchers
            .iter()
            .flat_map(|m| m.propose(candidates))
            .collect()
    }
}

/// Name similarity plus `email` key overlap
pub fn default_matcher() -> Arc<dyn EntityMatcher> {
    Arc::new(CompositeMatcher::new(vec![
        Arc::new(NameSimilarityMatcher::new()),
        Arc::new(KeyOverlapMatcher::default()),
    ]))
}

// ============================================================================
// Configuration
// ============================================================================

/// Matcher selection as written in tenant config
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherConfig {
    /// Name similarity plus `email` key overlap
    #[default]
    Default,
    NameSimilarity {
        #[serde(default)]
        synonyms: BTreeMap<String, String>,
    },
    KeyOverlap {
        keys: Vec<String>,
    },
    Explicit {
        groups: Vec<EquivalenceClass>,
    },
    Composite {
        matchers: Vec<MatcherConfig>,
    },
}

impl MatcherConfig {
    /// Build the configured matcher
    pub fn build(&self) -> Result<Arc<dyn EntityMatcher>> {
        Ok(match self {
            MatcherConfig::Default => default_matcher(),
            MatcherConfig::NameSimilarity { synonyms } => {
                let matcher = synonyms
                    .iter()
                    .fold(NameSimilarityMatcher::new(), |m, (word, root)| {
                        m.with_synonym(word, root)
                    });
                Arc::new(matcher)
            }
            MatcherConfig::KeyOverlap { keys } => {
                if keys.is_empty() {
                    return Err(Error::invalid_value(
                        "reconciliation.matcher.keys",
                        "key overlap needs at least one key",
                    ));
                }
                Arc::new(KeyOverlapMatcher::new(keys.clone()))
            }
            MatcherConfig::Explicit { groups } => Arc::new(ExplicitMatcher::new(groups.clone())),
            MatcherConfig::Composite { matchers } => Arc::new(CompositeMatcher::new(
                matchers
                    .iter()
                    .map(MatcherConfig::build)
                    .collect::<Result<Vec<_>>>()?,
            )),
        })
    }
}
