//! Ownership graph checks

use super::types::CrossEntityRelationship;
use std::collections::{BTreeMap, BTreeSet};

/// Cycles among ownership edges, each as a closed path (`a -> b -> a`)
///
/// Traversal order is fixed by entity name, and each cycle is rotated to
/// start at its smallest member, so the same graph always yields the same
/// list.
pub fn ownership_cycles(relationships: &[CrossEntityRelationship]) -> Vec<Vec<String>> {
    let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for rel in relationships.iter().filter(|r| r.ownership) {
        adjacency
            .entry(rel.from.as_str())
            .or_default()
            .insert(rel.to.as_str());
        adjacency.entry(rel.to.as_str()).or_default();
    }

    let mut cycles: BTreeSet<Vec<String>> = BTreeSet::new();
    let mut finished: BTreeSet<&str> = BTreeSet::new();

    for &start in adjacency.keys() {
        if finished.contains(start) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        visit(start, &adjacency, &mut path, &mut finished, &mut cycles);
    }

    cycles.into_iter().collect()
}

fn visit<'a>(
    node: &'a str,
    adjacency: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    path: &mut Vec<&'a str>,
    finished: &mut BTreeSet<&'a str>,
    cycles: &mut BTreeSet<Vec<String>>,
) {
    if let Some(pos) = path.iter().position(|n| *n == node) {
        cycles.insert(canonical_cycle(&path[pos..]));
        return;
    }
    if finished.contains(node) {
        return;
    }

    path.push(node);
    if let Some(next) = adjacency.get(node) {
        for &child in next {
            visit(child, adjacency, path, finished, cycles);
        }
    }
    path.pop();
    finished.insert(node);
}

fn canonical_cycle(members: &[&str]) -> Vec<String> {
    let start = members
        .iter()
        .enumerate()
        .min_by_key(|(_, name)| **name)
        .map_or(0, |(i, _)| i);

    let mut cycle: Vec<String> = members[start..]
        .iter()
        .chain(&members[..start])
        .map(|s| (*s).to_string())
        .collect();
    if let Some(first) = cycle.first().cloned() {
        cycle.push(first);
    }
    cycle
}

/// Render a cycle for the report
pub fn describe_cycle(cycle: &[String]) -> String {
    format!("circular ownership: {}", cycle.join(" -> "))
}
