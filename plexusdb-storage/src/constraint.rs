//! Write-time constraints.
//!
//! Constraints attach to a label+property pair and are evaluated
//! synchronously against the merged (committed + pending) view before a
//! transaction's WAL segment is written. Any violation aborts the commit
//! with no visible effect.

use crate::memtable::MemTable;
use crate::snapshot::CommittedState;
use crate::{Error, Result};
use plexusdb_api::{NodeRecord, PropertyValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub type PredicateFn = Arc<dyn Fn(&PropertyValue) -> bool + Send + Sync>;

/// Expected property type for type constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    String,
    DateTime,
    Point,
    List,
    Map,
}

impl ValueType {
    pub fn matches(&self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (ValueType::Bool, PropertyValue::Bool(_))
                | (ValueType::Int, PropertyValue::Int(_))
                | (ValueType::Float, PropertyValue::Float(_))
                | (ValueType::String, PropertyValue::String(_))
                | (ValueType::DateTime, PropertyValue::DateTime(_))
                | (ValueType::Point, PropertyValue::Point { .. })
                | (ValueType::List, PropertyValue::List(_))
                | (ValueType::Map, PropertyValue::Map(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "Bool",
            ValueType::Int => "Int",
            ValueType::Float => "Float",
            ValueType::String => "String",
            ValueType::DateTime => "DateTime",
            ValueType::Point => "Point",
            ValueType::List => "List",
            ValueType::Map => "Map",
        }
    }
}

/// Constraint kind. Custom predicates are referenced by registered name so
/// declarations can be replayed from the WAL; the closure itself lives in
/// the catalog's predicate registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConstraintKind {
    Unique,
    Exists,
    PropertyType(ValueType),
    Predicate { predicate: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintDecl {
    pub name: String,
    pub label: String,
    pub property: String,
    pub kind: ConstraintKind,
}

/// Checks one node against one constraint, given a lookup for competing
/// property owners (uniqueness) and the predicate registry.
fn check_node(
    decl: &ConstraintDecl,
    node: &NodeRecord,
    predicates: &BTreeMap<String, PredicateFn>,
    mut same_value_owner: impl FnMut(&PropertyValue) -> Option<u64>,
) -> Result<()> {
    if !node.has_label(&decl.label) {
        return Ok(());
    }
    let value = node.property(&decl.property);

    match &decl.kind {
        ConstraintKind::Exists => {
            if value.is_none() || value.is_some_and(PropertyValue::is_null) {
                return Err(violation(
                    decl,
                    node.id,
                    format!("property '{}' must exist and be non-null", decl.property),
                ));
            }
        }
        ConstraintKind::PropertyType(expected) => {
            if let Some(v) = value {
                if !v.is_null() && !expected.matches(v) {
                    return Err(violation(
                        decl,
                        node.id,
                        format!(
                            "property '{}' must be {}, got {}",
                            decl.property,
                            expected.name(),
                            v.type_name()
                        ),
                    ));
                }
            }
        }
        ConstraintKind::Predicate { predicate } => {
            let f = predicates
                .get(predicate)
                .ok_or_else(|| Error::UnregisteredPredicate(predicate.clone()))?;
            let v = value.cloned().unwrap_or(PropertyValue::Null);
            if !f(&v) {
                return Err(violation(
                    decl,
                    node.id,
                    format!("predicate '{predicate}' rejected property '{}'", decl.property),
                ));
            }
        }
        ConstraintKind::Unique => {
            if let Some(v) = value {
                if !v.is_null() {
                    if let Some(other) = same_value_owner(v) {
                        if other != node.id {
                            return Err(violation(
                                decl,
                                node.id,
                                format!(
                                    "value already owned by node {other} for property '{}'",
                                    decl.property
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn violation(decl: &ConstraintDecl, node: u64, reason: String) -> Error {
    Error::ConstraintViolation {
        constraint: decl.name.clone(),
        entity: format!("node {node}"),
        reason,
    }
}

/// Validates every node touched by `delta` against `constraints`, resolving
/// uniqueness against the merged view of `base` and `delta`.
pub fn check_pending(
    constraints: &BTreeMap<String, ConstraintDecl>,
    predicates: &BTreeMap<String, PredicateFn>,
    base: &CommittedState,
    delta: &MemTable,
) -> Result<()> {
    if constraints.is_empty() {
        return Ok(());
    }

    let touched: Vec<&NodeRecord> = delta
        .created_nodes
        .values()
        .chain(delta.updated_nodes.values())
        .collect();

    for decl in constraints.values() {
        for node in &touched {
            check_node(decl, node, predicates, |value| {
                merged_value_owner(base, delta, &decl.label, &decl.property, value, node.id)
            })?;
        }
    }
    Ok(())
}

/// Validates the whole committed state against a newly declared constraint
/// (backfill check before the constraint becomes active).
pub fn check_existing(
    decl: &ConstraintDecl,
    predicates: &BTreeMap<String, PredicateFn>,
    base: &CommittedState,
) -> Result<()> {
    let mut seen: BTreeMap<crate::index::IndexKey, u64> = BTreeMap::new();
    for node in base.node_records() {
        check_node(decl, node, predicates, |value| {
            crate::index::IndexKey::from_value(value)
                .and_then(|key| seen.get(&key).copied())
        })?;
        if node.has_label(&decl.label) {
            if let Some(key) = node
                .property(&decl.property)
                .and_then(crate::index::IndexKey::from_value)
            {
                seen.entry(key).or_insert(node.id);
            }
        }
    }
    Ok(())
}

/// Finds a live node other than `exclude` owning `value` for label+property
/// in the merged view. Pending deletes and updates shadow the base state.
fn merged_value_owner(
    base: &CommittedState,
    delta: &MemTable,
    label: &str,
    property: &str,
    value: &PropertyValue,
    exclude: u64,
) -> Option<u64> {
    // Pending creations and updates first.
    for node in delta.created_nodes.values().chain(delta.updated_nodes.values()) {
        if node.id != exclude
            && node.has_label(label)
            && node.property(property) == Some(value)
        {
            return Some(node.id);
        }
    }

    // Base state, skipping nodes the transaction deleted or rewrote.
    for id in base.label_members(label) {
        if id == exclude
            || delta.deleted_nodes.contains(&id)
            || delta.updated_nodes.contains_key(&id)
        {
            continue;
        }
        if let Some(node) = base.node(id) {
            if node.property(property) == Some(value) {
                return Some(id);
            }
        }
    }
    None
}
