use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier for a node, assigned by the storage layer at creation time.
///
/// Node identity is stable for the node's whole lifetime, across property
/// and label changes.
pub type NodeId = u64;

/// Identifier for a relationship.
pub type RelId = u64;

/// Traversal direction relative to a given node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Property value types for nodes and relationships.
///
/// Supports the value types needed for Cypher property expressions:
/// - Null: NULL values
/// - Bool: true/false
/// - Int: 64-bit signed integers
/// - Float: 64-bit floating point
/// - String: UTF-8 strings
/// - DateTime: 64-bit signed microseconds since Unix epoch
/// - Point: 2D cartesian point
/// - List: Ordered list of PropertyValues
/// - Map: String-keyed map of PropertyValues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(i64),
    Point { x: f64, y: f64 },
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "Null",
            PropertyValue::Bool(_) => "Bool",
            PropertyValue::Int(_) => "Int",
            PropertyValue::Float(_) => "Float",
            PropertyValue::String(_) => "String",
            PropertyValue::DateTime(_) => "DateTime",
            PropertyValue::Point { .. } => "Point",
            PropertyValue::List(_) => "List",
            PropertyValue::Map(_) => "Map",
        }
    }
}

/// The committed state of a node: identity, labels, and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl NodeRecord {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// The committed state of a relationship.
///
/// Relationships are always directed internally (`src` -> `dst`) and carry
/// exactly one type. Undirected queries traverse in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelRecord {
    pub id: RelId,
    pub rel_type: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl RelRecord {
    /// The endpoint opposite to `node`. For self-loops this is `node` itself.
    pub fn other_end(&self, node: NodeId) -> NodeId {
        if self.src == node { self.dst } else { self.src }
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }
}

/// A consistent, read-only view of the graph.
///
/// Implemented both by committed snapshots and by transaction views that
/// overlay a transaction's pending writes on its base snapshot. Implementors
/// must return a consistent picture for the lifetime of the view: two calls
/// observing the same entity must agree.
pub trait GraphView {
    /// Current state of a node, or `None` if it does not exist in this view.
    fn node(&self, id: NodeId) -> Option<NodeRecord>;

    /// Current state of a relationship.
    fn relationship(&self, id: RelId) -> Option<RelRecord>;

    /// All live node ids in this view. Order unspecified.
    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_>;

    /// All live relationship ids in this view. Order unspecified.
    fn relationship_ids(&self) -> Box<dyn Iterator<Item = RelId> + '_>;

    /// Live nodes carrying `label`. Order unspecified.
    fn nodes_with_label(&self, label: &str) -> Box<dyn Iterator<Item = NodeId> + '_>;

    /// Relationships incident to `node` in `direction`, optionally filtered
    /// by relationship type.
    fn incident(&self, node: NodeId, direction: Direction, rel_type: Option<&str>)
    -> Vec<RelRecord>;

    /// Equality lookup through a declared index.
    ///
    /// Returns `Some(ids)` when an index covering (label, property) exists,
    /// `None` when no such index is declared and the caller must fall back
    /// to a scan.
    fn lookup_index(
        &self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Option<Vec<NodeId>>;

    /// All label names present in this view.
    fn labels(&self) -> Vec<String>;

    /// True once a caller-supplied deadline has passed; executors poll this
    /// and abort gracefully.
    fn deadline_exceeded(&self) -> bool {
        false
    }
}
