//! Index subsystem.
//!
//! Seven index kinds are exposed at the interface level. `Lookup` is the
//! always-on label index served directly by the committed state; the other
//! six carry their own data structure and are maintained inside the same
//! commit as the entity writes they track.

mod ordered;
mod point;
mod text;
mod vector;

pub use ordered::{CompositeIndex, IndexKey, OrderedIndex};
pub use point::PointIndex;
pub use text::{FullTextIndex, TextIndex, tokenize};
pub use vector::VectorIndex;

use plexusdb_api::{NodeId, NodeRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Label -> node ids. Implicit and always maintained.
    Lookup,
    /// Ordered single-property index; equality and range lookups.
    Range,
    /// Ordered multi-property index.
    Composite,
    /// Raw value strings; substring/contains lookups.
    Text,
    /// Tokenized terms; word-level lookups.
    FullText,
    /// 2D points; bounding-box containment and nearest-neighbour.
    Point,
    /// Embedding vectors; cosine top-k.
    Vector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub label: String,
    pub properties: Vec<String>,
    pub kind: IndexKind,
}

impl IndexDef {
    /// The single indexed property, for kinds that take exactly one.
    pub fn property(&self) -> &str {
        self.properties.first().map(String::as_str).unwrap_or("")
    }
}

/// The data half of a declared index.
#[derive(Debug, Clone)]
pub enum IndexData {
    /// Backed by the committed state's label sets; holds no data of its own.
    Lookup,
    Range(OrderedIndex),
    Composite(CompositeIndex),
    Text(TextIndex),
    FullText(FullTextIndex),
    Point(PointIndex),
    Vector(VectorIndex),
}

impl IndexData {
    pub fn empty(kind: IndexKind) -> Self {
        match kind {
            IndexKind::Lookup => IndexData::Lookup,
            IndexKind::Range => IndexData::Range(OrderedIndex::default()),
            IndexKind::Composite => IndexData::Composite(CompositeIndex::default()),
            IndexKind::Text => IndexData::Text(TextIndex::default()),
            IndexKind::FullText => IndexData::FullText(FullTextIndex::default()),
            IndexKind::Point => IndexData::Point(PointIndex::default()),
            IndexKind::Vector => IndexData::Vector(VectorIndex::default()),
        }
    }

    /// Adds a node's entries. Nodes missing the indexed property (or whose
    /// value does not fit the index kind) are simply absent from the index.
    pub fn insert(&mut self, def: &IndexDef, record: &NodeRecord) {
        match self {
            IndexData::Lookup => {}
            IndexData::Range(idx) => idx.insert(def.property(), record),
            IndexData::Composite(idx) => idx.insert(&def.properties, record),
            IndexData::Text(idx) => idx.insert(def.property(), record),
            IndexData::FullText(idx) => idx.insert(def.property(), record),
            IndexData::Point(idx) => idx.insert(def.property(), record),
            IndexData::Vector(idx) => idx.insert(def.property(), record),
        }
    }

    /// Removes a node's entries for its previous state.
    pub fn remove(&mut self, def: &IndexDef, record: &NodeRecord) {
        match self {
            IndexData::Lookup => {}
            IndexData::Range(idx) => idx.remove(def.property(), record),
            IndexData::Composite(idx) => idx.remove(&def.properties, record),
            IndexData::Text(idx) => idx.remove(def.property(), record),
            IndexData::FullText(idx) => idx.remove(def.property(), record),
            IndexData::Point(idx) => idx.remove(def.property(), record),
            IndexData::Vector(idx) => idx.remove(def.property(), record),
        }
    }

    /// Exact-value lookup, for the kinds that support it.
    pub fn equality(&self, value: &plexusdb_api::PropertyValue) -> Option<Vec<NodeId>> {
        match self {
            IndexData::Range(idx) => Some(idx.equality(value)),
            IndexData::Composite(idx) => idx.equality_single(value),
            IndexData::Text(idx) => Some(idx.equality(value)),
            _ => None,
        }
    }
}
