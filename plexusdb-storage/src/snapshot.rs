//! Committed graph state and read snapshots.
//!
//! The committed state is immutable: commit builds a successor state from
//! the current one plus a memtable, and the store publishes it behind an
//! `Arc` swap. Readers clone the `Arc` and keep a consistent view for as
//! long as they hold it, concurrent commits notwithstanding.

use crate::index::{IndexData, IndexDef};
use crate::memtable::MemTable;
use crate::{Error, Result};
use plexusdb_api::{
    Direction, GraphView, NodeId, NodeRecord, PropertyValue, RelId, RelRecord,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CommittedState {
    epoch: u64,
    nodes: BTreeMap<NodeId, Arc<NodeRecord>>,
    rels: BTreeMap<RelId, Arc<RelRecord>>,
    outgoing: BTreeMap<NodeId, Vec<RelId>>,
    incoming: BTreeMap<NodeId, Vec<RelId>>,
    labels: BTreeMap<String, BTreeSet<NodeId>>,
    indexes: BTreeMap<String, (IndexDef, IndexData)>,
}

impl CommittedState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&id).map(Arc::as_ref)
    }

    pub fn rel(&self, id: RelId) -> Option<&RelRecord> {
        self.rels.get(&id).map(Arc::as_ref)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn rel_count(&self) -> usize {
        self.rels.len()
    }

    pub fn node_records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values().map(Arc::as_ref)
    }

    pub fn rel_records(&self) -> impl Iterator<Item = &RelRecord> {
        self.rels.values().map(Arc::as_ref)
    }

    pub fn label_members(&self, label: &str) -> Vec<NodeId> {
        self.labels
            .get(label)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn index(&self, name: &str) -> Option<&(IndexDef, IndexData)> {
        self.indexes.get(name)
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = &(IndexDef, IndexData)> {
        self.indexes.values()
    }

    /// Incident relationship ids, deduplicated for self-loops under `Both`.
    fn incident_ids(&self, node: NodeId, direction: Direction) -> Vec<RelId> {
        let empty: &[RelId] = &[];
        let out = self.outgoing.get(&node).map(Vec::as_slice).unwrap_or(empty);
        let inc = self.incoming.get(&node).map(Vec::as_slice).unwrap_or(empty);
        match direction {
            Direction::Outgoing => out.to_vec(),
            Direction::Incoming => inc.to_vec(),
            Direction::Both => {
                let mut seen: BTreeSet<RelId> = out.iter().copied().collect();
                let mut ids = out.to_vec();
                for id in inc {
                    if seen.insert(*id) {
                        ids.push(*id);
                    }
                }
                ids
            }
        }
    }

    /// Builds the successor state from a pending write set.
    ///
    /// Validates structure while applying: relationship endpoints must be
    /// live, and a node deletion fails while incident relationships remain.
    pub fn apply(&self, delta: &MemTable, epoch: u64) -> Result<CommittedState> {
        let mut next = self.clone();
        next.epoch = epoch;

        for id in &delta.deleted_rels {
            let rel = next
                .rels
                .remove(id)
                .ok_or(Error::UnknownRelationship(*id))?;
            next.unlink(&rel);
        }

        for (id, rel) in &delta.updated_rels {
            if !next.rels.contains_key(id) {
                return Err(Error::UnknownRelationship(*id));
            }
            next.rels.insert(*id, Arc::new(rel.clone()));
        }

        for (id, node) in &delta.created_nodes {
            next.index_node_added(node);
            next.nodes.insert(*id, Arc::new(node.clone()));
        }

        for (id, node) in &delta.updated_nodes {
            let old = next.nodes.get(id).cloned().ok_or(Error::UnknownNode(*id))?;
            next.index_node_removed(&old);
            next.index_node_added(node);
            next.nodes.insert(*id, Arc::new(node.clone()));
        }

        for id in &delta.deleted_nodes {
            let old = next.nodes.get(id).cloned().ok_or(Error::UnknownNode(*id))?;
            if !next.incident_ids(*id, Direction::Both).is_empty() {
                return Err(Error::NodeHasRelationships(*id));
            }
            next.index_node_removed(&old);
            next.nodes.remove(id);
        }

        for (id, rel) in &delta.created_rels {
            if !next.nodes.contains_key(&rel.src) {
                return Err(Error::UnknownNode(rel.src));
            }
            if !next.nodes.contains_key(&rel.dst) {
                return Err(Error::UnknownNode(rel.dst));
            }
            next.rels.insert(*id, Arc::new(rel.clone()));
            next.outgoing.entry(rel.src).or_default().push(*id);
            next.incoming.entry(rel.dst).or_default().push(*id);
        }

        Ok(next)
    }

    /// Adds a declared index, backfilled from the current nodes.
    pub fn with_index(&self, def: IndexDef, epoch: u64) -> CommittedState {
        let mut next = self.clone();
        next.epoch = epoch;
        let mut data = IndexData::empty(def.kind);
        for node in next.nodes.values() {
            if node.has_label(&def.label) {
                data.insert(&def, node);
            }
        }
        next.indexes.insert(def.name.clone(), (def, data));
        next
    }

    fn unlink(&mut self, rel: &RelRecord) {
        if let Some(ids) = self.outgoing.get_mut(&rel.src) {
            ids.retain(|id| *id != rel.id);
            if ids.is_empty() {
                self.outgoing.remove(&rel.src);
            }
        }
        if let Some(ids) = self.incoming.get_mut(&rel.dst) {
            ids.retain(|id| *id != rel.id);
            if ids.is_empty() {
                self.incoming.remove(&rel.dst);
            }
        }
    }

    fn index_node_added(&mut self, node: &NodeRecord) {
        for label in &node.labels {
            self.labels.entry(label.clone()).or_default().insert(node.id);
        }
        for (def, data) in self.indexes.values_mut() {
            if node.has_label(&def.label) {
                data.insert(def, node);
            }
        }
    }

    fn index_node_removed(&mut self, node: &NodeRecord) {
        for label in &node.labels {
            if let Some(ids) = self.labels.get_mut(label) {
                ids.remove(&node.id);
                if ids.is_empty() {
                    self.labels.remove(label);
                }
            }
        }
        for (def, data) in self.indexes.values_mut() {
            if node.has_label(&def.label) {
                data.remove(def, node);
            }
        }
    }
}

/// An immutable read snapshot: a pinned committed state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    state: Arc<CommittedState>,
}

impl Snapshot {
    pub(crate) fn new(state: Arc<CommittedState>) -> Self {
        Self { state }
    }

    pub fn epoch(&self) -> u64 {
        self.state.epoch()
    }

    pub(crate) fn state(&self) -> &Arc<CommittedState> {
        &self.state
    }

    pub fn node_count(&self) -> usize {
        self.state.node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.state.rel_count()
    }

    /// Stable iteration over full node records, for external translators.
    pub fn node_records(&self) -> impl Iterator<Item = NodeRecord> + '_ {
        self.state.node_records().cloned()
    }

    /// Stable iteration over full relationship records.
    pub fn relationship_records(&self) -> impl Iterator<Item = RelRecord> + '_ {
        self.state.rel_records().cloned()
    }

    /// Substring search through a declared `Text` index.
    pub fn text_containing(&self, index: &str, needle: &str) -> Result<Vec<NodeId>> {
        match self.state.index(index) {
            Some((_, IndexData::Text(idx))) => Ok(idx.containing(needle)),
            Some(_) => Err(Error::UnknownIndex(format!("{index} is not a text index"))),
            None => Err(Error::UnknownIndex(index.to_string())),
        }
    }

    /// All-terms match through a declared `FullText` index.
    pub fn fulltext_matching(&self, index: &str, query: &str) -> Result<Vec<NodeId>> {
        match self.state.index(index) {
            Some((_, IndexData::FullText(idx))) => Ok(idx.matching(query)),
            Some(_) => Err(Error::UnknownIndex(format!(
                "{index} is not a full-text index"
            ))),
            None => Err(Error::UnknownIndex(index.to_string())),
        }
    }

    /// Bounding-box containment through a declared `Point` index.
    pub fn points_within(
        &self,
        index: &str,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
    ) -> Result<Vec<NodeId>> {
        match self.state.index(index) {
            Some((_, IndexData::Point(idx))) => Ok(idx.within(min_x, min_y, max_x, max_y)),
            Some(_) => Err(Error::UnknownIndex(format!("{index} is not a point index"))),
            None => Err(Error::UnknownIndex(index.to_string())),
        }
    }

    /// Nearest-neighbour through a declared `Point` index.
    pub fn points_nearest(&self, index: &str, x: f64, y: f64, k: usize) -> Result<Vec<NodeId>> {
        match self.state.index(index) {
            Some((_, IndexData::Point(idx))) => Ok(idx.nearest(x, y, k)),
            Some(_) => Err(Error::UnknownIndex(format!("{index} is not a point index"))),
            None => Err(Error::UnknownIndex(index.to_string())),
        }
    }

    /// Cosine top-k through a declared `Vector` index.
    pub fn vectors_top_k(
        &self,
        index: &str,
        query: &[f64],
        k: usize,
    ) -> Result<Vec<(NodeId, f64)>> {
        match self.state.index(index) {
            Some((_, IndexData::Vector(idx))) => Ok(idx.top_k(query, k)),
            Some(_) => Err(Error::UnknownIndex(format!(
                "{index} is not a vector index"
            ))),
            None => Err(Error::UnknownIndex(index.to_string())),
        }
    }

    /// Range scan through a declared `Range` index.
    pub fn range_lookup(
        &self,
        index: &str,
        min: Option<&PropertyValue>,
        max: Option<&PropertyValue>,
    ) -> Result<Vec<NodeId>> {
        match self.state.index(index) {
            Some((_, IndexData::Range(idx))) => Ok(idx.range(min, max)),
            Some(_) => Err(Error::UnknownIndex(format!("{index} is not a range index"))),
            None => Err(Error::UnknownIndex(index.to_string())),
        }
    }
}

impl GraphView for Snapshot {
    fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.state.node(id).cloned()
    }

    fn relationship(&self, id: RelId) -> Option<RelRecord> {
        self.state.rel(id).cloned()
    }

    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        Box::new(self.state.nodes.keys().copied())
    }

    fn relationship_ids(&self) -> Box<dyn Iterator<Item = RelId> + '_> {
        Box::new(self.state.rels.keys().copied())
    }

    fn nodes_with_label(&self, label: &str) -> Box<dyn Iterator<Item = NodeId> + '_> {
        match self.state.labels.get(label) {
            Some(ids) => Box::new(ids.iter().copied()),
            None => Box::new(std::iter::empty()),
        }
    }

    fn incident(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Vec<RelRecord> {
        self.state
            .incident_ids(node, direction)
            .into_iter()
            .filter_map(|id| self.state.rel(id))
            .filter(|rel| rel_type.is_none_or(|t| rel.rel_type == t))
            .cloned()
            .collect()
    }

    fn lookup_index(
        &self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Option<Vec<NodeId>> {
        for (def, data) in self.state.indexes() {
            if def.label == label && def.properties.first().is_some_and(|p| p == property) {
                if let Some(ids) = data.equality(value) {
                    return Some(ids);
                }
            }
        }
        None
    }

    fn labels(&self) -> Vec<String> {
        self.state.labels.keys().cloned().collect()
    }
}
