//! Transaction-private pending write set.
//!
//! A transaction buffers whole entity states here: creations, full rewrites
//! of committed entities (copy-on-write), and deletions. Nothing touches
//! shared state until commit applies the memtable in one step.

use plexusdb_api::{NodeId, NodeRecord, RelId, RelRecord};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct MemTable {
    pub(crate) created_nodes: BTreeMap<NodeId, NodeRecord>,
    pub(crate) updated_nodes: BTreeMap<NodeId, NodeRecord>,
    pub(crate) deleted_nodes: BTreeSet<NodeId>,
    pub(crate) created_rels: BTreeMap<RelId, RelRecord>,
    pub(crate) updated_rels: BTreeMap<RelId, RelRecord>,
    pub(crate) deleted_rels: BTreeSet<RelId>,
}

impl MemTable {
    pub fn is_empty(&self) -> bool {
        self.created_nodes.is_empty()
            && self.updated_nodes.is_empty()
            && self.deleted_nodes.is_empty()
            && self.created_rels.is_empty()
            && self.updated_rels.is_empty()
            && self.deleted_rels.is_empty()
    }

    pub fn create_node(&mut self, record: NodeRecord) {
        self.created_nodes.insert(record.id, record);
    }

    pub fn create_rel(&mut self, record: RelRecord) {
        self.created_rels.insert(record.id, record);
    }

    /// Stages the new full state of a node. Nodes created in this
    /// transaction are rewritten in place.
    pub fn stage_node(&mut self, record: NodeRecord) {
        if self.created_nodes.contains_key(&record.id) {
            self.created_nodes.insert(record.id, record);
        } else {
            self.updated_nodes.insert(record.id, record);
        }
    }

    pub fn stage_rel(&mut self, record: RelRecord) {
        if self.created_rels.contains_key(&record.id) {
            self.created_rels.insert(record.id, record);
        } else {
            self.updated_rels.insert(record.id, record);
        }
    }

    pub fn delete_node(&mut self, id: NodeId) {
        if self.created_nodes.remove(&id).is_none() {
            self.updated_nodes.remove(&id);
            self.deleted_nodes.insert(id);
        }
    }

    pub fn delete_rel(&mut self, id: RelId) {
        if self.created_rels.remove(&id).is_none() {
            self.updated_rels.remove(&id);
            self.deleted_rels.insert(id);
        }
    }

    /// The pending state of a node: `Some(Some)` when staged here,
    /// `Some(None)` when deleted here, `None` when untouched.
    pub fn node_state(&self, id: NodeId) -> Option<Option<&NodeRecord>> {
        if self.deleted_nodes.contains(&id) {
            return Some(None);
        }
        self.created_nodes
            .get(&id)
            .or_else(|| self.updated_nodes.get(&id))
            .map(Some)
    }

    pub fn rel_state(&self, id: RelId) -> Option<Option<&RelRecord>> {
        if self.deleted_rels.contains(&id) {
            return Some(None);
        }
        self.created_rels
            .get(&id)
            .or_else(|| self.updated_rels.get(&id))
            .map(Some)
    }

    /// Entity references written by this transaction, for conflict
    /// detection.
    pub fn write_set(&self) -> BTreeSet<crate::txn::EntityRef> {
        use crate::txn::EntityRef;
        let mut out = BTreeSet::new();
        for id in self
            .created_nodes
            .keys()
            .chain(self.updated_nodes.keys())
            .chain(self.deleted_nodes.iter())
        {
            out.insert(EntityRef::Node(*id));
        }
        for id in self
            .created_rels
            .keys()
            .chain(self.updated_rels.keys())
            .chain(self.deleted_rels.iter())
        {
            out.insert(EntityRef::Rel(*id));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: NodeId) -> NodeRecord {
        NodeRecord {
            id,
            labels: vec![],
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn delete_of_own_creation_leaves_no_trace() {
        let mut mt = MemTable::default();
        mt.create_node(node(1));
        mt.delete_node(1);
        assert!(mt.is_empty());
        assert_eq!(mt.node_state(1), None);
    }

    #[test]
    fn staging_created_node_stays_a_creation() {
        let mut mt = MemTable::default();
        mt.create_node(node(1));
        mt.stage_node(node(1));
        assert!(mt.updated_nodes.is_empty());
        assert!(mt.created_nodes.contains_key(&1));
    }

    #[test]
    fn node_state_reflects_deletion() {
        let mut mt = MemTable::default();
        mt.stage_node(node(2));
        mt.delete_node(2);
        assert_eq!(mt.node_state(2), Some(None));
    }
}
