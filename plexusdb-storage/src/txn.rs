//! Transactions and transaction views.
//!
//! One transaction belongs to one logical thread of control. All writes are
//! buffered in a private memtable and hit shared state only at commit; reads
//! go through a [`TxView`] that overlays the pending writes on the
//! transaction's base snapshot, so a transaction observes its own effects.

use crate::memtable::MemTable;
use crate::snapshot::Snapshot;
use crate::store::Store;
use crate::{Error, Result};
use plexusdb_api::{
    Direction, GraphView, NodeId, NodeRecord, PropertyValue, RelId, RelRecord,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

/// The concurrency-consistency contract a transaction requests.
///
/// | Level          | Stable reads | Write-write conflicts | Read-set validation |
/// |----------------|--------------|-----------------------|---------------------|
/// | ReadCommitted  | no           | no                    | no                  |
/// | RepeatableRead | yes          | no                    | no                  |
/// | Snapshot       | yes          | first committer wins  | no                  |
/// | Serializable   | yes          | first committer wins  | yes                 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Every read observes the latest committed state.
    ReadCommitted,
    /// All reads observe the snapshot taken at transaction start.
    RepeatableRead,
    /// Point-in-time view with first-committer-wins conflict resolution.
    #[default]
    Snapshot,
    /// Snapshot semantics plus read-set invalidation detection at commit,
    /// which rejects write skew.
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Entity reference used in read and write sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntityRef {
    Node(NodeId),
    Rel(RelId),
}

/// An opaque capture of a transaction's pending write set.
pub struct Savepoint(MemTable);

pub struct Transaction {
    pub(crate) store: Arc<Store>,
    pub(crate) id: u64,
    pub(crate) isolation: IsolationLevel,
    pub(crate) start_epoch: u64,
    pinned: Option<Snapshot>,
    pub(crate) memtable: MemTable,
    pub(crate) reads: RefCell<BTreeSet<EntityRef>>,
    deadline: Option<Instant>,
    pub(crate) state: TxState,
}

impl Transaction {
    pub(crate) fn new(store: Arc<Store>, id: u64, isolation: IsolationLevel) -> Self {
        let base = store.snapshot();
        let start_epoch = base.epoch();
        let pinned = match isolation {
            IsolationLevel::ReadCommitted => None,
            _ => Some(base),
        };
        Self {
            store,
            id,
            isolation,
            start_epoch,
            pinned,
            memtable: MemTable::default(),
            reads: RefCell::new(BTreeSet::new()),
            deadline: None,
            state: TxState::Active,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Arms a deadline. Once it passes, reads report it through
    /// [`GraphView::deadline_exceeded`] and writes fail, so the executor
    /// aborts gracefully instead of leaving partial state.
    pub fn set_deadline(&mut self, deadline: Instant) {
        self.deadline = Some(deadline);
    }

    pub(crate) fn deadline_passed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn check_writable(&self) -> Result<()> {
        if self.state != TxState::Active {
            return Err(Error::TransactionNotActive);
        }
        if self.deadline_passed() {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// The base snapshot for reads: pinned at start for every level except
    /// read-committed, which re-reads the latest published state.
    pub(crate) fn base(&self) -> Snapshot {
        match &self.pinned {
            Some(snapshot) => snapshot.clone(),
            None => self.store.snapshot(),
        }
    }

    /// A read view overlaying this transaction's pending writes.
    pub fn view(&self) -> TxView<'_> {
        TxView {
            txn: self,
            base: self.base(),
        }
    }

    pub fn create_node(
        &mut self,
        labels: Vec<String>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<NodeId> {
        self.check_writable()?;
        let id = self.store.allocate_node_id();
        self.memtable.create_node(NodeRecord {
            id,
            labels,
            properties,
        });
        Ok(id)
    }

    pub fn create_relationship(
        &mut self,
        src: NodeId,
        rel_type: &str,
        dst: NodeId,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<RelId> {
        self.check_writable()?;
        if self.current_node(src)?.is_none() {
            return Err(Error::UnknownNode(src));
        }
        if self.current_node(dst)?.is_none() {
            return Err(Error::UnknownNode(dst));
        }
        let id = self.store.allocate_rel_id();
        self.memtable.create_rel(RelRecord {
            id,
            rel_type: rel_type.to_string(),
            src,
            dst,
            properties,
        });
        Ok(id)
    }

    /// Sets a node property. A `Null` value removes the property.
    pub fn set_node_property(
        &mut self,
        id: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.check_writable()?;
        let mut node = self
            .current_node(id)?
            .ok_or(Error::UnknownNode(id))?;
        if value.is_null() {
            node.properties.remove(key);
        } else {
            node.properties.insert(key.to_string(), value);
        }
        self.memtable.stage_node(node);
        Ok(())
    }

    pub fn remove_node_property(&mut self, id: NodeId, key: &str) -> Result<()> {
        self.set_node_property(id, key, PropertyValue::Null)
    }

    pub fn set_relationship_property(
        &mut self,
        id: RelId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.check_writable()?;
        let mut rel = self
            .current_rel(id)?
            .ok_or(Error::UnknownRelationship(id))?;
        if value.is_null() {
            rel.properties.remove(key);
        } else {
            rel.properties.insert(key.to_string(), value);
        }
        self.memtable.stage_rel(rel);
        Ok(())
    }

    pub fn remove_relationship_property(&mut self, id: RelId, key: &str) -> Result<()> {
        self.set_relationship_property(id, key, PropertyValue::Null)
    }

    /// Deletes a node. Fails while incident relationships remain unless
    /// `detach` removes them in the same operation.
    pub fn delete_node(&mut self, id: NodeId, detach: bool) -> Result<()> {
        self.check_writable()?;
        if self.current_node(id)?.is_none() {
            return Err(Error::UnknownNode(id));
        }
        let incident = self.view().incident(id, Direction::Both, None);
        if !incident.is_empty() {
            if !detach {
                return Err(Error::NodeHasRelationships(id));
            }
            for rel in incident {
                self.memtable.delete_rel(rel.id);
            }
        }
        self.memtable.delete_node(id);
        Ok(())
    }

    pub fn delete_relationship(&mut self, id: RelId) -> Result<()> {
        self.check_writable()?;
        if self.current_rel(id)?.is_none() {
            return Err(Error::UnknownRelationship(id));
        }
        self.memtable.delete_rel(id);
        Ok(())
    }

    /// Durably commits the pending writes. See [`Store`] for the pipeline.
    pub fn commit(mut self) -> Result<u64> {
        if self.state != TxState::Active {
            return Err(Error::TransactionNotActive);
        }
        if self.deadline_passed() {
            self.state = TxState::Aborted;
            self.store.finish_txn(self.id);
            return Err(Error::DeadlineExceeded);
        }
        let store = self.store.clone();
        store.commit_transaction(&mut self)
    }

    /// Discards all pending writes. Storage and indexes are untouched.
    pub fn rollback(mut self) {
        self.state = TxState::Aborted;
        self.store.finish_txn(self.id);
    }

    /// Captures the pending write set so a failed statement can be undone
    /// without aborting the whole transaction.
    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.memtable.clone())
    }

    /// Rewinds the pending write set to a savepoint.
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        self.memtable = savepoint.0;
    }

    fn current_node(&self, id: NodeId) -> Result<Option<NodeRecord>> {
        Ok(match self.memtable.node_state(id) {
            Some(state) => state.cloned(),
            None => self.base().node(id),
        })
    }

    fn current_rel(&self, id: RelId) -> Result<Option<RelRecord>> {
        Ok(match self.memtable.rel_state(id) {
            Some(state) => state.cloned(),
            None => self.base().relationship(id),
        })
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            self.state = TxState::Aborted;
            self.store.finish_txn(self.id);
        }
    }
}

/// A transaction's read view: the base snapshot with this transaction's
/// pending writes overlaid. Entity reads are tracked for serializable
/// conflict detection.
pub struct TxView<'a> {
    txn: &'a Transaction,
    base: Snapshot,
}

impl<'a> TxView<'a> {
    fn record_read(&self, entity: EntityRef) {
        if self.txn.isolation == IsolationLevel::Serializable {
            self.txn.reads.borrow_mut().insert(entity);
        }
    }

    fn node_visible(&self, id: NodeId) -> bool {
        match self.txn.memtable.node_state(id) {
            Some(state) => state.is_some(),
            None => true,
        }
    }
}

impl<'a> GraphView for TxView<'a> {
    fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.record_read(EntityRef::Node(id));
        match self.txn.memtable.node_state(id) {
            Some(state) => state.cloned(),
            None => self.base.node(id),
        }
    }

    fn relationship(&self, id: RelId) -> Option<RelRecord> {
        self.record_read(EntityRef::Rel(id));
        match self.txn.memtable.rel_state(id) {
            Some(state) => state.cloned(),
            None => self.base.relationship(id),
        }
    }

    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        let created = self.txn.memtable.created_nodes.keys().copied();
        Box::new(
            self.base
                .node_ids()
                .filter(move |id| self.node_visible(*id))
                .chain(created),
        )
    }

    fn relationship_ids(&self) -> Box<dyn Iterator<Item = RelId> + '_> {
        let created = self.txn.memtable.created_rels.keys().copied();
        Box::new(
            self.base
                .relationship_ids()
                .filter(move |id| match self.txn.memtable.rel_state(*id) {
                    Some(state) => state.is_some(),
                    None => true,
                })
                .chain(created),
        )
    }

    fn nodes_with_label(&self, label: &str) -> Box<dyn Iterator<Item = NodeId> + '_> {
        let mut ids: BTreeSet<NodeId> = BTreeSet::new();
        for id in self.base.nodes_with_label(label) {
            match self.txn.memtable.node_state(id) {
                Some(Some(node)) => {
                    if node.has_label(label) {
                        ids.insert(id);
                    }
                }
                Some(None) => {}
                None => {
                    ids.insert(id);
                }
            }
        }
        for node in self
            .txn
            .memtable
            .created_nodes
            .values()
            .chain(self.txn.memtable.updated_nodes.values())
        {
            if node.has_label(label) {
                ids.insert(node.id);
            }
        }
        Box::new(ids.into_iter())
    }

    fn incident(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Vec<RelRecord> {
        let mut out: Vec<RelRecord> = Vec::new();
        for rel in self.base.incident(node, direction, rel_type) {
            match self.txn.memtable.rel_state(rel.id) {
                Some(Some(updated)) => out.push(updated.clone()),
                Some(None) => {}
                None => out.push(rel),
            }
        }
        for rel in self.txn.memtable.created_rels.values() {
            let matches_direction = match direction {
                Direction::Outgoing => rel.src == node,
                Direction::Incoming => rel.dst == node,
                Direction::Both => rel.src == node || rel.dst == node,
            };
            if matches_direction && rel_type.is_none_or(|t| rel.rel_type == t) {
                out.push(rel.clone());
            }
        }
        out
    }

    fn lookup_index(
        &self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Option<Vec<NodeId>> {
        let base_ids = self.base.lookup_index(label, property, value)?;
        let mut ids: BTreeSet<NodeId> = BTreeSet::new();
        for id in base_ids {
            match self.txn.memtable.node_state(id) {
                Some(Some(node)) => {
                    if node.has_label(label) && node.property(property) == Some(value) {
                        ids.insert(id);
                    }
                }
                Some(None) => {}
                None => {
                    ids.insert(id);
                }
            }
        }
        for node in self
            .txn
            .memtable
            .created_nodes
            .values()
            .chain(self.txn.memtable.updated_nodes.values())
        {
            if node.has_label(label) && node.property(property) == Some(value) {
                ids.insert(node.id);
            }
        }
        Some(ids.into_iter().collect())
    }

    fn labels(&self) -> Vec<String> {
        let mut labels: BTreeSet<String> = self.base.labels().into_iter().collect();
        for node in self
            .txn
            .memtable
            .created_nodes
            .values()
            .chain(self.txn.memtable.updated_nodes.values())
        {
            labels.extend(node.labels.iter().cloned());
        }
        labels.into_iter().collect()
    }

    fn deadline_exceeded(&self) -> bool {
        self.txn.deadline_passed()
    }
}
