//! The storage engine: WAL-backed durability, content-addressed block
//! archive, published snapshots, and the commit pipeline.
//!
//! Commit pipeline: conflict detection -> constraint checks -> successor
//! state construction (which validates structure) -> WAL append + fsync ->
//! block archive -> atomic snapshot publish. Any failure before the WAL
//! commit marker leaves no trace; recovery replays only marker-bracketed
//! transactions.

use crate::block::BlockStore;
use crate::catalog::Catalog;
use crate::constraint::{self, ConstraintDecl, ConstraintKind};
use crate::index::{IndexDef, IndexKind};
use crate::memtable::MemTable;
use crate::snapshot::{CommittedState, Snapshot};
use crate::txn::{EntityRef, IsolationLevel, Transaction, TxState};
use crate::wal::{Wal, WalRecord};
use crate::{Error, Result};
use plexusdb_api::{NodeId, NodeRecord, RelId, RelRecord};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
struct CommitFootprint {
    epoch: u64,
    writes: BTreeSet<EntityRef>,
}

#[derive(Debug)]
pub struct Store {
    wal_path: PathBuf,
    wal: Mutex<Wal>,
    blocks: Mutex<BlockStore>,
    current: RwLock<Snapshot>,
    catalog: Arc<Catalog>,
    commit_lock: Mutex<()>,
    next_txid: AtomicU64,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    recent_commits: Mutex<Vec<CommitFootprint>>,
    active: Mutex<BTreeMap<u64, u64>>,
    poisoned: AtomicBool,
}

impl Store {
    /// Opens the store, replaying the WAL to rebuild committed state, the
    /// block archive, and catalog declarations.
    pub fn open(wal_path: impl AsRef<Path>, catalog: Arc<Catalog>) -> Result<Store> {
        let wal_path = wal_path.as_ref().to_path_buf();
        let wal = Wal::open(&wal_path)?;
        let committed = wal
            .replay_committed()
            .map_err(|e| Error::RecoveryFailed(e.to_string()))?;

        let mut state = CommittedState::empty();
        let mut blocks = BlockStore::new();
        let mut max_txid = 0u64;
        let mut max_node = 0u64;
        let mut max_rel = 0u64;
        let mut epoch = 0u64;
        let replayed = committed.len();

        for tx in committed {
            max_txid = max_txid.max(tx.txid);
            let mut delta = MemTable::default();
            for op in tx.ops {
                match op {
                    WalRecord::CreateNode { node } => {
                        max_node = max_node.max(node.id);
                        blocks.record_node(&node)?;
                        delta.create_node(node);
                    }
                    WalRecord::UpdateNode { node } => {
                        blocks.record_node(&node)?;
                        delta.stage_node(node);
                    }
                    WalRecord::DeleteNode { id } => {
                        blocks.retire_node(id);
                        delta.delete_node(id);
                    }
                    WalRecord::CreateRel { rel } => {
                        max_rel = max_rel.max(rel.id);
                        blocks.record_rel(&rel)?;
                        delta.create_rel(rel);
                    }
                    WalRecord::UpdateRel { rel } => {
                        blocks.record_rel(&rel)?;
                        delta.stage_rel(rel);
                    }
                    WalRecord::DeleteRel { id } => {
                        blocks.retire_rel(id);
                        delta.delete_rel(id);
                    }
                    WalRecord::DeclareIndex { def } => {
                        epoch += 1;
                        state = state.with_index(def.clone(), epoch);
                        catalog
                            .inner
                            .write()
                            .unwrap()
                            .indexes
                            .insert(def.name.clone(), def);
                    }
                    WalRecord::DeclareConstraint { decl } => {
                        // Validated when first declared; replay trusts the log.
                        catalog
                            .inner
                            .write()
                            .unwrap()
                            .constraints
                            .insert(decl.name.clone(), decl);
                    }
                    WalRecord::Begin { .. } | WalRecord::Commit { .. } => {
                        return Err(Error::RecoveryFailed(
                            "transaction marker inside op stream".to_string(),
                        ));
                    }
                }
            }
            if !delta.is_empty() {
                epoch += 1;
                state = state
                    .apply(&delta, epoch)
                    .map_err(|e| Error::RecoveryFailed(e.to_string()))?;
            }
        }

        if replayed > 0 {
            log::info!(
                "recovered {} committed transactions from {} ({} nodes, {} relationships)",
                replayed,
                wal_path.display(),
                state.node_count(),
                state.rel_count()
            );
        }

        Ok(Store {
            wal_path,
            wal: Mutex::new(wal),
            blocks: Mutex::new(blocks),
            current: RwLock::new(Snapshot::new(Arc::new(state))),
            catalog,
            commit_lock: Mutex::new(()),
            next_txid: AtomicU64::new(max_txid + 1),
            next_node_id: AtomicU64::new(max_node + 1),
            next_rel_id: AtomicU64::new(max_rel + 1),
            recent_commits: Mutex::new(Vec::new()),
            active: Mutex::new(BTreeMap::new()),
            poisoned: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The latest published snapshot.
    pub fn snapshot(&self) -> Snapshot {
        self.current.read().unwrap().clone()
    }

    /// Begins a transaction at the requested isolation level.
    pub fn begin(self: &Arc<Self>, isolation: IsolationLevel) -> Result<Transaction> {
        self.check_poisoned()?;
        let id = self.next_txid.fetch_add(1, Ordering::Relaxed);
        let txn = Transaction::new(Arc::clone(self), id, isolation);
        self.active.lock().unwrap().insert(id, txn.start_epoch);
        Ok(txn)
    }

    pub(crate) fn allocate_node_id(&self) -> NodeId {
        self.next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn allocate_rel_id(&self) -> RelId {
        self.next_rel_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn finish_txn(&self, id: u64) {
        let mut active = self.active.lock().unwrap();
        active.remove(&id);
        let floor = active
            .values()
            .copied()
            .min()
            .unwrap_or_else(|| self.snapshot().epoch());
        self.recent_commits
            .lock()
            .unwrap()
            .retain(|c| c.epoch > floor);
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
        log::error!("store poisoned; refusing further transactions");
    }

    pub(crate) fn commit_transaction(&self, txn: &mut Transaction) -> Result<u64> {
        let result = self.try_commit(txn);
        match &result {
            Ok(_) => txn.state = TxState::Committed,
            Err(_) => txn.state = TxState::Aborted,
        }
        self.finish_txn(txn.id);
        result
    }

    fn try_commit(&self, txn: &mut Transaction) -> Result<u64> {
        self.check_poisoned()?;

        if txn.memtable.is_empty() {
            return Ok(self.snapshot().epoch());
        }

        let _guard = self.commit_lock.lock().unwrap();
        let latest = self.snapshot();
        let writes = txn.memtable.write_set();

        // First committer wins: a concurrently committed writer that touched
        // our footprint aborts us, never the already-committed winner.
        match txn.isolation {
            IsolationLevel::Snapshot | IsolationLevel::Serializable => {
                let recent = self.recent_commits.lock().unwrap();
                for commit in recent.iter().filter(|c| c.epoch > txn.start_epoch) {
                    if let Some(entity) = commit.writes.intersection(&writes).next() {
                        return Err(Error::Conflict(format!(
                            "write-write conflict on {entity:?}"
                        )));
                    }
                    if txn.isolation == IsolationLevel::Serializable {
                        let reads = txn.reads.borrow();
                        if let Some(entity) = commit.writes.intersection(&reads).next() {
                            return Err(Error::Conflict(format!(
                                "read set invalidated on {entity:?}"
                            )));
                        }
                    }
                }
            }
            IsolationLevel::ReadCommitted | IsolationLevel::RepeatableRead => {}
        }

        {
            let inner = self.catalog.inner.read().unwrap();
            constraint::check_pending(
                &inner.constraints,
                &self.catalog.predicates(),
                latest.state(),
                &txn.memtable,
            )?;
        }

        // Build the successor first: this validates structure (dangling
        // relationships, deletes with remaining edges) before anything is
        // made durable.
        let epoch = latest.epoch() + 1;
        let next = latest.state().apply(&txn.memtable, epoch)?;

        if let Err(e) = self.append_and_sync(txn.id, &txn.memtable) {
            // The log may now hold a partial segment; replay discards it,
            // but the in-process file handle state is unknown.
            self.poison();
            return Err(e);
        }

        {
            let mut blocks = self.blocks.lock().unwrap();
            for node in txn.memtable.created_nodes.values() {
                blocks.record_node(node)?;
            }
            for node in txn.memtable.updated_nodes.values() {
                blocks.record_node(node)?;
            }
            for id in &txn.memtable.deleted_nodes {
                blocks.retire_node(*id);
            }
            for rel in txn.memtable.created_rels.values() {
                blocks.record_rel(rel)?;
            }
            for rel in txn.memtable.updated_rels.values() {
                blocks.record_rel(rel)?;
            }
            for id in &txn.memtable.deleted_rels {
                blocks.retire_rel(*id);
            }
        }

        *self.current.write().unwrap() = Snapshot::new(Arc::new(next));
        self.recent_commits
            .lock()
            .unwrap()
            .push(CommitFootprint { epoch, writes });

        log::debug!("txn {} committed at epoch {}", txn.id, epoch);
        Ok(epoch)
    }

    fn append_and_sync(&self, txid: u64, delta: &MemTable) -> Result<()> {
        let mut wal = self.wal.lock().unwrap();
        wal.append(&WalRecord::Begin { txid })?;
        for node in delta.created_nodes.values() {
            wal.append(&WalRecord::CreateNode { node: node.clone() })?;
        }
        for node in delta.updated_nodes.values() {
            wal.append(&WalRecord::UpdateNode { node: node.clone() })?;
        }
        for id in &delta.deleted_nodes {
            wal.append(&WalRecord::DeleteNode { id: *id })?;
        }
        for rel in delta.created_rels.values() {
            wal.append(&WalRecord::CreateRel { rel: rel.clone() })?;
        }
        for rel in delta.updated_rels.values() {
            wal.append(&WalRecord::UpdateRel { rel: rel.clone() })?;
        }
        for id in &delta.deleted_rels {
            wal.append(&WalRecord::DeleteRel { id: *id })?;
        }
        wal.append(&WalRecord::Commit { txid })?;
        wal.fsync()
    }

    /// Declares an index and backfills it from existing data before it
    /// becomes active for lookups.
    pub fn create_index(&self, def: IndexDef) -> Result<()> {
        self.check_poisoned()?;
        validate_index_def(&def)?;

        let _guard = self.commit_lock.lock().unwrap();
        if self.catalog.index(&def.name).is_some() {
            return Err(Error::IndexExists(def.name));
        }

        let txid = self.next_txid.fetch_add(1, Ordering::Relaxed);
        {
            let mut wal = self.wal.lock().unwrap();
            wal.append(&WalRecord::Begin { txid })?;
            wal.append(&WalRecord::DeclareIndex { def: def.clone() })?;
            wal.append(&WalRecord::Commit { txid })?;
            wal.fsync()?;
        }

        let latest = self.snapshot();
        let next = latest.state().with_index(def.clone(), latest.epoch() + 1);
        *self.current.write().unwrap() = Snapshot::new(Arc::new(next));
        self.catalog
            .inner
            .write()
            .unwrap()
            .indexes
            .insert(def.name.clone(), def.clone());

        log::info!(
            "index '{}' ({:?}) on :{}({}) backfilled and active",
            def.name,
            def.kind,
            def.label,
            def.properties.join(", ")
        );
        Ok(())
    }

    /// Declares a constraint. Existing data is validated first; a violation
    /// fails the declaration and nothing becomes active.
    pub fn create_constraint(&self, decl: ConstraintDecl) -> Result<()> {
        self.check_poisoned()?;

        let _guard = self.commit_lock.lock().unwrap();
        {
            let inner = self.catalog.inner.read().unwrap();
            if inner.constraints.contains_key(&decl.name) {
                return Err(Error::ConstraintExists(decl.name));
            }
        }
        if let ConstraintKind::Predicate { predicate } = &decl.kind {
            if !self.catalog.predicates().contains_key(predicate) {
                return Err(Error::UnregisteredPredicate(predicate.clone()));
            }
        }

        let latest = self.snapshot();
        constraint::check_existing(&decl, &self.catalog.predicates(), latest.state())?;

        let txid = self.next_txid.fetch_add(1, Ordering::Relaxed);
        {
            let mut wal = self.wal.lock().unwrap();
            wal.append(&WalRecord::Begin { txid })?;
            wal.append(&WalRecord::DeclareConstraint { decl: decl.clone() })?;
            wal.append(&WalRecord::Commit { txid })?;
            wal.fsync()?;
        }

        self.catalog
            .inner
            .write()
            .unwrap()
            .constraints
            .insert(decl.name.clone(), decl);
        Ok(())
    }

    /// All retained versions of a node, oldest first, decoded from the
    /// content-addressed archive.
    pub fn node_history(&self, id: NodeId) -> Result<Vec<NodeRecord>> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .node_versions(id)
            .iter()
            .map(|addr| blocks.node_at(*addr))
            .collect()
    }

    pub fn relationship_history(&self, id: RelId) -> Result<Vec<RelRecord>> {
        let blocks = self.blocks.lock().unwrap();
        blocks
            .rel_versions(id)
            .iter()
            .map(|addr| blocks.rel_at(*addr))
            .collect()
    }
}

fn validate_index_def(def: &IndexDef) -> Result<()> {
    let arity_ok = match def.kind {
        IndexKind::Lookup => def.properties.is_empty(),
        IndexKind::Composite => def.properties.len() >= 2,
        _ => def.properties.len() == 1,
    };
    if !arity_ok {
        return Err(Error::Corrupted(format!(
            "index '{}' has wrong property count for {:?}",
            def.name, def.kind
        )));
    }
    Ok(())
}
