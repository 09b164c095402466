//! # PlexusDB
//!
//! An embedded, crash-safe property graph database with a Cypher-compatible
//! query engine.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use plexusdb::{Db, Params, Result};
//!
//! fn main() -> Result<()> {
//!     let db = Db::open("my_graph")?;
//!
//!     db.run(
//!         "CREATE (a:Person {name: 'Alice'})-[:KNOWS]->(b:Person {name: 'Bob'})",
//!         &Params::new(),
//!     )?;
//!
//!     let result = db.run(
//!         "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name, b.name",
//!         &Params::new(),
//!     )?;
//!     for row in &result.rows {
//!         println!("{row:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Core concepts
//!
//! - [`Db`]: the entry point. Owns the storage engine and catalog; safe to
//!   share across threads.
//! - [`Transaction`]: explicit multi-statement transactions at a chosen
//!   isolation level. Reads observe the transaction's own pending writes.
//! - [`Db::run`]: one-shot execution; write statements commit their own
//!   transaction, reads run against the latest snapshot.
//! - [`query`]: the Cypher engine (re-exported from `plexusdb-query`).

mod error;

use plexusdb_query::{PreparedQuery, QueryKind, WriteableGraph};
use plexusdb_storage::store::Store;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

pub use error::{Error, Result};
pub use plexusdb_api::{
    Direction, GraphView, NodeId, NodeRecord, PropertyValue, RelId, RelRecord,
};
pub use plexusdb_query as query;
pub use plexusdb_query::{Params, Row, Value, WriteSummary};
pub use plexusdb_storage::catalog::Catalog;
pub use plexusdb_storage::constraint::{ConstraintDecl, ConstraintKind, ValueType};
pub use plexusdb_storage::index::{IndexDef, IndexKind};
pub use plexusdb_storage::{Error as StorageError, IsolationLevel, Snapshot};
pub use plexusdb_query::Error as QueryError;

/// The outcome of one executed statement.
#[derive(Debug)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub summary: Option<WriteSummary>,
}

/// The main database handle.
///
/// # Concurrency
///
/// `Db` can be shared across threads. Readers never block; writers are
/// serialized at commit and resolve conflicts per their isolation level.
#[derive(Debug)]
pub struct Db {
    store: Arc<Store>,
}

impl Db {
    /// Opens a database. `path` names the write-ahead log file; a `.wal`
    /// extension is appended unless already present. Opening replays the
    /// log, discarding any transaction without a commit marker.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_catalog(path, Arc::new(Catalog::new()))
    }

    /// Opens a database with a pre-built catalog. Use this to register
    /// custom constraint predicates before replay, so `Predicate`
    /// constraint declarations in the log can be restored.
    pub fn open_with_catalog(path: impl AsRef<Path>, catalog: Arc<Catalog>) -> Result<Self> {
        let wal_path = derive_wal_path(path.as_ref());
        let store = Arc::new(Store::open(wal_path, catalog)?);
        Ok(Self { store })
    }

    /// The path of the write-ahead log backing this database.
    pub fn wal_path(&self) -> &Path {
        self.store.wal_path()
    }

    /// A consistent read snapshot of the latest committed state.
    ///
    /// Snapshots also carry the stable iteration surface
    /// ([`Snapshot::node_records`], [`Snapshot::relationship_records`])
    /// used by external translators.
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    /// Begins an explicit transaction at the given isolation level.
    pub fn begin(&self, isolation: IsolationLevel) -> Result<Transaction> {
        Ok(Transaction {
            inner: RefCell::new(self.store.begin(isolation)?),
        })
    }

    /// Parses, compiles, and executes one statement.
    ///
    /// Reads run against a fresh snapshot. Writes run in their own
    /// snapshot-isolation transaction, committed on success and rolled
    /// back on any error.
    pub fn run(&self, text: &str, params: &Params) -> Result<QueryResult> {
        let prepared = plexusdb_query::prepare(text)?;
        if prepared.is_explain() || prepared.kind() == QueryKind::Read {
            let snapshot = self.snapshot();
            return collect_rows(&prepared, &snapshot, params);
        }

        let txn = self.begin(IsolationLevel::Snapshot)?;
        match txn.execute_write(&prepared, params) {
            Ok(summary) => {
                txn.commit()?;
                Ok(QueryResult {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    summary: Some(summary),
                })
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }

    /// Declares an index. Existing data is backfilled before the index
    /// serves lookups.
    pub fn create_index(&self, def: IndexDef) -> Result<()> {
        self.store.create_index(def).map_err(Error::from)
    }

    /// Declares a constraint. Existing data is validated first; a
    /// violation fails the declaration.
    pub fn create_constraint(&self, decl: ConstraintDecl) -> Result<()> {
        self.store.create_constraint(decl).map_err(Error::from)
    }

    /// The catalog of declared indexes and constraints.
    pub fn catalog(&self) -> &Arc<Catalog> {
        self.store.catalog()
    }

    /// All retained versions of a node, oldest first, from the
    /// content-addressed block archive.
    pub fn node_history(&self, id: NodeId) -> Result<Vec<NodeRecord>> {
        self.store.node_history(id).map_err(Error::from)
    }

    pub fn relationship_history(&self, id: RelId) -> Result<Vec<RelRecord>> {
        self.store.relationship_history(id).map_err(Error::from)
    }
}

/// An explicit multi-statement transaction.
///
/// Statements run through [`Transaction::run`] observe the transaction's
/// own pending writes. A failed write statement is rewound to its start,
/// leaving earlier statements of the transaction intact; commit makes the
/// whole transaction durable atomically.
pub struct Transaction {
    inner: RefCell<plexusdb_storage::Transaction>,
}

impl Transaction {
    /// Executes one statement inside this transaction.
    pub fn run(&self, text: &str, params: &Params) -> Result<QueryResult> {
        let prepared = plexusdb_query::prepare(text)?;
        if prepared.is_explain() || prepared.kind() == QueryKind::Read {
            let view = TxnViewRef { txn: &self.inner };
            return collect_rows(&prepared, &view, params);
        }

        // Statement-level savepoint: a failed write statement rolls back
        // its own effects without aborting the transaction.
        let savepoint = self.inner.borrow().savepoint();
        match self.execute_write(&prepared, params) {
            Ok(summary) => Ok(QueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                summary: Some(summary),
            }),
            Err(e) => {
                self.inner.borrow_mut().rollback_to(savepoint);
                Err(e)
            }
        }
    }

    fn execute_write(&self, prepared: &PreparedQuery, params: &Params) -> Result<WriteSummary> {
        let view = TxnViewRef { txn: &self.inner };
        let mut writer = TxnWriter { txn: &self.inner };
        prepared
            .execute_write(&view, &mut writer, params)
            .map_err(Error::from)
    }

    /// Arms a deadline; once passed, statement execution aborts gracefully
    /// and commit is refused.
    pub fn set_deadline(&self, deadline: Instant) {
        self.inner.borrow_mut().set_deadline(deadline);
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.inner.borrow().isolation()
    }

    pub fn create_node(
        &self,
        labels: Vec<String>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<NodeId> {
        self.inner
            .borrow_mut()
            .create_node(labels, properties)
            .map_err(Error::from)
    }

    pub fn create_relationship(
        &self,
        src: NodeId,
        rel_type: &str,
        dst: NodeId,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<RelId> {
        self.inner
            .borrow_mut()
            .create_relationship(src, rel_type, dst, properties)
            .map_err(Error::from)
    }

    pub fn set_node_property(
        &self,
        id: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        self.inner
            .borrow_mut()
            .set_node_property(id, key, value)
            .map_err(Error::from)
    }

    pub fn delete_node(&self, id: NodeId, detach: bool) -> Result<()> {
        self.inner
            .borrow_mut()
            .delete_node(id, detach)
            .map_err(Error::from)
    }

    pub fn delete_relationship(&self, id: RelId) -> Result<()> {
        self.inner
            .borrow_mut()
            .delete_relationship(id)
            .map_err(Error::from)
    }

    /// Durably commits. The WAL segment is flushed before the new state is
    /// published; constraint or conflict failures abort with no effect.
    pub fn commit(self) -> Result<u64> {
        self.inner.into_inner().commit().map_err(Error::from)
    }

    /// Discards every pending write.
    pub fn rollback(self) {
        self.inner.into_inner().rollback();
    }
}

/// Read view over a transaction, including its uncommitted writes.
struct TxnViewRef<'a> {
    txn: &'a RefCell<plexusdb_storage::Transaction>,
}

impl<'a> GraphView for TxnViewRef<'a> {
    fn node(&self, id: NodeId) -> Option<NodeRecord> {
        self.txn.borrow().view().node(id)
    }

    fn relationship(&self, id: RelId) -> Option<RelRecord> {
        self.txn.borrow().view().relationship(id)
    }

    fn node_ids(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
        let ids: Vec<NodeId> = self.txn.borrow().view().node_ids().collect();
        Box::new(ids.into_iter())
    }

    fn relationship_ids(&self) -> Box<dyn Iterator<Item = RelId> + '_> {
        let ids: Vec<RelId> = self.txn.borrow().view().relationship_ids().collect();
        Box::new(ids.into_iter())
    }

    fn nodes_with_label(&self, label: &str) -> Box<dyn Iterator<Item = NodeId> + '_> {
        let ids: Vec<NodeId> = self.txn.borrow().view().nodes_with_label(label).collect();
        Box::new(ids.into_iter())
    }

    fn incident(
        &self,
        node: NodeId,
        direction: Direction,
        rel_type: Option<&str>,
    ) -> Vec<RelRecord> {
        self.txn.borrow().view().incident(node, direction, rel_type)
    }

    fn lookup_index(
        &self,
        label: &str,
        property: &str,
        value: &PropertyValue,
    ) -> Option<Vec<NodeId>> {
        self.txn.borrow().view().lookup_index(label, property, value)
    }

    fn labels(&self) -> Vec<String> {
        self.txn.borrow().view().labels()
    }

    fn deadline_exceeded(&self) -> bool {
        self.txn.borrow().view().deadline_exceeded()
    }
}

/// Write access for the query engine, bridging into the storage
/// transaction.
struct TxnWriter<'a> {
    txn: &'a RefCell<plexusdb_storage::Transaction>,
}

impl<'a> WriteableGraph for TxnWriter<'a> {
    fn create_node(
        &mut self,
        labels: Vec<String>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> plexusdb_query::Result<NodeId> {
        Ok(self.txn.borrow_mut().create_node(labels, properties)?)
    }

    fn create_relationship(
        &mut self,
        src: NodeId,
        rel_type: &str,
        dst: NodeId,
        properties: BTreeMap<String, PropertyValue>,
    ) -> plexusdb_query::Result<RelId> {
        Ok(self
            .txn
            .borrow_mut()
            .create_relationship(src, rel_type, dst, properties)?)
    }

    fn set_node_property(
        &mut self,
        id: NodeId,
        key: &str,
        value: PropertyValue,
    ) -> plexusdb_query::Result<()> {
        Ok(self.txn.borrow_mut().set_node_property(id, key, value)?)
    }

    fn set_relationship_property(
        &mut self,
        id: RelId,
        key: &str,
        value: PropertyValue,
    ) -> plexusdb_query::Result<()> {
        Ok(self
            .txn
            .borrow_mut()
            .set_relationship_property(id, key, value)?)
    }

    fn delete_node(&mut self, id: NodeId, detach: bool) -> plexusdb_query::Result<()> {
        Ok(self.txn.borrow_mut().delete_node(id, detach)?)
    }

    fn delete_relationship(&mut self, id: RelId) -> plexusdb_query::Result<()> {
        Ok(self.txn.borrow_mut().delete_relationship(id)?)
    }
}

fn collect_rows<V: GraphView>(
    prepared: &PreparedQuery,
    view: &V,
    params: &Params,
) -> Result<QueryResult> {
    let mut rows = Vec::new();
    for result in prepared.execute_streaming(view, params) {
        rows.push(result?.reify(view));
    }
    let columns = if prepared.is_explain() {
        vec!["plan".to_string()]
    } else {
        prepared.columns().to_vec()
    };
    Ok(QueryResult {
        columns,
        rows,
        summary: None,
    })
}

fn derive_wal_path(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("wal") => path.to_path_buf(),
        _ => path.with_extension("wal"),
    }
}
