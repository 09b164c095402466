//! Executor wired directly to the storage layer, below the facade.

use plexusdb_api::PropertyValue;
use plexusdb_query::{Params, Value, prepare};
use plexusdb_storage::catalog::Catalog;
use plexusdb_storage::{IsolationLevel, Store};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

fn seeded_store(dir: &tempfile::TempDir) -> Arc<Store> {
    let store =
        Arc::new(Store::open(dir.path().join("graph.wal"), Arc::new(Catalog::new())).unwrap());
    let mut txn = store.begin(IsolationLevel::Snapshot).unwrap();

    let mut alice_props = BTreeMap::new();
    alice_props.insert("name".to_string(), PropertyValue::String("Alice".into()));
    let alice = txn
        .create_node(vec!["Person".into()], alice_props)
        .unwrap();

    let mut bob_props = BTreeMap::new();
    bob_props.insert("name".to_string(), PropertyValue::String("Bob".into()));
    let bob = txn.create_node(vec!["Person".into()], bob_props).unwrap();

    txn.create_relationship(alice, "KNOWS", bob, BTreeMap::new())
        .unwrap();
    txn.commit().unwrap();
    store
}

#[test]
fn streaming_execution_over_a_snapshot() {
    let dir = tempdir().unwrap();
    let store = seeded_store(&dir);
    let snapshot = store.snapshot();

    let query = prepare("MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name, b.name").unwrap();
    let rows: Vec<_> = query
        .execute_streaming(&snapshot, &Params::new())
        .collect::<plexusdb_query::Result<Vec<_>>>()
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("a.name"),
        Some(&Value::String("Alice".into()))
    );
    assert_eq!(rows[0].get("b.name"), Some(&Value::String("Bob".into())));
}

#[test]
fn execution_is_restartable_only_by_re_execution() {
    let dir = tempdir().unwrap();
    let store = seeded_store(&dir);
    let snapshot = store.snapshot();

    let query = prepare("MATCH (p:Person) RETURN p.name").unwrap();
    let first: Vec<_> = query
        .execute_streaming(&snapshot, &Params::new())
        .collect::<plexusdb_query::Result<Vec<_>>>()
        .unwrap();
    let second: Vec<_> = query
        .execute_streaming(&snapshot, &Params::new())
        .collect::<plexusdb_query::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first, second, "re-execution yields the same row set");
}

#[test]
fn transaction_view_exposes_pending_writes_to_the_executor() {
    let dir = tempdir().unwrap();
    let store = seeded_store(&dir);

    let mut txn = store.begin(IsolationLevel::Snapshot).unwrap();
    let mut props = BTreeMap::new();
    props.insert("name".to_string(), PropertyValue::String("Carol".into()));
    txn.create_node(vec!["Person".into()], props).unwrap();

    let query = prepare("MATCH (p:Person) RETURN COUNT(*) AS cnt").unwrap();
    let view = txn.view();
    let rows: Vec<_> = query
        .execute_streaming(&view, &Params::new())
        .collect::<plexusdb_query::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(rows[0].get("cnt"), Some(&Value::Int(3)));

    // The published snapshot still sees two people.
    let snapshot = store.snapshot();
    let rows: Vec<_> = query
        .execute_streaming(&snapshot, &Params::new())
        .collect::<plexusdb_query::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(rows[0].get("cnt"), Some(&Value::Int(2)));
}
