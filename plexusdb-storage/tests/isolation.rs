use plexusdb_api::{GraphView, PropertyValue};
use plexusdb_storage::catalog::Catalog;
use plexusdb_storage::constraint::{ConstraintDecl, ConstraintKind, ValueType};
use plexusdb_storage::{Error, IsolationLevel, Store};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

fn open(dir: &tempfile::TempDir) -> Arc<Store> {
    Arc::new(Store::open(dir.path().join("graph.wal"), Arc::new(Catalog::new())).unwrap())
}

fn named(name: &str) -> BTreeMap<String, PropertyValue> {
    let mut m = BTreeMap::new();
    m.insert("name".into(), PropertyValue::String(name.into()));
    m
}

#[test]
fn repeatable_read_pins_the_start_snapshot() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let id = setup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    setup.commit().unwrap();

    let reader = store.begin(IsolationLevel::RepeatableRead).unwrap();
    assert_eq!(
        reader.view().node(id).unwrap().property("name"),
        Some(&PropertyValue::String("Alice".into()))
    );

    let mut writer = store.begin(IsolationLevel::Snapshot).unwrap();
    writer
        .set_node_property(id, "name", PropertyValue::String("Alicia".into()))
        .unwrap();
    writer.commit().unwrap();

    // Still the start-of-transaction value.
    assert_eq!(
        reader.view().node(id).unwrap().property("name"),
        Some(&PropertyValue::String("Alice".into()))
    );
}

#[test]
fn read_committed_observes_later_commits() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let id = setup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    setup.commit().unwrap();

    let reader = store.begin(IsolationLevel::ReadCommitted).unwrap();
    assert_eq!(
        reader.view().node(id).unwrap().property("name"),
        Some(&PropertyValue::String("Alice".into()))
    );

    let mut writer = store.begin(IsolationLevel::Snapshot).unwrap();
    writer
        .set_node_property(id, "name", PropertyValue::String("Alicia".into()))
        .unwrap();
    writer.commit().unwrap();

    assert_eq!(
        reader.view().node(id).unwrap().property("name"),
        Some(&PropertyValue::String("Alicia".into()))
    );
}

#[test]
fn snapshot_isolation_first_committer_wins() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let id = setup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    setup.commit().unwrap();

    let mut first = store.begin(IsolationLevel::Snapshot).unwrap();
    let mut second = store.begin(IsolationLevel::Snapshot).unwrap();

    first
        .set_node_property(id, "name", PropertyValue::String("A".into()))
        .unwrap();
    second
        .set_node_property(id, "name", PropertyValue::String("B".into()))
        .unwrap();

    first.commit().unwrap();
    assert!(matches!(second.commit(), Err(Error::Conflict(_))));

    // The loser left nothing behind.
    assert_eq!(
        store.snapshot().node(id).unwrap().property("name"),
        Some(&PropertyValue::String("A".into()))
    );
}

#[test]
fn snapshot_isolation_disjoint_writers_both_commit() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let a = setup.create_node(vec!["Person".into()], named("A")).unwrap();
    let b = setup.create_node(vec!["Person".into()], named("B")).unwrap();
    setup.commit().unwrap();

    let mut first = store.begin(IsolationLevel::Snapshot).unwrap();
    let mut second = store.begin(IsolationLevel::Snapshot).unwrap();
    first
        .set_node_property(a, "age", PropertyValue::Int(1))
        .unwrap();
    second
        .set_node_property(b, "age", PropertyValue::Int(2))
        .unwrap();

    first.commit().unwrap();
    second.commit().unwrap();
}

#[test]
fn serializable_detects_read_set_invalidation() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let watched = setup.create_node(vec!["Account".into()], named("a")).unwrap();
    let other = setup.create_node(vec!["Account".into()], named("b")).unwrap();
    setup.commit().unwrap();

    // T1 reads `watched`, then writes `other`; T2 writes `watched` and
    // commits first. Classic write skew, rejected under serializable.
    let mut t1 = store.begin(IsolationLevel::Serializable).unwrap();
    let _ = t1.view().node(watched);
    t1.set_node_property(other, "balance", PropertyValue::Int(0))
        .unwrap();

    let mut t2 = store.begin(IsolationLevel::Snapshot).unwrap();
    t2.set_node_property(watched, "balance", PropertyValue::Int(-1))
        .unwrap();
    t2.commit().unwrap();

    assert!(matches!(t1.commit(), Err(Error::Conflict(_))));
}

#[test]
fn snapshot_isolation_allows_the_same_skew_serializable_rejects() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let watched = setup.create_node(vec!["Account".into()], named("a")).unwrap();
    let other = setup.create_node(vec!["Account".into()], named("b")).unwrap();
    setup.commit().unwrap();

    let mut t1 = store.begin(IsolationLevel::Snapshot).unwrap();
    let _ = t1.view().node(watched);
    t1.set_node_property(other, "balance", PropertyValue::Int(0))
        .unwrap();

    let mut t2 = store.begin(IsolationLevel::Snapshot).unwrap();
    t2.set_node_property(watched, "balance", PropertyValue::Int(-1))
        .unwrap();
    t2.commit().unwrap();

    // Disjoint write sets: snapshot isolation lets this through.
    t1.commit().unwrap();
}

#[test]
fn transaction_sees_its_own_pending_writes() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut txn = store.begin(IsolationLevel::Snapshot).unwrap();
    let id = txn.create_node(vec!["Person".into()], named("Alice")).unwrap();

    let view = txn.view();
    assert!(view.node(id).is_some());
    assert_eq!(view.nodes_with_label("Person").count(), 1);

    // Invisible to everyone else until commit.
    assert!(store.snapshot().node(id).is_none());
    txn.commit().unwrap();
    assert!(store.snapshot().node(id).is_some());
}

#[test]
fn unique_constraint_violation_aborts_with_no_trace() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    store
        .create_constraint(ConstraintDecl {
            name: "person_name_unique".into(),
            label: "Person".into(),
            property: "name".into(),
            kind: ConstraintKind::Unique,
        })
        .unwrap();

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    setup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    setup.commit().unwrap();

    let before = store.snapshot();

    let mut dup = store.begin(IsolationLevel::Snapshot).unwrap();
    dup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    let err = dup.commit().unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation { .. }));

    let after = store.snapshot();
    assert_eq!(after.epoch(), before.epoch());
    assert_eq!(after.node_count(), 1);
}

#[test]
fn duplicate_within_one_transaction_is_rejected() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    store
        .create_constraint(ConstraintDecl {
            name: "person_name_unique".into(),
            label: "Person".into(),
            property: "name".into(),
            kind: ConstraintKind::Unique,
        })
        .unwrap();

    let mut txn = store.begin(IsolationLevel::Snapshot).unwrap();
    txn.create_node(vec!["Person".into()], named("Alice")).unwrap();
    txn.create_node(vec!["Person".into()], named("Alice")).unwrap();
    assert!(matches!(
        txn.commit(),
        Err(Error::ConstraintViolation { .. })
    ));
}

#[test]
fn existence_and_type_constraints() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    store
        .create_constraint(ConstraintDecl {
            name: "person_has_name".into(),
            label: "Person".into(),
            property: "name".into(),
            kind: ConstraintKind::Exists,
        })
        .unwrap();
    store
        .create_constraint(ConstraintDecl {
            name: "person_age_int".into(),
            label: "Person".into(),
            property: "age".into(),
            kind: ConstraintKind::PropertyType(ValueType::Int),
        })
        .unwrap();

    let mut missing = store.begin(IsolationLevel::Snapshot).unwrap();
    missing.create_node(vec!["Person".into()], BTreeMap::new()).unwrap();
    assert!(matches!(
        missing.commit(),
        Err(Error::ConstraintViolation { .. })
    ));

    let mut wrong_type = store.begin(IsolationLevel::Snapshot).unwrap();
    let mut props = named("Alice");
    props.insert("age".into(), PropertyValue::String("old".into()));
    wrong_type.create_node(vec!["Person".into()], props).unwrap();
    assert!(matches!(
        wrong_type.commit(),
        Err(Error::ConstraintViolation { .. })
    ));

    let mut fine = store.begin(IsolationLevel::Snapshot).unwrap();
    let mut props = named("Alice");
    props.insert("age".into(), PropertyValue::Int(30));
    fine.create_node(vec!["Person".into()], props).unwrap();
    fine.commit().unwrap();
}

#[test]
fn custom_predicate_constraint() {
    let dir = tempdir().unwrap();
    let catalog = Arc::new(Catalog::new());
    catalog.register_predicate("non_negative", |v| match v {
        PropertyValue::Int(i) => *i >= 0,
        PropertyValue::Null => true,
        _ => false,
    });
    let store =
        Arc::new(Store::open(dir.path().join("graph.wal"), catalog).unwrap());

    store
        .create_constraint(ConstraintDecl {
            name: "age_non_negative".into(),
            label: "Person".into(),
            property: "age".into(),
            kind: ConstraintKind::Predicate {
                predicate: "non_negative".into(),
            },
        })
        .unwrap();

    let mut bad = store.begin(IsolationLevel::Snapshot).unwrap();
    let mut props = BTreeMap::new();
    props.insert("age".into(), PropertyValue::Int(-5));
    bad.create_node(vec!["Person".into()], props).unwrap();
    assert!(matches!(
        bad.commit(),
        Err(Error::ConstraintViolation { .. })
    ));
}

#[test]
fn constraint_declaration_fails_on_existing_violations() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    setup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    setup.create_node(vec!["Person".into()], named("Alice")).unwrap();
    setup.commit().unwrap();

    let err = store
        .create_constraint(ConstraintDecl {
            name: "person_name_unique".into(),
            label: "Person".into(),
            property: "name".into(),
            kind: ConstraintKind::Unique,
        })
        .unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation { .. }));
    assert!(store.catalog().constraint_decls().is_empty());
}

#[test]
fn deadline_aborts_gracefully() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut txn = store.begin(IsolationLevel::Snapshot).unwrap();
    txn.create_node(vec!["Person".into()], named("Alice")).unwrap();
    txn.set_deadline(std::time::Instant::now() - std::time::Duration::from_millis(1));

    assert!(txn.view().deadline_exceeded());
    assert!(matches!(
        txn.create_node(vec![], BTreeMap::new()),
        Err(Error::DeadlineExceeded)
    ));
    assert!(matches!(txn.commit(), Err(Error::DeadlineExceeded)));
    assert_eq!(store.snapshot().node_count(), 0);
}

#[test]
fn concurrent_single_writer_counter_increments() {
    let dir = tempdir().unwrap();
    let store = open(&dir);

    let mut setup = store.begin(IsolationLevel::Snapshot).unwrap();
    let id = setup.create_node(vec!["Counter".into()], BTreeMap::new()).unwrap();
    setup.set_node_property(id, "value", PropertyValue::Int(0)).unwrap();
    setup.commit().unwrap();

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                // Retry loop: conflict is the documented caller-retry path.
                loop {
                    let mut txn = store.begin(IsolationLevel::Snapshot).unwrap();
                    let current = match txn.view().node(id).unwrap().property("value") {
                        Some(PropertyValue::Int(i)) => *i,
                        _ => panic!("counter must be an int"),
                    };
                    txn.set_node_property(id, "value", PropertyValue::Int(current + 1))
                        .unwrap();
                    match txn.commit() {
                        Ok(_) => break,
                        Err(Error::Conflict(_)) => continue,
                        Err(e) => panic!("unexpected commit error: {e}"),
                    }
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    assert_eq!(
        store.snapshot().node(id).unwrap().property("value"),
        Some(&PropertyValue::Int(4))
    );
}
