//! Transactions through the query surface: visibility of pending writes,
//! rollback, statement-level error recovery, and error taxonomy.

use plexusdb::{
    Db, Error, GraphView, IsolationLevel, Params, QueryError, Row, StorageError, Value,
};
use tempfile::tempdir;

fn val(row: &Row, name: &str) -> Value {
    row.get(name).cloned().unwrap_or(Value::Null)
}

fn open(dir: &tempfile::TempDir) -> Db {
    let _ = env_logger::builder().is_test(true).try_init();
    Db::open(dir.path().join("graph")).unwrap()
}

#[test]
fn transaction_reads_its_own_writes() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let txn = db.begin(IsolationLevel::Snapshot).unwrap();
    txn.run("CREATE (:Person {name: 'ann'})", &Params::new())
        .unwrap();

    let inside = txn
        .run("MATCH (p:Person) RETURN p.name AS name", &Params::new())
        .unwrap();
    assert_eq!(inside.rows.len(), 1);
    assert_eq!(val(&inside.rows[0], "name"), Value::String("ann".into()));

    // Invisible outside until commit.
    let outside = db
        .run("MATCH (p:Person) RETURN p.name", &Params::new())
        .unwrap();
    assert!(outside.rows.is_empty());

    txn.commit().unwrap();
    let after = db
        .run("MATCH (p:Person) RETURN p.name", &Params::new())
        .unwrap();
    assert_eq!(after.rows.len(), 1);
}

#[test]
fn rollback_discards_query_writes() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let txn = db.begin(IsolationLevel::Snapshot).unwrap();
    txn.run("CREATE (:Person {name: 'ghost'})", &Params::new())
        .unwrap();
    txn.rollback();

    let result = db
        .run("MATCH (p:Person) RETURN COUNT(*) AS cnt", &Params::new())
        .unwrap();
    assert_eq!(val(&result.rows[0], "cnt"), Value::Int(0));
}

#[test]
fn failed_statement_rewinds_but_transaction_survives() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let txn = db.begin(IsolationLevel::Snapshot).unwrap();
    txn.run("CREATE (:Person {name: 'ann', age: 30})", &Params::new())
        .unwrap();

    // Runtime type error mid-statement: arithmetic on a string.
    let err = txn
        .run(
            "MATCH (p:Person) SET p.age = p.name - 1",
            &Params::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::RuntimeType(_))));

    // The earlier statement's effect is intact; the failed one left none.
    let inside = txn
        .run(
            "MATCH (p:Person) RETURN p.name AS name, p.age AS age",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(inside.rows.len(), 1);
    assert_eq!(val(&inside.rows[0], "age"), Value::Int(30));

    txn.commit().unwrap();
}

#[test]
fn one_shot_write_errors_roll_back_everything() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:Person {name: 'ann'})", &Params::new())
        .unwrap();

    // The CREATE of the second pattern fails on a type error after the
    // first pattern already created a node; nothing may remain.
    let err = db
        .run(
            "CREATE (:Person {name: 'temp'}), (:Person {name: 1 + 'x'})",
            &Params::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::RuntimeType(_))));

    let result = db
        .run("MATCH (p:Person) RETURN COUNT(*) AS cnt", &Params::new())
        .unwrap();
    assert_eq!(val(&result.rows[0], "cnt"), Value::Int(1));
}

#[test]
fn set_and_delete_through_queries() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:Person {name: 'ann'})-[:KNOWS]->(b:Person {name: 'bob'})",
        &Params::new(),
    )
    .unwrap();

    let summary = db
        .run(
            "MATCH (p:Person {name: 'ann'}) SET p.age = 31",
            &Params::new(),
        )
        .unwrap()
        .summary
        .unwrap();
    assert_eq!(summary.properties_set, 1);

    let check = db
        .run(
            "MATCH (p:Person {name: 'ann'}) RETURN p.age AS age",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(val(&check.rows[0], "age"), Value::Int(31));

    // Plain DELETE on a connected node must fail...
    let err = db
        .run("MATCH (p:Person {name: 'ann'}) DELETE p", &Params::new())
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::NodeHasRelationships(_))
    ));

    // ...and DETACH DELETE removes node and relationship atomically.
    let summary = db
        .run(
            "MATCH (p:Person {name: 'ann'}) DETACH DELETE p",
            &Params::new(),
        )
        .unwrap()
        .summary
        .unwrap();
    assert_eq!(summary.nodes_deleted, 1);

    let remaining = db
        .run("MATCH (p:Person) RETURN p.name AS name", &Params::new())
        .unwrap();
    assert_eq!(remaining.rows.len(), 1);
    assert_eq!(val(&remaining.rows[0], "name"), Value::String("bob".into()));

    let rels = db
        .run("MATCH (a)-[r:KNOWS]->(b) RETURN r", &Params::new())
        .unwrap();
    assert!(rels.rows.is_empty());
}

#[test]
fn setting_null_removes_the_property() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:Person {name: 'ann', age: 30})", &Params::new())
        .unwrap();

    db.run("MATCH (p:Person) SET p.age = NULL", &Params::new())
        .unwrap();

    let result = db
        .run(
            "MATCH (p:Person) WHERE p.age IS NULL RETURN p.name",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 1);
}

#[test]
fn syntax_errors_carry_position_and_expectation() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let err = db
        .run("MATCH (n:Person\nRETURN n", &Params::new())
        .unwrap_err();
    match err {
        Error::Query(QueryError::Syntax {
            line,
            column,
            expected,
            found,
        }) => {
            assert_eq!(line, 2);
            assert_eq!(column, 1);
            assert!(!expected.is_empty());
            assert!(!found.is_empty());
        }
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn compile_errors_are_distinct_from_syntax_errors() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let err = db
        .run(
            "MATCH (a) RETURN a.x, a.y UNION MATCH (b) RETURN b.x",
            &Params::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Query(QueryError::Compile(_))));
}

#[test]
fn deadline_aborts_statement_and_commit() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:Person {name: 'ann'})", &Params::new())
        .unwrap();

    let txn = db.begin(IsolationLevel::Snapshot).unwrap();
    txn.set_deadline(std::time::Instant::now() - std::time::Duration::from_millis(1));

    let err = txn
        .run("MATCH (p:Person) RETURN p.name", &Params::new())
        .unwrap_err();
    assert!(
        matches!(err, Error::Query(QueryError::DeadlineExceeded)),
        "got {err:?}"
    );

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::DeadlineExceeded)));
}

#[test]
fn serializable_conflict_surfaces_for_caller_retry() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:Counter {value: 0})", &Params::new()).unwrap();

    let t1 = db.begin(IsolationLevel::Serializable).unwrap();
    // t1 reads the counter.
    let read = t1
        .run("MATCH (c:Counter) RETURN c.value AS v", &Params::new())
        .unwrap();
    assert_eq!(val(&read.rows[0], "v"), Value::Int(0));
    t1.run("MATCH (c:Counter) SET c.marker = 1", &Params::new())
        .unwrap();

    // A concurrent writer invalidates t1's read set and commits first.
    db.run("MATCH (c:Counter) SET c.value = 10", &Params::new())
        .unwrap();

    let err = t1.commit().unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::Conflict(_))));
}

#[test]
fn writes_survive_reopen_via_wal_replay() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph");

    {
        let db = Db::open(&path).unwrap();
        db.run(
            "CREATE (a:Person {name: 'ann'})-[:KNOWS]->(b:Person {name: 'bob'})",
            &Params::new(),
        )
        .unwrap();
    }

    let db = Db::open(&path).unwrap();
    let result = db
        .run(
            "MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name AS a, b.name AS b",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(val(&result.rows[0], "a"), Value::String("ann".into()));
    assert_eq!(val(&result.rows[0], "b"), Value::String("bob".into()));
}

#[test]
fn node_history_tracks_committed_versions() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:Person {name: 'ann'})", &Params::new())
        .unwrap();
    db.run(
        "MATCH (p:Person {name: 'ann'}) SET p.name = 'anne'",
        &Params::new(),
    )
    .unwrap();

    let snapshot = db.snapshot();
    let id = snapshot.node_records().next().unwrap().id;
    let history = db.node_history(id).unwrap();
    assert_eq!(history.len(), 2);
}

#[test]
fn translator_iteration_surface_round_trips() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:Person {name: 'ann'})-[:KNOWS {since: 2020}]->(b:Person {name: 'bob'})",
        &Params::new(),
    )
    .unwrap();

    let snapshot = db.snapshot();
    let nodes: Vec<_> = snapshot.node_records().collect();
    let rels: Vec<_> = snapshot.relationship_records().collect();
    assert_eq!(nodes.len(), 2);
    assert_eq!(rels.len(), 1);
    assert_eq!(rels[0].rel_type, "KNOWS");
    assert_eq!(snapshot.labels(), vec!["Person".to_string()]);

    // Everything needed to rebuild the graph elsewhere is reachable:
    // ids, labels, property maps, and endpoints.
    let by_id: std::collections::BTreeMap<_, _> =
        nodes.iter().map(|n| (n.id, n)).collect();
    assert!(by_id.contains_key(&rels[0].src));
    assert!(by_id.contains_key(&rels[0].dst));
}
