//! Pattern matching: direction resolution, undirected traversal,
//! variable-length expansion, optional matching, and index-assisted scans.

use plexusdb::{Db, IndexDef, IndexKind, Params, Row, Value};
use tempfile::tempdir;

fn val(row: &Row, name: &str) -> Value {
    row.get(name).cloned().unwrap_or(Value::Null)
}

fn string_val(row: &Row, name: &str) -> String {
    match val(row, name) {
        Value::String(s) => s,
        other => panic!("expected a string for '{name}', got {other:?}"),
    }
}

fn open(dir: &tempfile::TempDir) -> Db {
    Db::open(dir.path().join("graph")).unwrap()
}

/// One edge (alice)-[:R]->(bob).
fn one_edge(db: &Db) {
    db.run(
        "CREATE (a:Person {name: 'alice'})-[:R]->(b:Person {name: 'bob'})",
        &Params::new(),
    )
    .unwrap();
}

#[test]
fn rightward_pattern_traverses_outgoing_edges() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    one_edge(&db);

    let result = db
        .run("MATCH (a)-[:R]->(b) RETURN a.name, b.name", &Params::new())
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(string_val(&result.rows[0], "a.name"), "alice");
    assert_eq!(string_val(&result.rows[0], "b.name"), "bob");
}

#[test]
fn leftward_pattern_traverses_incoming_edges() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    one_edge(&db);

    let result = db
        .run("MATCH (a)<-[:R]-(b) RETURN a.name, b.name", &Params::new())
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(string_val(&result.rows[0], "a.name"), "bob");
    assert_eq!(string_val(&result.rows[0], "b.name"), "alice");
}

#[test]
fn undirected_pattern_matches_both_ways() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    one_edge(&db);

    let result = db
        .run(
            "MATCH (a)-[:R]-(b) RETURN a.name, b.name ORDER BY a.name",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(string_val(&result.rows[0], "a.name"), "alice");
    assert_eq!(string_val(&result.rows[1], "a.name"), "bob");
}

#[test]
fn direction_is_independent_of_operand_order() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    one_edge(&db);

    // The same edge, written from either end.
    let from_left = db
        .run("MATCH (x)-[:R]->(y) RETURN x.name", &Params::new())
        .unwrap();
    let from_right = db
        .run("MATCH (y)<-[:R]-(x) RETURN x.name", &Params::new())
        .unwrap();
    assert_eq!(string_val(&from_left.rows[0], "x.name"), "alice");
    assert_eq!(string_val(&from_right.rows[0], "x.name"), "alice");
}

#[test]
fn two_hop_chain() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:P {n: 1})-[:R]->(b:P {n: 2})-[:R]->(c:P {n: 3})",
        &Params::new(),
    )
    .unwrap();

    let result = db
        .run(
            "MATCH (a)-[:R]->(b)-[:R]->(c) RETURN a.n, b.n, c.n",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(val(&result.rows[0], "a.n"), Value::Int(1));
    assert_eq!(val(&result.rows[0], "c.n"), Value::Int(3));
}

#[test]
fn relationship_type_filter_and_alternation() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:P {n: 1}), (b:P {n: 2}), (c:P {n: 3}), \
         (a)-[:LIKES]->(b), (a)-[:KNOWS]->(c)",
        &Params::new(),
    )
    .unwrap();

    let likes = db
        .run("MATCH (a)-[:LIKES]->(x) RETURN x.n", &Params::new())
        .unwrap();
    assert_eq!(likes.rows.len(), 1);
    assert_eq!(val(&likes.rows[0], "x.n"), Value::Int(2));

    let either = db
        .run(
            "MATCH (a)-[:LIKES|KNOWS]->(x) RETURN x.n ORDER BY x.n",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(either.rows.len(), 2);
}

#[test]
fn inline_property_map_filters_matches() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (:Person {name: 'a', age: 1}), (:Person {name: 'b', age: 2})",
        &Params::new(),
    )
    .unwrap();

    let result = db
        .run("MATCH (p:Person {age: 2}) RETURN p.name", &Params::new())
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(string_val(&result.rows[0], "p.name"), "b");
}

#[test]
fn variable_length_bounds() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:P {n: 1})-[:R]->(b:P {n: 2})-[:R]->(c:P {n: 3})-[:R]->(d:P {n: 4})",
        &Params::new(),
    )
    .unwrap();

    let result = db
        .run(
            "MATCH (a:P {n: 1})-[:R*1..2]->(x) RETURN x.n ORDER BY x.n",
            &Params::new(),
        )
        .unwrap();
    let reached: Vec<Value> = result.rows.iter().map(|r| val(r, "x.n")).collect();
    assert_eq!(reached, vec![Value::Int(2), Value::Int(3)]);

    let exact = db
        .run(
            "MATCH (a:P {n: 1})-[:R*3]->(x) RETURN x.n",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(exact.rows.len(), 1);
    assert_eq!(val(&exact.rows[0], "x.n"), Value::Int(4));

    let unbounded = db
        .run(
            "MATCH (a:P {n: 1})-[:R*]->(x) RETURN COUNT(*) AS cnt",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(val(&unbounded.rows[0], "cnt"), Value::Int(3));
}

#[test]
fn named_path_binds_nodes_and_relationships() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:P {n: 1})-[:R]->(b:P {n: 2})-[:R]->(c:P {n: 3})",
        &Params::new(),
    )
    .unwrap();

    let result = db
        .run(
            "MATCH p = (a:P {n: 1})-[:R*2]->(c) RETURN size(p) AS hops",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(val(&result.rows[0], "hops"), Value::Int(2));
}

#[test]
fn optional_match_never_reduces_row_count() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:Person {name: 'a'}), (b:Person {name: 'b'}), (c:Person {name: 'c'}), \
         (a)-[:KNOWS]->(b)",
        &Params::new(),
    )
    .unwrap();

    let mandatory = db
        .run("MATCH (p:Person) RETURN p.name", &Params::new())
        .unwrap();
    let optional = db
        .run(
            "MATCH (p:Person) OPTIONAL MATCH (p)-[:KNOWS]->(q) RETURN p.name, q.name",
            &Params::new(),
        )
        .unwrap();
    assert!(
        optional.rows.len() >= mandatory.rows.len(),
        "optional match must not shrink the row set: {} < {}",
        optional.rows.len(),
        mandatory.rows.len()
    );

    // Unmatched rows survive with NULL bindings.
    let unmatched: Vec<&Row> = optional
        .rows
        .iter()
        .filter(|r| val(r, "q.name").is_null())
        .collect();
    assert_eq!(unmatched.len(), 2, "b and c have no outgoing KNOWS");
}

#[test]
fn optional_match_on_empty_graph_yields_single_null_row() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let result = db
        .run("OPTIONAL MATCH (n) RETURN n", &Params::new())
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert!(val(&result.rows[0], "n").is_null());
}

#[test]
fn optional_match_multi_hop_is_all_or_nothing() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    // a -> b, but b has no outgoing edge: the two-hop optional pattern
    // must bind both new variables to NULL, not just the second.
    db.run("CREATE (a:P {n: 1})-[:R]->(b:P {n: 2})", &Params::new())
        .unwrap();

    let result = db
        .run(
            "MATCH (a:P {n: 1}) OPTIONAL MATCH (a)-[:R]->(x)-[:R]->(y) RETURN x.n, y.n",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert!(val(&result.rows[0], "x.n").is_null());
    assert!(val(&result.rows[0], "y.n").is_null());
}

#[test]
fn cartesian_product_of_disconnected_patterns() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:A {n: 1}), (:A {n: 2}), (:B {n: 3})", &Params::new())
        .unwrap();

    let result = db
        .run("MATCH (a:A), (b:B) RETURN a.n, b.n", &Params::new())
        .unwrap();
    assert_eq!(result.rows.len(), 2, "2 A nodes x 1 B node");
}

#[test]
fn cycle_pattern_rebinding_respects_existing_binding() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run(
        "CREATE (a:P {n: 1}), (b:P {n: 2}), (a)-[:R]->(b), (b)-[:R]->(a)",
        &Params::new(),
    )
    .unwrap();

    // (x)-[:R]->(y)-[:R]->(x): closes the cycle back to the same node.
    let result = db
        .run(
            "MATCH (x)-[:R]->(y)-[:R]->(x) RETURN x.n ORDER BY x.n",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(result.rows.len(), 2);
}

#[test]
fn index_seek_plan_and_equivalent_results() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    for i in 0..20 {
        db.run(
            &format!("CREATE (:Person {{name: 'p{i}', bucket: {}}})", i % 4),
            &Params::new(),
        )
        .unwrap();
    }

    let query = "MATCH (p:Person) WHERE p.bucket = 2 RETURN p.name";
    let without_index = db.run(query, &Params::new()).unwrap();

    db.create_index(IndexDef {
        name: "person_bucket".into(),
        label: "Person".into(),
        properties: vec!["bucket".into()],
        kind: IndexKind::Range,
    })
    .unwrap();

    let explain = db
        .run(&format!("EXPLAIN {query}"), &Params::new())
        .unwrap();
    let plan_text = string_val(&explain.rows[0], "plan");
    assert!(plan_text.contains("IndexSeek"), "plan was:\n{plan_text}");

    let with_index = db.run(query, &Params::new()).unwrap();
    let mut a: Vec<String> = without_index
        .rows
        .iter()
        .map(|r| string_val(r, "p.name"))
        .collect();
    let mut b: Vec<String> = with_index
        .rows
        .iter()
        .map(|r| string_val(r, "p.name"))
        .collect();
    a.sort();
    b.sort();
    assert_eq!(a, b, "index and scan paths must agree");
    assert_eq!(a.len(), 5);
}
