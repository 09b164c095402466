//! RETURN semantics: ordering, distinct, union, skip/limit, aggregation,
//! CASE, string functions, and parameters.

use plexusdb::{Db, Params, Row, Value};
use tempfile::tempdir;

fn val(row: &Row, name: &str) -> Value {
    row.get(name).cloned().unwrap_or(Value::Null)
}

fn open(dir: &tempfile::TempDir) -> Db {
    Db::open(dir.path().join("graph")).unwrap()
}

fn people(db: &Db) {
    db.run(
        "CREATE (:Person {name: 'ann', age: 30, city: 'berlin'}), \
                (:Person {name: 'bob', age: 40, city: 'berlin'}), \
                (:Person {name: 'cid', age: 40, city: 'tokyo'}), \
                (:Person {name: 'dee', city: 'tokyo'})",
        &Params::new(),
    )
    .unwrap();
}

#[test]
fn order_by_multi_key_asc_desc() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person) WHERE p.age IS NOT NULL \
             RETURN p.name AS name ORDER BY p.age DESC, p.name ASC",
            &Params::new(),
        )
        .unwrap();
    let names: Vec<Value> = result.rows.iter().map(|r| val(r, "name")).collect();
    assert_eq!(
        names,
        vec![
            Value::String("bob".into()),
            Value::String("cid".into()),
            Value::String("ann".into()),
        ]
    );
}

#[test]
fn nulls_sort_last_in_both_directions() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    for direction in ["ASC", "DESC"] {
        let result = db
            .run(
                &format!(
                    "MATCH (p:Person) RETURN p.name AS name, p.age AS age \
                     ORDER BY p.age {direction}"
                ),
                &Params::new(),
            )
            .unwrap();
        let last = result.rows.last().unwrap();
        assert_eq!(
            val(last, "name"),
            Value::String("dee".into()),
            "dee (age NULL) must sort last under {direction}"
        );
    }
}

#[test]
fn sort_is_stable_and_idempotent() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let query = "MATCH (p:Person) RETURN p.name AS name, p.city AS city ORDER BY city";
    let first = db.run(query, &Params::new()).unwrap();
    let second = db.run(query, &Params::new()).unwrap();
    let a: Vec<Vec<Value>> = first.rows.iter().map(|r| r.values()).collect();
    let b: Vec<Vec<Value>> = second.rows.iter().map(|r| r.values()).collect();
    assert_eq!(a, b, "sorting an already-sorted set must be identical");
}

#[test]
fn skip_and_limit_bound_consumption() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person) RETURN p.name AS name ORDER BY name SKIP 1 LIMIT 2",
            &Params::new(),
        )
        .unwrap();
    let names: Vec<Value> = result.rows.iter().map(|r| val(r, "name")).collect();
    assert_eq!(
        names,
        vec![Value::String("bob".into()), Value::String("cid".into())]
    );
}

#[test]
fn distinct_deduplicates_full_rows() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let plain = db
        .run("MATCH (p:Person) RETURN p.city AS city", &Params::new())
        .unwrap();
    assert_eq!(plain.rows.len(), 4);

    let distinct = db
        .run(
            "MATCH (p:Person) RETURN DISTINCT p.city AS city",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(distinct.rows.len(), 2);
}

#[test]
fn union_deduplicates_and_union_all_preserves_count() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let left = db
        .run("MATCH (p:Person) RETURN p.city AS city", &Params::new())
        .unwrap();
    let right = left.rows.len();

    let union_all = db
        .run(
            "MATCH (p:Person) RETURN p.city AS city \
             UNION ALL MATCH (p:Person) RETURN p.city",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(
        union_all.rows.len(),
        left.rows.len() + right,
        "UNION ALL preserves duplicate count exactly"
    );

    let union = db
        .run(
            "MATCH (p:Person) RETURN p.city AS city \
             UNION MATCH (p:Person) RETURN p.city",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(union.rows.len(), 2, "UNION deduplicates identical rows");
}

#[test]
fn aggregation_is_a_correct_partition() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let total = db
        .run("MATCH (p:Person) RETURN COUNT(*) AS cnt", &Params::new())
        .unwrap();
    let Value::Int(total_count) = val(&total.rows[0], "cnt") else {
        panic!("COUNT(*) must be an int");
    };

    let grouped = db
        .run(
            "MATCH (p:Person) RETURN p.city AS city, COUNT(*) AS cnt",
            &Params::new(),
        )
        .unwrap();
    let group_sum: i64 = grouped
        .rows
        .iter()
        .map(|r| match val(r, "cnt") {
            Value::Int(i) => i,
            other => panic!("group count must be an int, got {other:?}"),
        })
        .sum();
    assert_eq!(group_sum, total_count);
}

#[test]
fn aggregates_ignore_null_except_count_star() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person) RETURN COUNT(*) AS all_rows, COUNT(p.age) AS with_age, \
             SUM(p.age) AS total, MIN(p.age) AS low, MAX(p.age) AS high, \
             COLLECT(p.age) AS ages",
            &Params::new(),
        )
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(val(row, "all_rows"), Value::Int(4), "COUNT(*) counts NULLs");
    assert_eq!(val(row, "with_age"), Value::Int(3));
    assert_eq!(val(row, "total"), Value::Int(110));
    assert_eq!(val(row, "low"), Value::Int(30));
    assert_eq!(val(row, "high"), Value::Int(40));
    match val(row, "ages") {
        Value::List(ages) => assert_eq!(ages.len(), 3, "COLLECT skips NULL"),
        other => panic!("expected a list, got {other:?}"),
    }
}

#[test]
fn count_distinct() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person) RETURN COUNT(DISTINCT p.age) AS distinct_ages",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(val(&result.rows[0], "distinct_ages"), Value::Int(2));
}

#[test]
fn aggregates_over_empty_input() {
    let dir = tempdir().unwrap();
    let db = open(&dir);

    let result = db
        .run(
            "MATCH (p:Missing) RETURN COUNT(*) AS cnt, SUM(p.age) AS total, \
             AVG(p.age) AS avg, COLLECT(p.age) AS all_ages",
            &Params::new(),
        )
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(val(row, "cnt"), Value::Int(0));
    assert_eq!(val(row, "total"), Value::Int(0), "SUM of nothing is 0");
    assert!(val(row, "avg").is_null(), "AVG of nothing is undefined");
    assert_eq!(val(row, "all_ages"), Value::List(vec![]));
}

#[test]
fn case_expression_in_projection() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person) \
             RETURN p.name AS name, \
                    CASE WHEN p.age >= 40 THEN 'senior' \
                         WHEN p.age >= 30 THEN 'adult' \
                         ELSE 'unknown' END AS band \
             ORDER BY name",
            &Params::new(),
        )
        .unwrap();
    let bands: Vec<Value> = result.rows.iter().map(|r| val(r, "band")).collect();
    assert_eq!(
        bands,
        vec![
            Value::String("adult".into()),   // ann, 30
            Value::String("senior".into()),  // bob, 40
            Value::String("senior".into()),  // cid, 40
            Value::String("unknown".into()), // dee, no age
        ]
    );
}

#[test]
fn string_functions_in_queries() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person {name: 'ann'}) \
             RETURN toUpper(p.name) AS up, substring(p.city, 1, 3) AS pre, \
                    size(p.city) AS len, reverse(p.name) AS rev",
            &Params::new(),
        )
        .unwrap();
    let row = &result.rows[0];
    assert_eq!(val(row, "up"), Value::String("ANN".into()));
    assert_eq!(val(row, "pre"), Value::String("ber".into()));
    assert_eq!(val(row, "len"), Value::Int(6));
    assert_eq!(val(row, "rev"), Value::String("nna".into()));
}

#[test]
fn where_string_predicates() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let starts = db
        .run(
            "MATCH (p:Person) WHERE p.name STARTS WITH 'a' RETURN p.name",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(starts.rows.len(), 1);

    let contains = db
        .run(
            "MATCH (p:Person) WHERE p.city CONTAINS 'oky' RETURN p.name",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(contains.rows.len(), 2);

    let in_list = db
        .run(
            "MATCH (p:Person) WHERE p.name IN ['ann', 'cid'] RETURN p.name",
            &Params::new(),
        )
        .unwrap();
    assert_eq!(in_list.rows.len(), 2);
}

#[test]
fn parameters_bind_into_predicates_and_patterns() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let mut params = Params::new();
    params.insert("who", Value::String("bob".into()));
    let by_where = db
        .run(
            "MATCH (p:Person) WHERE p.name = $who RETURN p.age AS age",
            &params,
        )
        .unwrap();
    assert_eq!(val(&by_where.rows[0], "age"), Value::Int(40));

    let by_pattern = db
        .run("MATCH (p:Person {name: $who}) RETURN p.age AS age", &params)
        .unwrap();
    assert_eq!(val(&by_pattern.rows[0], "age"), Value::Int(40));
}

#[test]
fn return_values_reify_to_full_entities() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    db.run("CREATE (:Person {name: 'ann'})", &Params::new())
        .unwrap();

    let result = db.run("MATCH (p:Person) RETURN p", &Params::new()).unwrap();
    match val(&result.rows[0], "p") {
        Value::Node(node) => {
            assert_eq!(node.labels, vec!["Person".to_string()]);
            assert_eq!(
                node.properties.get("name"),
                Some(&Value::String("ann".into()))
            );
        }
        other => panic!("expected a reified node, got {other:?}"),
    }
}

#[test]
fn rows_serialize_including_nulls_and_nesting() {
    let dir = tempdir().unwrap();
    let db = open(&dir);
    people(&db);

    let result = db
        .run(
            "MATCH (p:Person) RETURN p.name AS name, p.age AS age, \
             [p.name, p.age] AS pair ORDER BY name",
            &Params::new(),
        )
        .unwrap();
    let json = serde_json::to_string(&result.rows[3].values()).unwrap();
    assert!(json.contains("dee"));
    assert!(json.contains("null"), "NULL age must serialize: {json}");
}
