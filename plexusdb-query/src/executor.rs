//! Pull-based plan execution.
//!
//! Every operator is an explicit iterator (`next() -> Option<Result<Row>>`)
//! owning its upstream; a plan executes as a chain of these with no
//! coroutine machinery. Rows carry entity references; full records are
//! resolved through the transaction view on demand and reified only at the
//! result boundary.

use crate::ast::{PathElement, Pattern, PatternDirection, SetItem, SortOrder};
use crate::error::{Error, Result};
use crate::evaluator::{evaluate, evaluate_predicate};
use crate::plan::{AggregateCall, AggregateFunction, ExpandSpec, Plan};
use plexusdb_api::{Direction, GraphView, NodeId, PropertyValue, RelId, RelRecord};
use serde::ser::{SerializeMap, SerializeSeq};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};

/// Query parameters, referenced as `$name` in query text.
#[derive(Debug, Clone, Default)]
pub struct Params {
    inner: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.inner.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.get(name)
    }
}

/// A reified node: identity plus labels and properties, detached from any
/// view.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct NodeValue {
    pub id: NodeId,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Hash)]
pub struct RelationshipValue {
    pub id: RelId,
    pub rel_type: String,
    pub src: NodeId,
    pub dst: NodeId,
    pub properties: BTreeMap<String, Value>,
}

/// An alternating node/relationship sequence produced by traversal.
#[derive(Debug, Clone, PartialEq, Hash)]
pub struct PathValue {
    pub nodes: Vec<NodeId>,
    pub rels: Vec<RelId>,
}

/// A bound value: the tagged union flowing through binding rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    DateTime(i64),
    Point { x: f64, y: f64 },
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    NodeRef(NodeId),
    RelRef(RelId),
    Node(NodeValue),
    Relationship(RelationshipValue),
    Path(PathValue),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::DateTime(_) => "DateTime",
            Value::Point { .. } => "Point",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::NodeRef(_) | Value::Node(_) => "Node",
            Value::RelRef(_) | Value::Relationship(_) => "Relationship",
            Value::Path(_) => "Path",
        }
    }

    pub fn from_property(value: PropertyValue) -> Value {
        match value {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(b) => Value::Bool(b),
            PropertyValue::Int(i) => Value::Int(i),
            PropertyValue::Float(f) => Value::Float(f),
            PropertyValue::String(s) => Value::String(s),
            PropertyValue::DateTime(t) => Value::DateTime(t),
            PropertyValue::Point { x, y } => Value::Point { x, y },
            PropertyValue::List(items) => {
                Value::List(items.into_iter().map(Value::from_property).collect())
            }
            PropertyValue::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_property(v)))
                    .collect(),
            ),
        }
    }

    /// Converts to a storable property value. Entities and paths are not
    /// storable.
    pub fn to_property(&self) -> Result<PropertyValue> {
        Ok(match self {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(*b),
            Value::Int(i) => PropertyValue::Int(*i),
            Value::Float(f) => PropertyValue::Float(*f),
            Value::String(s) => PropertyValue::String(s.clone()),
            Value::DateTime(t) => PropertyValue::DateTime(*t),
            Value::Point { x, y } => PropertyValue::Point { x: *x, y: *y },
            Value::List(items) => PropertyValue::List(
                items
                    .iter()
                    .map(Value::to_property)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Value::Map(map) => PropertyValue::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_property()?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ),
            other => {
                return Err(Error::RuntimeType(format!(
                    "a {} cannot be stored as a property",
                    other.type_name()
                )));
            }
        })
    }

    /// Cypher equality: NULL is unknown, numerics compare across Int/Float.
    pub fn cypher_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Int(a), Value::Float(b)) => Some((*a as f64) == *b),
            (Value::Float(a), Value::Int(b)) => Some(*a == (*b as f64)),
            (Value::NodeRef(a), Value::NodeRef(b)) => Some(a == b),
            (Value::RelRef(a), Value::RelRef(b)) => Some(a == b),
            (Value::NodeRef(a), Value::Node(b)) | (Value::Node(b), Value::NodeRef(a)) => {
                Some(*a == b.id)
            }
            (Value::RelRef(a), Value::Relationship(b))
            | (Value::Relationship(b), Value::RelRef(a)) => Some(*a == b.id),
            (Value::List(a), Value::List(b)) => {
                if a.len() != b.len() {
                    return Some(false);
                }
                let mut unknown = false;
                for (x, y) in a.iter().zip(b.iter()) {
                    match x.cypher_eq(y) {
                        Some(false) => return Some(false),
                        Some(true) => {}
                        None => unknown = true,
                    }
                }
                if unknown { None } else { Some(true) }
            }
            (a, b) => {
                if std::mem::discriminant(a) == std::mem::discriminant(b) {
                    Some(a == b)
                } else {
                    Some(false)
                }
            }
        }
    }

    /// Cypher ordering for comparison operators: `None` when the operands
    /// are NULL or of incomparable types.
    pub fn cypher_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used by Sort and Min/Max over non-null values: numerics
    /// first, then strings, booleans, datetimes, and structured values by
    /// type rank.
    pub fn order_compare(&self, other: &Value) -> std::cmp::Ordering {
        if let Some(ordering) = self.cypher_cmp(other) {
            return ordering;
        }
        let rank = |v: &Value| match v {
            Value::Int(_) | Value::Float(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            Value::DateTime(_) => 3,
            Value::Point { .. } => 4,
            Value::List(_) => 5,
            Value::Map(_) => 6,
            Value::NodeRef(_) | Value::Node(_) => 7,
            Value::RelRef(_) | Value::Relationship(_) => 8,
            Value::Path(_) => 9,
            Value::Null => 10,
        };
        match rank(self).cmp(&rank(other)) {
            std::cmp::Ordering::Equal => match (self, other) {
                (Value::Point { x: ax, y: ay }, Value::Point { x: bx, y: by }) => (*ax, *ay)
                    .partial_cmp(&(*bx, *by))
                    .unwrap_or(std::cmp::Ordering::Equal),
                (Value::List(a), Value::List(b)) => {
                    for (x, y) in a.iter().zip(b.iter()) {
                        match x.order_compare(y) {
                            std::cmp::Ordering::Equal => continue,
                            unequal => return unequal,
                        }
                    }
                    a.len().cmp(&b.len())
                }
                (Value::NodeRef(a), Value::NodeRef(b)) => a.cmp(b),
                (Value::RelRef(a), Value::RelRef(b)) => a.cmp(b),
                _ => std::cmp::Ordering::Equal,
            },
            unequal => unequal,
        }
    }
}

// Floats hash by bit pattern so Value can key dedup sets.
impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::DateTime(t) => t.hash(state),
            Value::Point { x, y } => {
                x.to_bits().hash(state);
                y.to_bits().hash(state);
            }
            Value::List(items) => items.hash(state),
            Value::Map(map) => map.hash(state),
            Value::NodeRef(id) => id.hash(state),
            Value::RelRef(id) => id.hash(state),
            Value::Node(n) => n.hash(state),
            Value::Relationship(r) => r.hash(state),
            Value::Path(p) => p.hash(state),
        }
    }
}

impl Eq for Value {}

impl serde::Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::DateTime(t) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "datetime")?;
                map.serialize_entry("micros", t)?;
                map.end()
            }
            Value::Point { x, y } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "point")?;
                map.serialize_entry("x", x)?;
                map.serialize_entry("y", y)?;
                map.end()
            }
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => {
                let mut ser = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    ser.serialize_entry(k, v)?;
                }
                ser.end()
            }
            Value::NodeRef(id) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "node")?;
                map.serialize_entry("id", id)?;
                map.end()
            }
            Value::RelRef(id) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "relationship")?;
                map.serialize_entry("id", id)?;
                map.end()
            }
            Value::Node(n) => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("type", "node")?;
                map.serialize_entry("id", &n.id)?;
                map.serialize_entry("labels", &n.labels)?;
                map.serialize_entry("properties", &n.properties)?;
                map.end()
            }
            Value::Relationship(r) => {
                let mut map = serializer.serialize_map(Some(6))?;
                map.serialize_entry("type", "relationship")?;
                map.serialize_entry("id", &r.id)?;
                map.serialize_entry("relType", &r.rel_type)?;
                map.serialize_entry("src", &r.src)?;
                map.serialize_entry("dst", &r.dst)?;
                map.serialize_entry("properties", &r.properties)?;
                map.end()
            }
            Value::Path(p) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", "path")?;
                map.serialize_entry("nodes", &p.nodes)?;
                map.serialize_entry("relationships", &p.rels)?;
                map.end()
            }
        }
    }
}

/// A binding row: variable name -> bound value. Small, so a linear vec
/// beats a map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cols: Vec<(String, Value)>,
}

impl Row {
    pub fn new(cols: Vec<(String, Value)>) -> Self {
        Self { cols }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cols.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some((_, v)) = self.cols.iter_mut().find(|(k, _)| *k == name) {
            *v = value;
        } else {
            self.cols.push((name, value));
        }
    }

    pub fn columns(&self) -> &[(String, Value)] {
        &self.cols
    }

    pub fn values(&self) -> Vec<Value> {
        self.cols.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Extends a path binding by one hop, starting it when absent.
    fn join_path(&mut self, alias: &str, src: NodeId, rel: RelId, dst: NodeId) {
        let path = match self.get(alias) {
            Some(Value::Path(p)) => {
                let mut p = p.clone();
                p.rels.push(rel);
                p.nodes.push(dst);
                Value::Path(p)
            }
            _ => Value::Path(PathValue {
                nodes: vec![src, dst],
                rels: vec![rel],
            }),
        };
        self.set(alias, path);
    }

    /// Resolves entity references into full values for the result surface.
    pub fn reify<V: GraphView>(&self, view: &V) -> Row {
        let cols = self
            .cols
            .iter()
            .map(|(k, v)| (k.clone(), reify_value(v, view)))
            .collect();
        Row { cols }
    }
}

fn reify_value<V: GraphView>(value: &Value, view: &V) -> Value {
    match value {
        Value::NodeRef(id) => match view.node(*id) {
            Some(node) => Value::Node(NodeValue {
                id: node.id,
                labels: node.labels,
                properties: node
                    .properties
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_property(v)))
                    .collect(),
            }),
            None => Value::Null,
        },
        Value::RelRef(id) => match view.relationship(*id) {
            Some(rel) => Value::Relationship(RelationshipValue {
                id: rel.id,
                rel_type: rel.rel_type,
                src: rel.src,
                dst: rel.dst,
                properties: rel
                    .properties
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_property(v)))
                    .collect(),
            }),
            None => Value::Null,
        },
        Value::List(items) => Value::List(items.iter().map(|v| reify_value(v, view)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), reify_value(v, view)))
                .collect(),
        ),
        other => other.clone(),
    }
}

type RowIter<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// Executes a plan as a forward-only row stream. `argument` seeds
/// `Plan::Argument` leaves inside apply operators.
pub fn execute_plan<'a, V: GraphView>(
    view: &'a V,
    plan: &'a Plan,
    params: &'a Params,
    argument: Option<Row>,
) -> RowIter<'a> {
    match plan {
        Plan::SingleRow => Box::new(std::iter::once(Ok(Row::default()))),
        Plan::Argument => Box::new(std::iter::once(Ok(argument.unwrap_or_default()))),
        Plan::ScanLabel {
            alias,
            labels,
            properties,
        } => Box::new(ScanIter::new(view, alias, labels, properties, params)),
        Plan::IndexSeek {
            alias,
            label,
            property,
            value,
            fallback,
        } => index_seek(view, alias, label, property, value, fallback, params, argument),
        Plan::NodeFilter {
            input,
            alias,
            labels,
            properties,
        } => {
            let input_iter = execute_plan(view, input, params, argument);
            Box::new(input_iter.filter_map(move |result| match result {
                Ok(row) => match node_matches(view, &row, alias, labels, properties, params) {
                    Ok(true) => Some(Ok(row)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }))
        }
        Plan::Expand { input, spec } => Box::new(ExpandIter::new(
            view,
            execute_plan(view, input, params, argument),
            spec,
            params,
            false,
        )),
        Plan::OptionalExpand { input, spec } => Box::new(ExpandIter::new(
            view,
            execute_plan(view, input, params, argument),
            spec,
            params,
            true,
        )),
        Plan::VarLengthExpand {
            input,
            spec,
            min,
            max,
        } => Box::new(VarLengthExpandIter::new(
            view,
            execute_plan(view, input, params, argument),
            spec,
            *min,
            *max,
            params,
        )),
        Plan::Optional { input, aliases } => {
            Box::new(OptionalIter::new(execute_plan(view, input, params, argument), aliases))
        }
        Plan::OptionalApply {
            input,
            right,
            null_aliases,
        } => {
            let left = execute_plan(view, input, params, argument);
            Box::new(left.flat_map(move |result| -> Vec<Result<Row>> {
                match result {
                    Ok(row) => {
                        let results: Result<Vec<Row>> =
                            execute_plan(view, right, params, Some(row.clone())).collect();
                        match results {
                            Ok(rows) if rows.is_empty() => {
                                let mut padded = row;
                                for alias in null_aliases {
                                    if padded.get(alias).is_none() {
                                        padded.set(alias.clone(), Value::Null);
                                    }
                                }
                                vec![Ok(padded)]
                            }
                            Ok(rows) => rows.into_iter().map(Ok).collect(),
                            Err(e) => vec![Err(e)],
                        }
                    }
                    Err(e) => vec![Err(e)],
                }
            }))
        }
        Plan::CartesianProduct { left, right } => {
            let left_iter = execute_plan(view, left, params, argument.clone());
            let argument = argument.clone();
            Box::new(left_iter.flat_map(move |result| -> Vec<Result<Row>> {
                match result {
                    Ok(left_row) => {
                        let right_rows: Result<Vec<Row>> =
                            execute_plan(view, right, params, argument.clone()).collect();
                        match right_rows {
                            Ok(rows) => rows
                                .into_iter()
                                .map(|right_row| {
                                    let mut joined = left_row.clone();
                                    for (k, v) in right_row.columns() {
                                        joined.set(k.clone(), v.clone());
                                    }
                                    Ok(joined)
                                })
                                .collect(),
                            Err(e) => vec![Err(e)],
                        }
                    }
                    Err(e) => vec![Err(e)],
                }
            }))
        }
        Plan::Filter { input, predicate } => {
            let input_iter = execute_plan(view, input, params, argument);
            Box::new(input_iter.filter_map(move |result| match result {
                Ok(row) => match evaluate_predicate(predicate, &row, view, params) {
                    Ok(true) => Some(Ok(row)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }))
        }
        Plan::Project {
            input,
            columns,
            extend,
        } => {
            let input_iter = execute_plan(view, input, params, argument);
            Box::new(input_iter.map(move |result| {
                let row = result?;
                let mut out = if *extend { row.clone() } else { Row::default() };
                for (name, expr) in columns {
                    let value = evaluate(expr, &row, view, params)?;
                    out.set(name.clone(), value);
                }
                Ok(out)
            }))
        }
        Plan::Aggregate {
            input,
            group_by,
            aggregates,
        } => execute_aggregate(
            view,
            execute_plan(view, input, params, argument),
            group_by,
            aggregates,
            params,
        ),
        Plan::Sort { input, keys } => {
            execute_sort(view, execute_plan(view, input, params, argument), keys, params)
        }
        Plan::Skip { input, count } => {
            Box::new(execute_plan(view, input, params, argument).skip(*count as usize))
        }
        Plan::Limit { input, count } => {
            Box::new(execute_plan(view, input, params, argument).take(*count as usize))
        }
        Plan::Distinct { input } => {
            let input_iter = execute_plan(view, input, params, argument);
            let mut seen: HashSet<Vec<Value>> = HashSet::new();
            Box::new(input_iter.filter(move |result| match result {
                Ok(row) => seen.insert(row.values()),
                Err(_) => true,
            }))
        }
        Plan::Union {
            left,
            right,
            all,
            columns,
        } => {
            let left_iter = execute_plan(view, left, params, argument.clone());
            let right_iter = execute_plan(view, right, params, argument);
            // Column names come from the left branch; right rows re-label
            // positionally.
            let relabelled = right_iter.map(move |result| {
                let row = result?;
                let mut out = Row::default();
                for (i, (_, value)) in row.columns().iter().enumerate() {
                    let name = columns
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("column{i}"));
                    out.set(name, value.clone());
                }
                Ok(out)
            });
            let chained = left_iter.chain(relabelled);
            if *all {
                Box::new(chained)
            } else {
                let mut seen: HashSet<Vec<Value>> = HashSet::new();
                Box::new(chained.filter(move |result| match result {
                    Ok(row) => seen.insert(row.values()),
                    Err(_) => true,
                }))
            }
        }
        Plan::Create { .. } | Plan::Delete { .. } | Plan::SetProperties { .. } => {
            Box::new(std::iter::once(Err(Error::Compile(
                "write plans execute through execute_write".into(),
            ))))
        }
    }
}

struct ScanIter<'a, V: GraphView> {
    view: &'a V,
    alias: &'a str,
    labels: &'a [String],
    properties: &'a [(String, crate::ast::Expression)],
    params: &'a Params,
    ids: Box<dyn Iterator<Item = NodeId> + 'a>,
}

impl<'a, V: GraphView> ScanIter<'a, V> {
    fn new(
        view: &'a V,
        alias: &'a str,
        labels: &'a [String],
        properties: &'a [(String, crate::ast::Expression)],
        params: &'a Params,
    ) -> Self {
        let ids: Box<dyn Iterator<Item = NodeId> + 'a> = match labels.first() {
            Some(label) => view.nodes_with_label(label),
            None => view.node_ids(),
        };
        Self {
            view,
            alias,
            labels,
            properties,
            params,
            ids,
        }
    }
}

impl<'a, V: GraphView> Iterator for ScanIter<'a, V> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.view.deadline_exceeded() {
                return Some(Err(Error::DeadlineExceeded));
            }
            let id = self.ids.next()?;
            let row = Row::default().with(self.alias.to_string(), Value::NodeRef(id));
            match node_matches(
                self.view,
                &row,
                self.alias,
                self.labels,
                self.properties,
                self.params,
            ) {
                Ok(true) => return Some(Ok(row)),
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Checks the labels and inline property equalities of a pattern node
/// against the binding at `alias`. A NULL binding never matches.
fn node_matches<V: GraphView>(
    view: &V,
    row: &Row,
    alias: &str,
    labels: &[String],
    properties: &[(String, crate::ast::Expression)],
    params: &Params,
) -> Result<bool> {
    let id = match row.get(alias) {
        Some(Value::NodeRef(id)) => *id,
        Some(Value::Null) | None => return Ok(false),
        Some(other) => {
            return Err(Error::RuntimeType(format!(
                "'{alias}' is a {}, expected a node",
                other.type_name()
            )));
        }
    };
    let Some(node) = view.node(id) else {
        return Ok(false);
    };
    if !labels.iter().all(|l| node.has_label(l)) {
        return Ok(false);
    }
    for (key, expr) in properties {
        let expected = evaluate(expr, row, view, params)?;
        let actual = node
            .properties
            .get(key)
            .cloned()
            .map(Value::from_property)
            .unwrap_or(Value::Null);
        if actual.cypher_eq(&expected) != Some(true) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn pattern_direction(direction: PatternDirection) -> Direction {
    match direction {
        PatternDirection::LeftToRight => Direction::Outgoing,
        PatternDirection::RightToLeft => Direction::Incoming,
        PatternDirection::Undirected => Direction::Both,
    }
}

/// The far endpoint of `rel` as seen from `src` under `direction`.
fn far_end(rel: &RelRecord, src: NodeId, direction: Direction) -> NodeId {
    match direction {
        Direction::Outgoing => rel.dst,
        Direction::Incoming => rel.src,
        Direction::Both => rel.other_end(src),
    }
}

fn incident_for<'a, V: GraphView>(
    view: &V,
    src: NodeId,
    direction: Direction,
    types: &'a [String],
) -> Vec<RelRecord> {
    if types.is_empty() {
        view.incident(src, direction, None)
    } else {
        let mut out = Vec::new();
        for t in types {
            out.extend(view.incident(src, direction, Some(t)));
        }
        out
    }
}

/// Single-hop expansion. With `optional`, an input row without any match
/// survives with the new variables bound to NULL.
struct ExpandIter<'a, V: GraphView> {
    view: &'a V,
    input: RowIter<'a>,
    spec: &'a ExpandSpec,
    params: &'a Params,
    optional: bool,
    pending: VecDeque<Row>,
}

impl<'a, V: GraphView> ExpandIter<'a, V> {
    fn new(
        view: &'a V,
        input: RowIter<'a>,
        spec: &'a ExpandSpec,
        params: &'a Params,
        optional: bool,
    ) -> Self {
        Self {
            view,
            input,
            spec,
            params,
            optional,
            pending: VecDeque::new(),
        }
    }

    fn expand_row(&self, row: &Row) -> Result<Vec<Row>> {
        let spec = self.spec;
        let src = match row.get(&spec.src) {
            Some(Value::NodeRef(id)) => *id,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(other) => {
                return Err(Error::RuntimeType(format!(
                    "'{}' is a {}, expected a node",
                    spec.src,
                    other.type_name()
                )));
            }
        };
        let direction = pattern_direction(spec.direction);
        let bound_rel = match spec.rel_alias.as_ref().and_then(|a| row.get(a)) {
            Some(Value::RelRef(id)) => Some(*id),
            _ => None,
        };
        let bound_dst = match row.get(&spec.dst) {
            Some(Value::NodeRef(id)) => Some(*id),
            _ => None,
        };

        let mut out = Vec::new();
        for rel in incident_for(self.view, src, direction, &spec.types) {
            if let Some(required) = bound_rel {
                if rel.id != required {
                    continue;
                }
            }
            let dst = far_end(&rel, src, direction);
            if let Some(required) = bound_dst {
                if dst != required {
                    continue;
                }
            }
            if !self.rel_matches(&rel, row)? {
                continue;
            }
            let mut candidate = row.clone();
            candidate.set(spec.dst.clone(), Value::NodeRef(dst));
            if !node_matches(
                self.view,
                &candidate,
                &spec.dst,
                &spec.dst_labels,
                &spec.dst_properties,
                self.params,
            )? {
                continue;
            }
            if let Some(alias) = &spec.rel_alias {
                candidate.set(alias.clone(), Value::RelRef(rel.id));
            }
            if let Some(path) = &spec.path_alias {
                candidate.join_path(path, src, rel.id, dst);
            }
            out.push(candidate);
        }
        Ok(out)
    }

    fn rel_matches(&self, rel: &RelRecord, row: &Row) -> Result<bool> {
        for (key, expr) in &self.spec.rel_properties {
            let expected = evaluate(expr, row, self.view, self.params)?;
            let actual = rel
                .properties
                .get(key)
                .cloned()
                .map(Value::from_property)
                .unwrap_or(Value::Null);
            if actual.cypher_eq(&expected) != Some(true) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn null_padded(&self, row: &Row) -> Row {
        let mut padded = row.clone();
        if padded.get(&self.spec.dst).is_none() {
            padded.set(self.spec.dst.clone(), Value::Null);
        }
        if let Some(alias) = &self.spec.rel_alias {
            if padded.get(alias).is_none() {
                padded.set(alias.clone(), Value::Null);
            }
        }
        padded
    }
}

impl<'a, V: GraphView> Iterator for ExpandIter<'a, V> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            if self.view.deadline_exceeded() {
                return Some(Err(Error::DeadlineExceeded));
            }
            let row = match self.input.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            match self.expand_row(&row) {
                Ok(rows) if rows.is_empty() && self.optional => {
                    return Some(Ok(self.null_padded(&row)));
                }
                Ok(rows) => self.pending.extend(rows),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Breadth-first variable-length expansion. A relationship is never reused
/// within one path, which also bounds unlimited-depth patterns.
struct VarLengthExpandIter<'a, V: GraphView> {
    view: &'a V,
    input: RowIter<'a>,
    spec: &'a ExpandSpec,
    min: u32,
    max: Option<u32>,
    params: &'a Params,
    pending: VecDeque<Row>,
}

impl<'a, V: GraphView> VarLengthExpandIter<'a, V> {
    fn new(
        view: &'a V,
        input: RowIter<'a>,
        spec: &'a ExpandSpec,
        min: u32,
        max: Option<u32>,
        params: &'a Params,
    ) -> Self {
        Self {
            view,
            input,
            spec,
            min,
            max,
            params,
            pending: VecDeque::new(),
        }
    }

    fn expand_row(&self, row: &Row) -> Result<Vec<Row>> {
        let spec = self.spec;
        let src = match row.get(&spec.src) {
            Some(Value::NodeRef(id)) => *id,
            _ => return Ok(Vec::new()),
        };
        let direction = pattern_direction(spec.direction);
        let bound_dst = match row.get(&spec.dst) {
            Some(Value::NodeRef(id)) => Some(*id),
            _ => None,
        };

        let mut out = Vec::new();
        // Frontier entries: (current node, rel path, node path).
        let mut frontier: VecDeque<(NodeId, Vec<RelId>, Vec<NodeId>)> = VecDeque::new();
        frontier.push_back((src, Vec::new(), vec![src]));

        while let Some((node, rels, nodes)) = frontier.pop_front() {
            if self.view.deadline_exceeded() {
                return Err(Error::DeadlineExceeded);
            }
            let depth = rels.len() as u32;
            if depth >= self.min {
                self.emit(row, node, &rels, &nodes, bound_dst, &mut out)?;
            }
            if self.max.is_some_and(|m| depth >= m) {
                continue;
            }
            for rel in incident_for(self.view, node, direction, &spec.types) {
                if rels.contains(&rel.id) {
                    continue;
                }
                let next = far_end(&rel, node, direction);
                let mut next_rels = rels.clone();
                next_rels.push(rel.id);
                let mut next_nodes = nodes.clone();
                next_nodes.push(next);
                frontier.push_back((next, next_rels, next_nodes));
            }
        }
        Ok(out)
    }

    fn emit(
        &self,
        row: &Row,
        dst: NodeId,
        rels: &[RelId],
        nodes: &[NodeId],
        bound_dst: Option<NodeId>,
        out: &mut Vec<Row>,
    ) -> Result<()> {
        let spec = self.spec;
        if let Some(required) = bound_dst {
            if dst != required {
                return Ok(());
            }
        }
        let mut candidate = row.clone();
        candidate.set(spec.dst.clone(), Value::NodeRef(dst));
        if !node_matches(
            self.view,
            &candidate,
            &spec.dst,
            &spec.dst_labels,
            &spec.dst_properties,
            self.params,
        )? {
            return Ok(());
        }
        if let Some(alias) = &spec.rel_alias {
            candidate.set(
                alias.clone(),
                Value::List(rels.iter().map(|id| Value::RelRef(*id)).collect()),
            );
        }
        if let Some(path) = &spec.path_alias {
            candidate.set(
                path.clone(),
                Value::Path(PathValue {
                    nodes: nodes.to_vec(),
                    rels: rels.to_vec(),
                }),
            );
        }
        out.push(candidate);
        Ok(())
    }
}

impl<'a, V: GraphView> Iterator for VarLengthExpandIter<'a, V> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Some(Ok(row));
            }
            let row = match self.input.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            match self.expand_row(&row) {
                Ok(rows) => self.pending.extend(rows),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Passes rows through; emits one all-NULL row when the input was empty.
struct OptionalIter<'a> {
    input: RowIter<'a>,
    aliases: &'a [String],
    emitted_any: bool,
    done: bool,
}

impl<'a> OptionalIter<'a> {
    fn new(input: RowIter<'a>, aliases: &'a [String]) -> Self {
        Self {
            input,
            aliases,
            emitted_any: false,
            done: false,
        }
    }
}

impl<'a> Iterator for OptionalIter<'a> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.input.next() {
            Some(item) => {
                self.emitted_any = true;
                Some(item)
            }
            None => {
                self.done = true;
                if self.emitted_any {
                    None
                } else {
                    let mut row = Row::default();
                    for alias in self.aliases {
                        row.set(alias.clone(), Value::Null);
                    }
                    Some(Ok(row))
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn index_seek<'a, V: GraphView>(
    view: &'a V,
    alias: &'a str,
    label: &'a str,
    property: &'a str,
    value: &'a crate::ast::Expression,
    fallback: &'a Plan,
    params: &'a Params,
    argument: Option<Row>,
) -> RowIter<'a> {
    let seed = argument.clone().unwrap_or_default();
    let evaluated = match evaluate(value, &seed, view, params) {
        Ok(v) => v,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };
    let Ok(prop_value) = evaluated.to_property() else {
        return execute_plan(view, fallback, params, argument);
    };
    match view.lookup_index(label, property, &prop_value) {
        Some(mut ids) => {
            ids.sort_unstable();
            let alias = alias.to_string();
            Box::new(
                ids.into_iter()
                    .map(move |id| Ok(Row::default().with(alias.clone(), Value::NodeRef(id)))),
            )
        }
        None => execute_plan(view, fallback, params, argument),
    }
}

fn execute_sort<'a, V: GraphView>(
    view: &'a V,
    input: RowIter<'a>,
    keys: &'a [(crate::ast::Expression, SortOrder)],
    params: &'a Params,
) -> RowIter<'a> {
    let rows: Result<Vec<Row>> = input.collect();
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };

    // Sort keys are evaluated once per row, before any comparison.
    let mut keyed: Vec<(Vec<Value>, Row)> = Vec::with_capacity(rows.len());
    for row in rows {
        let mut key_values = Vec::with_capacity(keys.len());
        for (expr, _) in keys {
            match evaluate(expr, &row, view, params) {
                Ok(v) => key_values.push(v),
                Err(e) => return Box::new(std::iter::once(Err(e))),
            }
        }
        keyed.push((key_values, row));
    }

    keyed.sort_by(|(a, _), (b, _)| {
        for (i, (_, direction)) in keys.iter().enumerate() {
            match ordered(&a[i], &b[i], *direction) {
                std::cmp::Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        std::cmp::Ordering::Equal
    });

    Box::new(keyed.into_iter().map(|(_, row)| Ok(row)))
}

/// NULL sorts last regardless of direction; everything else follows the
/// total value order, reversed for DESC.
fn ordered(a: &Value, b: &Value, direction: SortOrder) -> std::cmp::Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => std::cmp::Ordering::Equal,
        (true, false) => std::cmp::Ordering::Greater,
        (false, true) => std::cmp::Ordering::Less,
        (false, false) => {
            let ordering = a.order_compare(b);
            match direction {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        }
    }
}

fn execute_aggregate<'a, V: GraphView>(
    view: &'a V,
    input: RowIter<'a>,
    group_by: &'a [(String, crate::ast::Expression)],
    aggregates: &'a [(String, AggregateCall)],
    params: &'a Params,
) -> RowIter<'a> {
    let rows: Result<Vec<Row>> = input.collect();
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => return Box::new(std::iter::once(Err(e))),
    };

    // Partition by group key, preserving first-seen group order.
    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: std::collections::HashMap<Vec<Value>, Vec<Row>> =
        std::collections::HashMap::new();
    for row in rows {
        let mut key = Vec::with_capacity(group_by.len());
        for (_, expr) in group_by {
            match evaluate(expr, &row, view, params) {
                Ok(v) => key.push(v),
                Err(e) => return Box::new(std::iter::once(Err(e))),
            }
        }
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(row);
    }

    // A global aggregate over an empty input still yields one row.
    if group_by.is_empty() && groups.is_empty() {
        order.push(Vec::new());
        groups.insert(Vec::new(), Vec::new());
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let members = &groups[&key];
        let mut row = Row::default();
        for (i, (name, _)) in group_by.iter().enumerate() {
            row.set(name.clone(), key[i].clone());
        }
        for (name, call) in aggregates {
            match compute_aggregate(view, call, members, params) {
                Ok(value) => row.set(name.clone(), value),
                Err(e) => return Box::new(std::iter::once(Err(e))),
            }
        }
        out.push(Ok(row));
    }
    Box::new(out.into_iter())
}

/// NULL never contributes to an aggregate except COUNT(*). An empty
/// contribution set yields SUM=0, AVG=NULL, MIN/MAX=NULL, COLLECT=[].
fn compute_aggregate<V: GraphView>(
    view: &V,
    call: &AggregateCall,
    rows: &[Row],
    params: &Params,
) -> Result<Value> {
    if call.function == AggregateFunction::CountStar {
        return Ok(Value::Int(rows.len() as i64));
    }

    let arg = call
        .arg
        .as_ref()
        .expect("non-star aggregates carry an argument");
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let value = evaluate(arg, row, view, params)?;
        if !value.is_null() {
            values.push(value);
        }
    }
    if call.distinct {
        let mut seen: HashSet<Value> = HashSet::new();
        values.retain(|v| seen.insert(v.clone()));
    }

    match call.function {
        AggregateFunction::CountStar => unreachable!(),
        AggregateFunction::Count => Ok(Value::Int(values.len() as i64)),
        AggregateFunction::Collect => Ok(Value::List(values)),
        AggregateFunction::Sum => {
            let mut int_sum: i64 = 0;
            let mut float_sum: f64 = 0.0;
            let mut is_float = false;
            for value in &values {
                match value {
                    Value::Int(i) => {
                        int_sum = int_sum.checked_add(*i).ok_or_else(|| {
                            Error::RuntimeType("integer overflow in SUM".into())
                        })?;
                        float_sum += *i as f64;
                    }
                    Value::Float(f) => {
                        is_float = true;
                        float_sum += f;
                    }
                    other => {
                        return Err(Error::RuntimeType(format!(
                            "SUM over non-numeric {}",
                            other.type_name()
                        )));
                    }
                }
            }
            if is_float {
                Ok(Value::Float(float_sum))
            } else {
                Ok(Value::Int(int_sum))
            }
        }
        AggregateFunction::Avg => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            let mut sum = 0.0;
            for value in &values {
                match value {
                    Value::Int(i) => sum += *i as f64,
                    Value::Float(f) => sum += f,
                    other => {
                        return Err(Error::RuntimeType(format!(
                            "AVG over non-numeric {}",
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Value::Float(sum / values.len() as f64))
        }
        AggregateFunction::Min => Ok(values
            .into_iter()
            .min_by(|a, b| a.order_compare(b))
            .unwrap_or(Value::Null)),
        AggregateFunction::Max => Ok(values
            .into_iter()
            .max_by(|a, b| a.order_compare(b))
            .unwrap_or(Value::Null)),
    }
}

/// Write access used by CREATE, DELETE, and SET execution. Implemented by
/// the database facade's transaction wrapper; a `Null` property value
/// removes the property.
pub trait WriteableGraph {
    fn create_node(
        &mut self,
        labels: Vec<String>,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<NodeId>;

    fn create_relationship(
        &mut self,
        src: NodeId,
        rel_type: &str,
        dst: NodeId,
        properties: BTreeMap<String, PropertyValue>,
    ) -> Result<RelId>;

    fn set_node_property(&mut self, id: NodeId, key: &str, value: PropertyValue) -> Result<()>;

    fn set_relationship_property(
        &mut self,
        id: RelId,
        key: &str,
        value: PropertyValue,
    ) -> Result<()>;

    fn delete_node(&mut self, id: NodeId, detach: bool) -> Result<()>;

    fn delete_relationship(&mut self, id: RelId) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes_created: u64,
    pub relationships_created: u64,
    pub properties_set: u64,
    pub nodes_deleted: u64,
    pub relationships_deleted: u64,
}

/// Executes a write plan: the read part streams rows, the outermost write
/// operator applies its effect once per row.
pub fn execute_write<V: GraphView, W: WriteableGraph>(
    plan: &Plan,
    view: &V,
    writer: &mut W,
    params: &Params,
) -> Result<WriteSummary> {
    let mut summary = WriteSummary::default();
    match plan {
        Plan::Create { input, patterns } => {
            let rows: Result<Vec<Row>> = execute_plan(view, input, params, None).collect();
            for row in rows? {
                create_patterns(view, writer, patterns, row, params, &mut summary)?;
            }
        }
        Plan::Delete {
            input,
            detach,
            expressions,
        } => {
            let rows: Result<Vec<Row>> = execute_plan(view, input, params, None).collect();
            let mut nodes: Vec<NodeId> = Vec::new();
            let mut rels: Vec<RelId> = Vec::new();
            for row in rows? {
                for expr in expressions {
                    match evaluate(expr, &row, view, params)? {
                        Value::Null => {}
                        Value::NodeRef(id) => {
                            if !nodes.contains(&id) {
                                nodes.push(id);
                            }
                        }
                        Value::RelRef(id) => {
                            if !rels.contains(&id) {
                                rels.push(id);
                            }
                        }
                        other => {
                            return Err(Error::RuntimeType(format!(
                                "DELETE expects nodes or relationships, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
            }
            for id in rels {
                writer.delete_relationship(id)?;
                summary.relationships_deleted += 1;
            }
            for id in nodes {
                writer.delete_node(id, *detach)?;
                summary.nodes_deleted += 1;
            }
        }
        Plan::SetProperties { input, items } => {
            let rows: Result<Vec<Row>> = execute_plan(view, input, params, None).collect();
            for row in rows? {
                apply_set_items(view, writer, items, &row, params, &mut summary)?;
            }
        }
        _ => {
            return Err(Error::Compile("not a write plan".into()));
        }
    }
    Ok(summary)
}

fn create_patterns<V: GraphView, W: WriteableGraph>(
    view: &V,
    writer: &mut W,
    patterns: &[Pattern],
    mut row: Row,
    params: &Params,
    summary: &mut WriteSummary,
) -> Result<()> {
    for pattern in patterns {
        // First pass: materialize every node of the pattern.
        let mut node_ids: Vec<NodeId> = Vec::new();
        for element in &pattern.elements {
            let PathElement::Node(node) = element else {
                continue;
            };
            let existing = node.variable.as_ref().and_then(|v| row.get(v)).cloned();
            let id = match existing {
                Some(Value::NodeRef(id)) => {
                    if !node.labels.is_empty() || !node.properties.is_empty() {
                        return Err(Error::RuntimeType(format!(
                            "variable '{}' is already bound; CREATE cannot redeclare it",
                            node.variable.as_deref().unwrap_or("?")
                        )));
                    }
                    id
                }
                Some(Value::Null) | None => {
                    let mut properties = BTreeMap::new();
                    for (key, expr) in &node.properties {
                        let value = evaluate(expr, &row, view, params)?.to_property()?;
                        if !value.is_null() {
                            properties.insert(key.clone(), value);
                        }
                    }
                    summary.properties_set += properties.len() as u64;
                    let id = writer.create_node(node.labels.clone(), properties)?;
                    summary.nodes_created += 1;
                    if let Some(v) = &node.variable {
                        row.set(v.clone(), Value::NodeRef(id));
                    }
                    id
                }
                Some(other) => {
                    return Err(Error::RuntimeType(format!(
                        "variable '{}' is a {}, expected a node",
                        node.variable.as_deref().unwrap_or("?"),
                        other.type_name()
                    )));
                }
            };
            node_ids.push(id);
        }

        // Second pass: wire relationships between consecutive nodes.
        let mut node_index = 0;
        for element in &pattern.elements {
            let PathElement::Relationship(rel) = element else {
                continue;
            };
            let left = node_ids[node_index];
            let right = node_ids[node_index + 1];
            node_index += 1;

            let (src, dst) = match rel.direction {
                PatternDirection::LeftToRight => (left, right),
                PatternDirection::RightToLeft => (right, left),
                PatternDirection::Undirected => {
                    return Err(Error::Compile(
                        "CREATE requires a directed relationship".into(),
                    ));
                }
            };
            let mut properties = BTreeMap::new();
            for (key, expr) in &rel.properties {
                let value = evaluate(expr, &row, view, params)?.to_property()?;
                if !value.is_null() {
                    properties.insert(key.clone(), value);
                }
            }
            summary.properties_set += properties.len() as u64;
            let id = writer.create_relationship(src, &rel.types[0], dst, properties)?;
            summary.relationships_created += 1;
            if let Some(v) = &rel.variable {
                row.set(v.clone(), Value::RelRef(id));
            }
        }
    }
    Ok(())
}

fn apply_set_items<V: GraphView, W: WriteableGraph>(
    view: &V,
    writer: &mut W,
    items: &[SetItem],
    row: &Row,
    params: &Params,
    summary: &mut WriteSummary,
) -> Result<()> {
    for item in items {
        let value = evaluate(&item.value, row, view, params)?.to_property()?;
        match row.get(&item.target.variable) {
            Some(Value::NodeRef(id)) => {
                writer.set_node_property(*id, &item.target.property, value)?;
                summary.properties_set += 1;
            }
            Some(Value::RelRef(id)) => {
                writer.set_relationship_property(*id, &item.target.property, value)?;
                summary.properties_set += 1;
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                return Err(Error::RuntimeType(format!(
                    "SET target '{}' is a {}, expected an entity",
                    item.target.variable,
                    other.type_name()
                )));
            }
        }
    }
    Ok(())
}
