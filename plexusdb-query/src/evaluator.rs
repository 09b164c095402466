//! Expression evaluation.
//!
//! Comparisons follow Cypher's ternary logic: NULL operands make the result
//! NULL rather than an error. Arithmetic on incompatible types is a typed
//! runtime error that aborts the query, not the transaction. String
//! functions return NULL on NULL input.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::executor::{Params, Row, Value};
use plexusdb_api::GraphView;

pub fn evaluate<V: GraphView>(
    expr: &Expression,
    row: &Row,
    view: &V,
    params: &Params,
) -> Result<Value> {
    match expr {
        Expression::Literal(lit) => Ok(literal_value(lit)),
        Expression::Parameter(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| Error::MissingParameter(name.clone())),
        Expression::Variable(name) => Ok(row.get(name).cloned().unwrap_or(Value::Null)),
        Expression::Property(access) => {
            let base = row.get(&access.variable).cloned().unwrap_or(Value::Null);
            property_of(&base, &access.property, view)
        }
        Expression::Binary(b) => {
            let left = evaluate(&b.left, row, view, params)?;
            let right = evaluate(&b.right, row, view, params)?;
            apply_binary(b.operator, left, right)
        }
        Expression::Unary(u) => {
            let operand = evaluate(&u.operand, row, view, params)?;
            apply_unary(u.operator, operand)
        }
        Expression::Case(case) => evaluate_case(case, row, view, params),
        Expression::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, row, view, params)?);
            }
            Ok(Value::List(out))
        }
        Expression::Map(entries) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, value) in entries {
                out.insert(key.clone(), evaluate(value, row, view, params)?);
            }
            Ok(Value::Map(out))
        }
        Expression::Function(call) => evaluate_function(call, row, view, params),
        Expression::Star => Err(Error::RuntimeType(
            "'*' is only valid inside COUNT(*)".into(),
        )),
    }
}

/// A predicate passes only on a definite `true`; `false` and NULL both
/// filter the row out.
pub fn evaluate_predicate<V: GraphView>(
    expr: &Expression,
    row: &Row,
    view: &V,
    params: &Params,
) -> Result<bool> {
    Ok(matches!(evaluate(expr, row, view, params)?, Value::Bool(true)))
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::String(s) => Value::String(s.clone()),
        Literal::Integer(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Null => Value::Null,
    }
}

fn property_of<V: GraphView>(base: &Value, property: &str, view: &V) -> Result<Value> {
    match base {
        Value::Null => Ok(Value::Null),
        Value::NodeRef(id) => Ok(view
            .node(*id)
            .and_then(|n| n.properties.get(property).cloned())
            .map(Value::from_property)
            .unwrap_or(Value::Null)),
        Value::RelRef(id) => Ok(view
            .relationship(*id)
            .and_then(|r| r.properties.get(property).cloned())
            .map(Value::from_property)
            .unwrap_or(Value::Null)),
        Value::Node(node) => Ok(node.properties.get(property).cloned().unwrap_or(Value::Null)),
        Value::Relationship(rel) => {
            Ok(rel.properties.get(property).cloned().unwrap_or(Value::Null))
        }
        Value::Map(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        other => Err(Error::RuntimeType(format!(
            "cannot access property '{property}' on {}",
            other.type_name()
        ))),
    }
}

fn apply_binary(op: BinaryOperator, left: Value, right: Value) -> Result<Value> {
    use BinaryOperator::*;
    match op {
        And => Ok(ternary_and(truth(&left)?, truth(&right)?)),
        Or => Ok(ternary_or(truth(&left)?, truth(&right)?)),
        Xor => Ok(match (truth(&left)?, truth(&right)?) {
            (Some(a), Some(b)) => Value::Bool(a ^ b),
            _ => Value::Null,
        }),
        Equals => Ok(bool_or_null(left.cypher_eq(&right))),
        NotEquals => Ok(bool_or_null(left.cypher_eq(&right).map(|b| !b))),
        LessThan => Ok(bool_or_null(
            left.cypher_cmp(&right).map(|o| o == std::cmp::Ordering::Less),
        )),
        LessEqual => Ok(bool_or_null(
            left.cypher_cmp(&right).map(|o| o != std::cmp::Ordering::Greater),
        )),
        GreaterThan => Ok(bool_or_null(
            left.cypher_cmp(&right).map(|o| o == std::cmp::Ordering::Greater),
        )),
        GreaterEqual => Ok(bool_or_null(
            left.cypher_cmp(&right).map(|o| o != std::cmp::Ordering::Less),
        )),
        In => Ok(in_list(&left, &right)),
        StartsWith => Ok(string_predicate(&left, &right, |s, p| s.starts_with(p))),
        EndsWith => Ok(string_predicate(&left, &right, |s, p| s.ends_with(p))),
        Contains => Ok(string_predicate(&left, &right, |s, p| s.contains(p))),
        Add => add_values(left, right),
        Subtract => numeric_op(left, right, "-", |a, b| a.checked_sub(b), |a, b| a - b),
        Multiply => numeric_op(left, right, "*", |a, b| a.checked_mul(b), |a, b| a * b),
        Divide => divide_values(left, right),
        Modulo => modulo_values(left, right),
        Power => power_values(left, right),
    }
}

fn apply_unary(op: UnaryOperator, operand: Value) -> Result<Value> {
    match op {
        UnaryOperator::Not => match truth(&operand)? {
            Some(b) => Ok(Value::Bool(!b)),
            None => Ok(Value::Null),
        },
        UnaryOperator::Negate => match operand {
            Value::Null => Ok(Value::Null),
            Value::Int(i) => i
                .checked_neg()
                .map(Value::Int)
                .ok_or_else(|| Error::RuntimeType("integer overflow in negation".into())),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(Error::RuntimeType(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        },
        UnaryOperator::IsNull => Ok(Value::Bool(operand.is_null())),
        UnaryOperator::IsNotNull => Ok(Value::Bool(!operand.is_null())),
    }
}

fn truth(value: &Value) -> Result<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(*b)),
        other => Err(Error::RuntimeType(format!(
            "expected a boolean, got {}",
            other.type_name()
        ))),
    }
}

fn ternary_and(a: Option<bool>, b: Option<bool>) -> Value {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Value::Bool(false),
        (Some(true), Some(true)) => Value::Bool(true),
        _ => Value::Null,
    }
}

fn ternary_or(a: Option<bool>, b: Option<bool>) -> Value {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Value::Bool(true),
        (Some(false), Some(false)) => Value::Bool(false),
        _ => Value::Null,
    }
}

fn bool_or_null(value: Option<bool>) -> Value {
    value.map(Value::Bool).unwrap_or(Value::Null)
}

fn in_list(needle: &Value, haystack: &Value) -> Value {
    match haystack {
        Value::Null => Value::Null,
        Value::List(items) => {
            let mut saw_null = false;
            for item in items {
                match needle.cypher_eq(item) {
                    Some(true) => return Value::Bool(true),
                    Some(false) => {}
                    None => saw_null = true,
                }
            }
            if saw_null {
                Value::Null
            } else {
                Value::Bool(false)
            }
        }
        _ => Value::Null,
    }
}

fn string_predicate(left: &Value, right: &Value, pred: impl Fn(&str, &str) -> bool) -> Value {
    match (left, right) {
        (Value::String(s), Value::String(p)) => Value::Bool(pred(s, p)),
        _ => Value::Null,
    }
}

fn add_values(left: Value, right: Value) -> Result<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| Error::RuntimeType("integer overflow in addition".into())),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (a, b) => Err(Error::RuntimeType(format!(
            "cannot add {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn numeric_op(
    left: Value,
    right: Value,
    symbol: &str,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => int_op(a, b)
            .map(Value::Int)
            .ok_or_else(|| Error::RuntimeType(format!("integer overflow in '{symbol}'"))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_op(a as f64, b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_op(a, b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_op(a, b))),
        (a, b) => Err(Error::RuntimeType(format!(
            "cannot apply '{symbol}' to {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn divide_values(left: Value, right: Value) -> Result<Value> {
    if let (Value::Int(_), Value::Int(0)) = (&left, &right) {
        return Err(Error::RuntimeType("division by zero".into()));
    }
    numeric_op(left, right, "/", |a, b| a.checked_div(b), |a, b| a / b)
}

fn modulo_values(left: Value, right: Value) -> Result<Value> {
    if let (Value::Int(_), Value::Int(0)) = (&left, &right) {
        return Err(Error::RuntimeType("modulo by zero".into()));
    }
    numeric_op(left, right, "%", |a, b| a.checked_rem(b), |a, b| a % b)
}

fn power_values(left: Value, right: Value) -> Result<Value> {
    let base = match &left {
        Value::Null => return Ok(Value::Null),
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        other => {
            return Err(Error::RuntimeType(format!(
                "cannot raise {} to a power",
                other.type_name()
            )));
        }
    };
    let exp = match &right {
        Value::Null => return Ok(Value::Null),
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        other => {
            return Err(Error::RuntimeType(format!(
                "exponent must be numeric, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Float(base.powf(exp)))
}

fn evaluate_case<V: GraphView>(
    case: &CaseExpression,
    row: &Row,
    view: &V,
    params: &Params,
) -> Result<Value> {
    match &case.subject {
        // Simple form: compare the subject against each WHEN value.
        Some(subject_expr) => {
            let subject = evaluate(subject_expr, row, view, params)?;
            for (when, then) in &case.whens {
                let candidate = evaluate(when, row, view, params)?;
                if subject.cypher_eq(&candidate) == Some(true) {
                    return evaluate(then, row, view, params);
                }
            }
        }
        // Searched form: first true predicate wins.
        None => {
            for (when, then) in &case.whens {
                if evaluate_predicate(when, row, view, params)? {
                    return evaluate(then, row, view, params);
                }
            }
        }
    }
    match &case.else_expression {
        Some(else_expr) => evaluate(else_expr, row, view, params),
        None => Ok(Value::Null),
    }
}

const SCALAR_FUNCTIONS: &[&str] = &[
    "toupper",
    "tolower",
    "substring",
    "trim",
    "ltrim",
    "rtrim",
    "split",
    "reverse",
    "size",
    "length",
    "coalesce",
    "id",
    "labels",
    "type",
    "properties",
    "keys",
    "tostring",
    "tointeger",
    "tofloat",
    "abs",
    "nodes",
    "relationships",
    "point",
    "datetime",
];

pub fn is_scalar_function(name: &str) -> bool {
    SCALAR_FUNCTIONS.contains(&name.to_lowercase().as_str())
}

fn evaluate_function<V: GraphView>(
    call: &FunctionCall,
    row: &Row,
    view: &V,
    params: &Params,
) -> Result<Value> {
    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(evaluate(arg, row, view, params)?);
    }
    let name = call.name.to_lowercase();

    match name.as_str() {
        "toupper" => string_fn(&name, &args, |s| Value::String(s.to_uppercase())),
        "tolower" => string_fn(&name, &args, |s| Value::String(s.to_lowercase())),
        "trim" => string_fn(&name, &args, |s| Value::String(s.trim().to_string())),
        "ltrim" => string_fn(&name, &args, |s| Value::String(s.trim_start().to_string())),
        "rtrim" => string_fn(&name, &args, |s| Value::String(s.trim_end().to_string())),
        "substring" => substring(&args),
        "split" => split(&args),
        "reverse" => reverse(&args),
        "size" | "length" => size(&args),
        "coalesce" => Ok(args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null)),
        "id" => id_of(&args),
        "labels" => labels_of(&args, view),
        "type" => type_of(&args, view),
        "properties" => properties_of(&args, view),
        "keys" => keys_of(&args, view),
        "tostring" => to_string(&args),
        "tointeger" => to_integer(&args),
        "tofloat" => to_float(&args),
        "abs" => abs(&args),
        "nodes" => path_nodes(&args),
        "relationships" => path_relationships(&args),
        "point" => point(&args),
        "datetime" => datetime(&args),
        _ => Err(Error::RuntimeType(format!("unknown function '{}'", call.name))),
    }
}

fn expect_arity(name: &str, args: &[Value], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(Error::RuntimeType(format!(
            "{name} takes {n} argument(s), got {}",
            args.len()
        )));
    }
    Ok(())
}

fn string_fn(name: &str, args: &[Value], f: impl Fn(&str) -> Value) -> Result<Value> {
    expect_arity(name, args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(f(s)),
        other => Err(Error::RuntimeType(format!(
            "{name} expects a string, got {}",
            other.type_name()
        ))),
    }
}

/// 1-indexed substring with an optional length; out-of-range starts yield
/// the empty string.
fn substring(args: &[Value]) -> Result<Value> {
    if args.len() != 2 && args.len() != 3 {
        return Err(Error::RuntimeType(
            "substring takes 2 or 3 arguments".into(),
        ));
    }
    let s = match &args[0] {
        Value::Null => return Ok(Value::Null),
        Value::String(s) => s,
        other => {
            return Err(Error::RuntimeType(format!(
                "substring expects a string, got {}",
                other.type_name()
            )));
        }
    };
    let start = match &args[1] {
        Value::Null => return Ok(Value::Null),
        Value::Int(i) if *i >= 1 => (*i - 1) as usize,
        other => {
            return Err(Error::RuntimeType(format!(
                "substring start must be a positive integer, got {other:?}"
            )));
        }
    };
    let length = match args.get(2) {
        None => None,
        Some(Value::Null) => return Ok(Value::Null),
        Some(Value::Int(l)) if *l >= 0 => Some(*l as usize),
        Some(other) => {
            return Err(Error::RuntimeType(format!(
                "substring length must be a non-negative integer, got {other:?}"
            )));
        }
    };

    let chars: Vec<char> = s.chars().collect();
    if start >= chars.len() {
        return Ok(Value::String(String::new()));
    }
    let end = match length {
        Some(l) => (start + l).min(chars.len()),
        None => chars.len(),
    };
    Ok(Value::String(chars[start..end].iter().collect()))
}

fn split(args: &[Value]) -> Result<Value> {
    expect_arity("split", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(s), Value::String(sep)) => Ok(Value::List(
            s.split(sep.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        )),
        (a, b) => Err(Error::RuntimeType(format!(
            "split expects two strings, got {} and {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn reverse(args: &[Value]) -> Result<Value> {
    expect_arity("reverse", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
        Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
        other => Err(Error::RuntimeType(format!(
            "reverse expects a string or list, got {}",
            other.type_name()
        ))),
    }
}

fn size(args: &[Value]) -> Result<Value> {
    expect_arity("size", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        Value::Map(map) => Ok(Value::Int(map.len() as i64)),
        Value::Path(path) => Ok(Value::Int(path.rels.len() as i64)),
        other => Err(Error::RuntimeType(format!(
            "size expects a string, list, map, or path, got {}",
            other.type_name()
        ))),
    }
}

fn id_of(args: &[Value]) -> Result<Value> {
    expect_arity("id", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::NodeRef(id) => Ok(Value::Int(*id as i64)),
        Value::RelRef(id) => Ok(Value::Int(*id as i64)),
        Value::Node(n) => Ok(Value::Int(n.id as i64)),
        Value::Relationship(r) => Ok(Value::Int(r.id as i64)),
        other => Err(Error::RuntimeType(format!(
            "id expects a node or relationship, got {}",
            other.type_name()
        ))),
    }
}

fn labels_of<V: GraphView>(args: &[Value], view: &V) -> Result<Value> {
    expect_arity("labels", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::NodeRef(id) => Ok(view
            .node(*id)
            .map(|n| Value::List(n.labels.into_iter().map(Value::String).collect()))
            .unwrap_or(Value::Null)),
        Value::Node(n) => Ok(Value::List(
            n.labels.iter().cloned().map(Value::String).collect(),
        )),
        other => Err(Error::RuntimeType(format!(
            "labels expects a node, got {}",
            other.type_name()
        ))),
    }
}

fn type_of<V: GraphView>(args: &[Value], view: &V) -> Result<Value> {
    expect_arity("type", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::RelRef(id) => Ok(view
            .relationship(*id)
            .map(|r| Value::String(r.rel_type))
            .unwrap_or(Value::Null)),
        Value::Relationship(r) => Ok(Value::String(r.rel_type.clone())),
        other => Err(Error::RuntimeType(format!(
            "type expects a relationship, got {}",
            other.type_name()
        ))),
    }
}

fn properties_of<V: GraphView>(args: &[Value], view: &V) -> Result<Value> {
    expect_arity("properties", args, 1)?;
    let as_map = |props: std::collections::BTreeMap<String, plexusdb_api::PropertyValue>| {
        Value::Map(
            props
                .into_iter()
                .map(|(k, v)| (k, Value::from_property(v)))
                .collect(),
        )
    };
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::NodeRef(id) => Ok(view.node(*id).map(|n| as_map(n.properties)).unwrap_or(Value::Null)),
        Value::RelRef(id) => Ok(view
            .relationship(*id)
            .map(|r| as_map(r.properties))
            .unwrap_or(Value::Null)),
        Value::Node(n) => Ok(Value::Map(n.properties.clone())),
        Value::Relationship(r) => Ok(Value::Map(r.properties.clone())),
        Value::Map(m) => Ok(Value::Map(m.clone())),
        other => Err(Error::RuntimeType(format!(
            "properties expects an entity or map, got {}",
            other.type_name()
        ))),
    }
}

fn keys_of<V: GraphView>(args: &[Value], view: &V) -> Result<Value> {
    match properties_of(args, view) {
        Ok(Value::Map(map)) => Ok(Value::List(map.into_keys().map(Value::String).collect())),
        Ok(Value::Null) => Ok(Value::Null),
        Ok(_) => unreachable!("properties_of returns a map or null"),
        Err(_) => Err(Error::RuntimeType(
            "keys expects an entity or map".into(),
        )),
    }
}

fn to_string(args: &[Value]) -> Result<Value> {
    expect_arity("toString", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Int(i) => Ok(Value::String(i.to_string())),
        Value::Float(f) => Ok(Value::String(f.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(Error::RuntimeType(format!(
            "toString expects a scalar, got {}",
            other.type_name()
        ))),
    }
}

fn to_integer(args: &[Value]) -> Result<Value> {
    expect_arity("toInteger", args, 1)?;
    Ok(match &args[0] {
        Value::Int(i) => Value::Int(*i),
        Value::Float(f) => Value::Int(*f as i64),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn to_float(args: &[Value]) -> Result<Value> {
    expect_arity("toFloat", args, 1)?;
    Ok(match &args[0] {
        Value::Int(i) => Value::Float(*i as f64),
        Value::Float(f) => Value::Float(*f),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn abs(args: &[Value]) -> Result<Value> {
    expect_arity("abs", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int(i) => Ok(Value::Int(i.abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(Error::RuntimeType(format!(
            "abs expects a number, got {}",
            other.type_name()
        ))),
    }
}

fn path_nodes(args: &[Value]) -> Result<Value> {
    expect_arity("nodes", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Path(p) => Ok(Value::List(
            p.nodes.iter().map(|id| Value::NodeRef(*id)).collect(),
        )),
        other => Err(Error::RuntimeType(format!(
            "nodes expects a path, got {}",
            other.type_name()
        ))),
    }
}

fn path_relationships(args: &[Value]) -> Result<Value> {
    expect_arity("relationships", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Path(p) => Ok(Value::List(
            p.rels.iter().map(|id| Value::RelRef(*id)).collect(),
        )),
        other => Err(Error::RuntimeType(format!(
            "relationships expects a path, got {}",
            other.type_name()
        ))),
    }
}

fn point(args: &[Value]) -> Result<Value> {
    expect_arity("point", args, 1)?;
    let Value::Map(map) = &args[0] else {
        return match &args[0] {
            Value::Null => Ok(Value::Null),
            other => Err(Error::RuntimeType(format!(
                "point expects a map with x and y, got {}",
                other.type_name()
            ))),
        };
    };
    let coord = |key: &str| -> Result<f64> {
        match map.get(key) {
            Some(Value::Int(i)) => Ok(*i as f64),
            Some(Value::Float(f)) => Ok(*f),
            _ => Err(Error::RuntimeType(format!(
                "point requires a numeric '{key}'"
            ))),
        }
    };
    Ok(Value::Point {
        x: coord("x")?,
        y: coord("y")?,
    })
}

fn datetime(args: &[Value]) -> Result<Value> {
    expect_arity("datetime", args, 1)?;
    match &args[0] {
        Value::Null => Ok(Value::Null),
        Value::Int(micros) => Ok(Value::DateTime(*micros)),
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.timestamp_micros()))
            .map_err(|e| Error::RuntimeType(format!("unparseable datetime '{s}': {e}"))),
        other => Err(Error::RuntimeType(format!(
            "datetime expects a string or epoch microseconds, got {}",
            other.type_name()
        ))),
    }
}
