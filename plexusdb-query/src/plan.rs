//! The operator-graph IR and the AST -> IR compiler.
//!
//! Compilation is a pure transform: no I/O, no catalog access. Index use is
//! expressed as an `IndexSeek` with a scan fallback that the executor takes
//! when no matching index is declared at run time. Arity and name errors
//! (UNION column counts, unknown functions, unbound variables) are rejected
//! here, before anything executes.

use crate::ast::*;
use crate::error::{Error, Result};
use crate::evaluator;
use std::collections::BTreeSet;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub plan: Plan,
    pub kind: QueryKind,
    pub columns: Vec<String>,
}

/// One relationship hop: where to start, what to traverse, what the far end
/// must look like.
#[derive(Debug, Clone)]
pub struct ExpandSpec {
    pub src: String,
    pub rel_alias: Option<String>,
    pub dst: String,
    pub direction: PatternDirection,
    pub types: Vec<String>,
    pub rel_properties: Vec<(String, Expression)>,
    pub dst_labels: Vec<String>,
    pub dst_properties: Vec<(String, Expression)>,
    pub path_alias: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

#[derive(Debug, Clone)]
pub struct AggregateCall {
    pub function: AggregateFunction,
    pub distinct: bool,
    pub arg: Option<Expression>,
}

#[derive(Debug, Clone)]
pub enum Plan {
    /// One empty row; the seed for queries without a MATCH.
    SingleRow,
    /// Re-emits the row a surrounding apply operator supplies.
    Argument,
    ScanLabel {
        alias: String,
        labels: Vec<String>,
        properties: Vec<(String, Expression)>,
    },
    /// Equality seek through a declared index, falling back to a scan when
    /// no index covers (label, property) at run time.
    IndexSeek {
        alias: String,
        label: String,
        property: String,
        value: Expression,
        fallback: Box<Plan>,
    },
    /// Re-checks labels and inline properties on an already-bound variable.
    NodeFilter {
        input: Box<Plan>,
        alias: String,
        labels: Vec<String>,
        properties: Vec<(String, Expression)>,
    },
    Expand {
        input: Box<Plan>,
        spec: ExpandSpec,
    },
    /// Left-outer expand: rows without a match survive with the new
    /// variables bound to NULL.
    OptionalExpand {
        input: Box<Plan>,
        spec: ExpandSpec,
    },
    VarLengthExpand {
        input: Box<Plan>,
        spec: ExpandSpec,
        min: u32,
        max: Option<u32>,
    },
    /// Passes rows through; emits a single all-NULL row when the input is
    /// empty. Used for OPTIONAL MATCH without a left-hand side.
    Optional {
        input: Box<Plan>,
        aliases: Vec<String>,
    },
    /// Runs `right` once per input row (the row is its Argument); rows
    /// without any right-side match survive with `null_aliases` nulled.
    OptionalApply {
        input: Box<Plan>,
        right: Box<Plan>,
        null_aliases: Vec<String>,
    },
    CartesianProduct {
        left: Box<Plan>,
        right: Box<Plan>,
    },
    Filter {
        input: Box<Plan>,
        predicate: Expression,
    },
    /// With `extend`, keeps the input bindings alongside the projected
    /// columns so a later Sort can see both; a final non-extending Project
    /// strips back down to the output columns.
    Project {
        input: Box<Plan>,
        columns: Vec<(String, Expression)>,
        extend: bool,
    },
    Aggregate {
        input: Box<Plan>,
        group_by: Vec<(String, Expression)>,
        aggregates: Vec<(String, AggregateCall)>,
    },
    Sort {
        input: Box<Plan>,
        keys: Vec<(Expression, SortOrder)>,
    },
    Skip {
        input: Box<Plan>,
        count: u64,
    },
    Limit {
        input: Box<Plan>,
        count: u64,
    },
    Distinct {
        input: Box<Plan>,
    },
    Union {
        left: Box<Plan>,
        right: Box<Plan>,
        all: bool,
        columns: Vec<String>,
    },
    Create {
        input: Box<Plan>,
        patterns: Vec<Pattern>,
    },
    Delete {
        input: Box<Plan>,
        detach: bool,
        expressions: Vec<Expression>,
    },
    SetProperties {
        input: Box<Plan>,
        items: Vec<SetItem>,
    },
}

pub fn compile(query: &Query) -> Result<CompiledQuery> {
    // Clauses before the first UNION form the head query; each UNION
    // clause carries its own right-hand side. Segments compile
    // independently and the results chain left to right.
    let head_len = query
        .clauses
        .iter()
        .position(is_union)
        .unwrap_or(query.clauses.len());
    let mut compiler = Compiler::default();
    let mut compiled = compiler.compile_segment(&query.clauses[..head_len])?;

    for clause in &query.clauses {
        if let Clause::Union(u) = clause {
            if compiled.kind == QueryKind::Write {
                return Err(Error::Compile("UNION cannot combine write queries".into()));
            }
            let mut right_compiler = Compiler::default();
            let right = right_compiler.compile_segment(&u.query.clauses)?;
            if right.kind == QueryKind::Write {
                return Err(Error::Compile("UNION cannot combine write queries".into()));
            }
            if right.columns.len() != compiled.columns.len() {
                return Err(Error::Compile(format!(
                    "UNION branches must return the same number of columns ({} vs {})",
                    compiled.columns.len(),
                    right.columns.len()
                )));
            }
            let columns = compiled.columns.clone();
            compiled = CompiledQuery {
                plan: Plan::Union {
                    left: Box::new(compiled.plan),
                    right: Box::new(right.plan),
                    all: u.all,
                    columns: columns.clone(),
                },
                kind: QueryKind::Read,
                columns,
            };
        }
    }

    Ok(compiled)
}

fn is_union(clause: &Clause) -> bool {
    matches!(clause, Clause::Union(_))
}

#[derive(Default)]
struct Compiler {
    anon_counter: usize,
}

impl Compiler {
    fn fresh_alias(&mut self) -> String {
        let alias = format!("__anon{}", self.anon_counter);
        self.anon_counter += 1;
        alias
    }

    fn compile_segment(&mut self, clauses: &[Clause]) -> Result<CompiledQuery> {
        let mut plan: Option<Plan> = None;
        let mut bound: BTreeSet<String> = BTreeSet::new();
        let mut kind = QueryKind::Read;
        let mut columns: Vec<String> = Vec::new();
        let mut returned = false;

        for (i, clause) in clauses.iter().enumerate() {
            if returned {
                return Err(Error::Compile(
                    "no clauses may follow RETURN in a query part".into(),
                ));
            }
            match clause {
                Clause::Match(m) => {
                    if kind == QueryKind::Write {
                        return Err(Error::Compile(
                            "MATCH after a write clause is not supported".into(),
                        ));
                    }
                    let hint = match clauses.get(i + 1) {
                        Some(Clause::Where(w)) => Some(&w.expression),
                        _ => None,
                    };
                    for pattern in &m.patterns {
                        plan = Some(self.compile_pattern(
                            plan.take(),
                            pattern,
                            m.optional,
                            &mut bound,
                            hint,
                        )?);
                    }
                }
                Clause::Where(w) => {
                    validate_expression(&w.expression, &bound, false)?;
                    plan = Some(Plan::Filter {
                        input: Box::new(plan.take().unwrap_or(Plan::SingleRow)),
                        predicate: w.expression.clone(),
                    });
                }
                Clause::Create(c) => {
                    if kind == QueryKind::Write {
                        return Err(Error::Compile(
                            "only one write clause per query is supported".into(),
                        ));
                    }
                    kind = QueryKind::Write;
                    validate_create_patterns(&c.patterns, &bound)?;
                    for pattern in &c.patterns {
                        for element in &pattern.elements {
                            if let PathElement::Node(n) = element {
                                if let Some(v) = &n.variable {
                                    bound.insert(v.clone());
                                }
                            }
                            if let PathElement::Relationship(r) = element {
                                if let Some(v) = &r.variable {
                                    bound.insert(v.clone());
                                }
                            }
                        }
                    }
                    plan = Some(Plan::Create {
                        input: Box::new(plan.take().unwrap_or(Plan::SingleRow)),
                        patterns: c.patterns.clone(),
                    });
                }
                Clause::Delete(d) => {
                    if kind == QueryKind::Write {
                        return Err(Error::Compile(
                            "only one write clause per query is supported".into(),
                        ));
                    }
                    kind = QueryKind::Write;
                    for expr in &d.expressions {
                        match expr {
                            Expression::Variable(name) if bound.contains(name) => {}
                            Expression::Variable(name) => {
                                return Err(Error::Compile(format!(
                                    "DELETE references unbound variable '{name}'"
                                )));
                            }
                            _ => {
                                return Err(Error::Compile(
                                    "DELETE takes bound variables".into(),
                                ));
                            }
                        }
                    }
                    plan = Some(Plan::Delete {
                        input: Box::new(plan.take().unwrap_or(Plan::SingleRow)),
                        detach: d.detach,
                        expressions: d.expressions.clone(),
                    });
                }
                Clause::Set(s) => {
                    if kind == QueryKind::Write {
                        return Err(Error::Compile(
                            "only one write clause per query is supported".into(),
                        ));
                    }
                    kind = QueryKind::Write;
                    for item in &s.items {
                        if !bound.contains(&item.target.variable) {
                            return Err(Error::Compile(format!(
                                "SET references unbound variable '{}'",
                                item.target.variable
                            )));
                        }
                        validate_expression(&item.value, &bound, false)?;
                    }
                    plan = Some(Plan::SetProperties {
                        input: Box::new(plan.take().unwrap_or(Plan::SingleRow)),
                        items: s.items.clone(),
                    });
                }
                Clause::Return(r) => {
                    if kind == QueryKind::Write {
                        return Err(Error::Compile(
                            "RETURN after a write clause is not supported".into(),
                        ));
                    }
                    let (new_plan, new_columns) = self.compile_return(
                        r,
                        plan.take().unwrap_or(Plan::SingleRow),
                        &bound,
                    )?;
                    plan = Some(new_plan);
                    columns = new_columns;
                    returned = true;
                }
                Clause::Union(_) => {
                    return Err(Error::Compile("UNION is only valid at the top level".into()));
                }
            }
        }

        let plan = plan.ok_or_else(|| Error::Compile("empty query".into()))?;
        if kind == QueryKind::Read && !returned {
            return Err(Error::Compile("read query is missing RETURN".into()));
        }
        Ok(CompiledQuery {
            plan,
            kind,
            columns,
        })
    }

    fn compile_pattern(
        &mut self,
        input: Option<Plan>,
        pattern: &Pattern,
        optional: bool,
        bound: &mut BTreeSet<String>,
        where_hint: Option<&Expression>,
    ) -> Result<Plan> {
        let elements = &pattern.elements;
        let PathElement::Node(first) = &elements[0] else {
            return Err(Error::Compile("pattern must start with a node".into()));
        };
        if pattern.variable.is_some() && elements.len() == 1 {
            return Err(Error::Compile(
                "a named path requires at least one relationship".into(),
            ));
        }

        let first_alias = match &first.variable {
            Some(v) => v.clone(),
            None => self.fresh_alias(),
        };
        let first_bound = bound.contains(&first_alias);

        // Variables this pattern introduces (for optional NULL padding).
        let mut introduced: Vec<String> = Vec::new();
        if !first_bound {
            introduced.push(first_alias.clone());
        }
        let mut hop_aliases: Vec<(Option<String>, String)> = Vec::new();
        {
            let mut idx = 1;
            while idx < elements.len() {
                let PathElement::Relationship(rel) = &elements[idx] else {
                    return Err(Error::Compile("malformed pattern".into()));
                };
                let PathElement::Node(node) = &elements[idx + 1] else {
                    return Err(Error::Compile("malformed pattern".into()));
                };
                let dst_alias = match &node.variable {
                    Some(v) => v.clone(),
                    None => self.fresh_alias(),
                };
                if let Some(v) = &rel.variable {
                    if !bound.contains(v) {
                        introduced.push(v.clone());
                    }
                }
                if !bound.contains(&dst_alias) && !introduced.contains(&dst_alias) {
                    introduced.push(dst_alias.clone());
                }
                hop_aliases.push((rel.variable.clone(), dst_alias));
                idx += 2;
            }
        }
        if let Some(path_var) = &pattern.variable {
            introduced.push(path_var.clone());
        }

        // Property expressions inside the pattern may reference any variable
        // the pattern itself binds, plus everything bound before it.
        let mut local = bound.clone();
        local.insert(first_alias.clone());
        for (rel_alias, dst_alias) in &hop_aliases {
            if let Some(r) = rel_alias {
                local.insert(r.clone());
            }
            local.insert(dst_alias.clone());
        }

        let plan = if optional {
            self.compile_optional_pattern(
                input,
                pattern,
                &first_alias,
                first_bound,
                &hop_aliases,
                introduced.clone(),
                &local,
            )?
        } else {
            self.compile_plain_pattern(
                input,
                pattern,
                &first_alias,
                first_bound,
                &hop_aliases,
                where_hint,
                bound,
                &local,
            )?
        };

        bound.insert(first_alias);
        for (rel_alias, dst_alias) in hop_aliases {
            if let Some(r) = rel_alias {
                bound.insert(r);
            }
            bound.insert(dst_alias);
        }
        if let Some(path_var) = &pattern.variable {
            bound.insert(path_var.clone());
        }

        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_plain_pattern(
        &mut self,
        input: Option<Plan>,
        pattern: &Pattern,
        first_alias: &str,
        first_bound: bool,
        hop_aliases: &[(Option<String>, String)],
        where_hint: Option<&Expression>,
        bound: &BTreeSet<String>,
        local: &BTreeSet<String>,
    ) -> Result<Plan> {
        let PathElement::Node(first) = &pattern.elements[0] else {
            unreachable!();
        };

        let mut plan = if first_bound {
            let base = input.ok_or_else(|| {
                Error::Compile(format!("variable '{first_alias}' bound without input"))
            })?;
            for (_, expr) in &first.properties {
                validate_expression(expr, local, false)?;
            }
            if first.labels.is_empty() && first.properties.is_empty() {
                base
            } else {
                Plan::NodeFilter {
                    input: Box::new(base),
                    alias: first_alias.to_string(),
                    labels: first.labels.clone(),
                    properties: first.properties.clone(),
                }
            }
        } else {
            match input {
                // As the right side of a product, inline properties may
                // reference left-hand variables, so they are re-checked
                // after the product instead of inside the scan.
                Some(left) => {
                    for (_, expr) in &first.properties {
                        validate_expression(expr, bound, false)?;
                    }
                    let scan = Plan::ScanLabel {
                        alias: first_alias.to_string(),
                        labels: first.labels.clone(),
                        properties: Vec::new(),
                    };
                    let product = Plan::CartesianProduct {
                        left: Box::new(left),
                        right: Box::new(scan),
                    };
                    if first.properties.is_empty() {
                        product
                    } else {
                        Plan::NodeFilter {
                            input: Box::new(product),
                            alias: first_alias.to_string(),
                            labels: Vec::new(),
                            properties: first.properties.clone(),
                        }
                    }
                }
                None => {
                    for (_, expr) in &first.properties {
                        validate_expression(expr, bound, false)?;
                    }
                    self.scan_for(first, first_alias, where_hint, bound)?
                }
            }
        };

        plan = self.chain_hops(plan, pattern, first_alias, hop_aliases, local)?;
        Ok(plan)
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_optional_pattern(
        &mut self,
        input: Option<Plan>,
        pattern: &Pattern,
        first_alias: &str,
        first_bound: bool,
        hop_aliases: &[(Option<String>, String)],
        introduced: Vec<String>,
        local: &BTreeSet<String>,
    ) -> Result<Plan> {
        let PathElement::Node(first) = &pattern.elements[0] else {
            unreachable!();
        };

        // The common shape: a single plain hop out of a bound variable
        // compiles to the dedicated OptionalExpand operator.
        if first_bound && hop_aliases.len() == 1 && pattern.variable.is_none() {
            if let PathElement::Relationship(rel) = &pattern.elements[1] {
                if rel.length.is_none()
                    && first.labels.is_empty()
                    && first.properties.is_empty()
                {
                    let PathElement::Node(dst_node) = &pattern.elements[2] else {
                        unreachable!();
                    };
                    for (_, expr) in rel.properties.iter().chain(dst_node.properties.iter()) {
                        validate_expression(expr, local, false)?;
                    }
                    let base = input.ok_or_else(|| {
                        Error::Compile(format!("variable '{first_alias}' bound without input"))
                    })?;
                    let spec = self.hop_spec(
                        first_alias,
                        rel,
                        dst_node,
                        &hop_aliases[0].1,
                        None,
                    )?;
                    return Ok(Plan::OptionalExpand {
                        input: Box::new(base),
                        spec,
                    });
                }
            }
        }

        // General shape: compile the pattern standalone (seeded by Argument
        // when it hangs off bound variables) and left-outer-apply it.
        for (_, expr) in &first.properties {
            validate_expression(expr, local, false)?;
        }
        let seed = if first_bound {
            let mut seeded = Plan::Argument;
            if !first.labels.is_empty() || !first.properties.is_empty() {
                seeded = Plan::NodeFilter {
                    input: Box::new(seeded),
                    alias: first_alias.to_string(),
                    labels: first.labels.clone(),
                    properties: first.properties.clone(),
                };
            }
            seeded
        } else {
            self.scan_for(first, first_alias, None, local)?
        };

        let right = self.chain_hops(seed, pattern, first_alias, hop_aliases, local)?;

        match input {
            Some(left) => Ok(Plan::OptionalApply {
                input: Box::new(left),
                right: Box::new(right),
                null_aliases: introduced,
            }),
            None => Ok(Plan::Optional {
                input: Box::new(right),
                aliases: introduced,
            }),
        }
    }

    fn chain_hops(
        &mut self,
        mut plan: Plan,
        pattern: &Pattern,
        first_alias: &str,
        hop_aliases: &[(Option<String>, String)],
        bound: &BTreeSet<String>,
    ) -> Result<Plan> {
        let mut src_alias = first_alias.to_string();
        let mut idx = 1;
        let mut hop = 0;
        while idx < pattern.elements.len() {
            let PathElement::Relationship(rel) = &pattern.elements[idx] else {
                unreachable!();
            };
            let PathElement::Node(node) = &pattern.elements[idx + 1] else {
                unreachable!();
            };
            for (_, expr) in rel.properties.iter().chain(node.properties.iter()) {
                validate_expression(expr, bound, false)?;
            }

            let dst_alias = hop_aliases[hop].1.clone();
            let spec = self.hop_spec(
                &src_alias,
                rel,
                node,
                &dst_alias,
                pattern.variable.clone(),
            )?;

            plan = match rel.length {
                Some(len) => Plan::VarLengthExpand {
                    input: Box::new(plan),
                    spec,
                    min: len.min.unwrap_or(1),
                    max: len.max,
                },
                None => Plan::Expand {
                    input: Box::new(plan),
                    spec,
                },
            };

            src_alias = dst_alias;
            idx += 2;
            hop += 1;
        }
        Ok(plan)
    }

    fn hop_spec(
        &mut self,
        src: &str,
        rel: &RelationshipPattern,
        node: &NodePattern,
        dst_alias: &str,
        path_alias: Option<String>,
    ) -> Result<ExpandSpec> {
        Ok(ExpandSpec {
            src: src.to_string(),
            rel_alias: rel.variable.clone(),
            dst: dst_alias.to_string(),
            direction: rel.direction,
            types: rel.types.clone(),
            rel_properties: rel.properties.clone(),
            dst_labels: node.labels.clone(),
            dst_properties: node.properties.clone(),
            path_alias,
        })
    }

    /// A label scan, upgraded to an index seek when the adjacent WHERE has
    /// a usable equality on the scanned variable.
    fn scan_for(
        &mut self,
        node: &NodePattern,
        alias: &str,
        where_hint: Option<&Expression>,
        _bound: &BTreeSet<String>,
    ) -> Result<Plan> {
        let scan = Plan::ScanLabel {
            alias: alias.to_string(),
            labels: node.labels.clone(),
            properties: node.properties.clone(),
        };

        let Some(label) = node.labels.first() else {
            return Ok(scan);
        };
        // Inline property maps are checked by the scan itself; the index
        // path would skip them, so only a bare labeled node is upgraded.
        if !node.properties.is_empty() {
            return Ok(scan);
        }
        let Some(hint) = where_hint else {
            return Ok(scan);
        };
        let Some((property, value)) = find_equality_on(hint, alias) else {
            return Ok(scan);
        };

        Ok(Plan::IndexSeek {
            alias: alias.to_string(),
            label: label.clone(),
            property,
            value,
            fallback: Box::new(scan),
        })
    }

    fn compile_return(
        &mut self,
        r: &ReturnClause,
        input: Plan,
        bound: &BTreeSet<String>,
    ) -> Result<(Plan, Vec<String>)> {
        let mut columns: Vec<(String, Expression)> = Vec::new();
        let mut has_aggregate = false;
        for (i, item) in r.items.iter().enumerate() {
            validate_expression(&item.expression, bound, true)?;
            if expression_has_aggregate(&item.expression) {
                has_aggregate = true;
            }
            let name = item
                .alias
                .clone()
                .unwrap_or_else(|| expression_name(&item.expression, i));
            columns.push((name, item.expression.clone()));
        }
        let column_names: Vec<String> = columns.iter().map(|(n, _)| n.clone()).collect();

        let mut plan = if has_aggregate {
            let mut group_by = Vec::new();
            let mut aggregates = Vec::new();
            for (name, expr) in &columns {
                if expression_has_aggregate(expr) {
                    let call = as_aggregate_call(expr)?;
                    aggregates.push((name.clone(), call));
                } else {
                    group_by.push((name.clone(), expr.clone()));
                }
            }
            Plan::Aggregate {
                input: Box::new(input),
                group_by,
                aggregates,
            }
        } else {
            Plan::Project {
                input: Box::new(input),
                columns: columns.clone(),
                extend: true,
            }
        };

        if let Some(order) = &r.order_by {
            let keys = order
                .items
                .iter()
                .map(|item| {
                    let key = resolve_order_key(
                        &item.expression,
                        &columns,
                        has_aggregate,
                        bound,
                    )?;
                    Ok((key, item.direction))
                })
                .collect::<Result<Vec<_>>>()?;
            plan = Plan::Sort {
                input: Box::new(plan),
                keys,
            };
        }

        // Strip extended bindings (plain projections) and normalize column
        // order to the declared RETURN order (aggregations emit group keys
        // before aggregate columns internally).
        plan = Plan::Project {
            input: Box::new(plan),
            columns: column_names
                .iter()
                .map(|n| (n.clone(), Expression::Variable(n.clone())))
                .collect(),
            extend: false,
        };

        if r.distinct {
            plan = Plan::Distinct {
                input: Box::new(plan),
            };
        }
        if let Some(skip) = r.skip {
            plan = Plan::Skip {
                input: Box::new(plan),
                count: skip,
            };
        }
        if let Some(limit) = r.limit {
            plan = Plan::Limit {
                input: Box::new(plan),
                count: limit,
            };
        }

        Ok((plan, column_names))
    }
}

/// Looks for `alias.prop = <constant>` (either side) among the top-level
/// AND conjuncts of a WHERE expression.
fn find_equality_on(expr: &Expression, alias: &str) -> Option<(String, Expression)> {
    match expr {
        Expression::Binary(b) if b.operator == BinaryOperator::And => {
            find_equality_on(&b.left, alias).or_else(|| find_equality_on(&b.right, alias))
        }
        Expression::Binary(b) if b.operator == BinaryOperator::Equals => {
            for (side, other) in [(&b.left, &b.right), (&b.right, &b.left)] {
                if let Expression::Property(p) = side {
                    if p.variable == alias && is_constant(other) {
                        return Some((p.property.clone(), (*other).clone()));
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn is_constant(expr: &Expression) -> bool {
    matches!(expr, Expression::Literal(_) | Expression::Parameter(_))
}

fn expression_has_aggregate(expr: &Expression) -> bool {
    match expr {
        Expression::Function(f) => aggregate_function(&f.name).is_some(),
        Expression::Binary(b) => {
            expression_has_aggregate(&b.left) || expression_has_aggregate(&b.right)
        }
        Expression::Unary(u) => expression_has_aggregate(&u.operand),
        Expression::List(items) => items.iter().any(expression_has_aggregate),
        Expression::Map(entries) => entries.iter().any(|(_, e)| expression_has_aggregate(e)),
        Expression::Case(c) => {
            c.subject.as_ref().is_some_and(expression_has_aggregate)
                || c.whens
                    .iter()
                    .any(|(w, t)| expression_has_aggregate(w) || expression_has_aggregate(t))
                || c.else_expression.as_ref().is_some_and(expression_has_aggregate)
        }
        _ => false,
    }
}

pub(crate) fn aggregate_function(name: &str) -> Option<AggregateFunction> {
    match name.to_lowercase().as_str() {
        "count" => Some(AggregateFunction::Count),
        "sum" => Some(AggregateFunction::Sum),
        "avg" => Some(AggregateFunction::Avg),
        "min" => Some(AggregateFunction::Min),
        "max" => Some(AggregateFunction::Max),
        "collect" => Some(AggregateFunction::Collect),
        _ => None,
    }
}

fn as_aggregate_call(expr: &Expression) -> Result<AggregateCall> {
    let Expression::Function(f) = expr else {
        return Err(Error::Compile(
            "aggregate functions must be top-level RETURN items".into(),
        ));
    };
    let function = aggregate_function(&f.name).ok_or_else(|| {
        Error::Compile("aggregate functions must be top-level RETURN items".into())
    })?;

    match (&function, f.args.as_slice()) {
        (AggregateFunction::Count, [Expression::Star]) => Ok(AggregateCall {
            function: AggregateFunction::CountStar,
            distinct: f.distinct,
            arg: None,
        }),
        (_, [arg]) if *arg != Expression::Star => Ok(AggregateCall {
            function,
            distinct: f.distinct,
            arg: Some(arg.clone()),
        }),
        _ => Err(Error::Compile(format!(
            "{} takes exactly one argument",
            f.name
        ))),
    }
}

/// Rewrites an ORDER BY key against the projected columns: a key equal to a
/// returned expression or alias sorts on that column; otherwise (for plain
/// projections, which keep input bindings in scope during Sort) the key is
/// evaluated as written.
fn resolve_order_key(
    expr: &Expression,
    columns: &[(String, Expression)],
    aggregated: bool,
    bound: &BTreeSet<String>,
) -> Result<Expression> {
    for (name, col_expr) in columns {
        if expr == col_expr {
            return Ok(Expression::Variable(name.clone()));
        }
        if let Expression::Variable(v) = expr {
            if v == name {
                return Ok(expr.clone());
            }
        }
    }
    if aggregated {
        return Err(Error::Compile(
            "ORDER BY in an aggregating query must reference returned columns".into(),
        ));
    }
    validate_expression(expr, bound, false)?;
    Ok(expr.clone())
}

/// Validates variable references and function names. `allow_aggregates`
/// is true only for RETURN items.
fn validate_expression(
    expr: &Expression,
    bound: &BTreeSet<String>,
    allow_aggregates: bool,
) -> Result<()> {
    match expr {
        Expression::Literal(_) | Expression::Parameter(_) => Ok(()),
        Expression::Star => Err(Error::Compile("'*' is only valid inside COUNT(*)".into())),
        Expression::Variable(name) => {
            if bound.contains(name) {
                Ok(())
            } else {
                Err(Error::Compile(format!("unbound variable '{name}'")))
            }
        }
        Expression::Property(p) => {
            if bound.contains(&p.variable) {
                Ok(())
            } else {
                Err(Error::Compile(format!(
                    "unbound variable '{}'",
                    p.variable
                )))
            }
        }
        Expression::Binary(b) => {
            validate_expression(&b.left, bound, allow_aggregates)?;
            validate_expression(&b.right, bound, allow_aggregates)
        }
        Expression::Unary(u) => validate_expression(&u.operand, bound, allow_aggregates),
        Expression::List(items) => {
            for item in items {
                validate_expression(item, bound, allow_aggregates)?;
            }
            Ok(())
        }
        Expression::Map(entries) => {
            for (_, value) in entries {
                validate_expression(value, bound, allow_aggregates)?;
            }
            Ok(())
        }
        Expression::Case(c) => {
            if let Some(subject) = &c.subject {
                validate_expression(subject, bound, allow_aggregates)?;
            }
            for (when, then) in &c.whens {
                validate_expression(when, bound, allow_aggregates)?;
                validate_expression(then, bound, allow_aggregates)?;
            }
            if let Some(else_expr) = &c.else_expression {
                validate_expression(else_expr, bound, allow_aggregates)?;
            }
            Ok(())
        }
        Expression::Function(f) => {
            if aggregate_function(&f.name).is_some() {
                if !allow_aggregates {
                    return Err(Error::Compile(format!(
                        "aggregate function {} is only allowed in RETURN",
                        f.name
                    )));
                }
            } else if !evaluator::is_scalar_function(&f.name) {
                return Err(Error::Compile(format!("unknown function '{}'", f.name)));
            }
            for arg in &f.args {
                if *arg == Expression::Star {
                    if aggregate_function(&f.name) != Some(AggregateFunction::Count) {
                        return Err(Error::Compile(
                            "'*' is only valid inside COUNT(*)".into(),
                        ));
                    }
                    continue;
                }
                validate_expression(arg, bound, allow_aggregates)?;
            }
            Ok(())
        }
    }
}

fn validate_create_patterns(patterns: &[Pattern], bound: &BTreeSet<String>) -> Result<()> {
    for pattern in patterns {
        if pattern.variable.is_some() {
            return Err(Error::Compile("CREATE does not bind paths".into()));
        }
        for element in &pattern.elements {
            if let PathElement::Relationship(rel) = element {
                if rel.types.len() != 1 {
                    return Err(Error::Compile(
                        "CREATE requires exactly one relationship type".into(),
                    ));
                }
                if rel.direction == PatternDirection::Undirected {
                    return Err(Error::Compile(
                        "CREATE requires a directed relationship".into(),
                    ));
                }
                if rel.length.is_some() {
                    return Err(Error::Compile(
                        "CREATE cannot use variable-length relationships".into(),
                    ));
                }
            }
        }
    }
    let _ = bound;
    Ok(())
}

/// Display name for an unaliased RETURN item.
fn expression_name(expr: &Expression, index: usize) -> String {
    match expr {
        Expression::Variable(v) => v.clone(),
        Expression::Property(p) => format!("{}.{}", p.variable, p.property),
        Expression::Function(f) => {
            if f.args == vec![Expression::Star] {
                format!("{}(*)", f.name)
            } else {
                let args: Vec<String> = f
                    .args
                    .iter()
                    .enumerate()
                    .map(|(i, a)| expression_name(a, i))
                    .collect();
                format!("{}({})", f.name, args.join(", "))
            }
        }
        Expression::Literal(Literal::Integer(n)) => n.to_string(),
        Expression::Literal(Literal::Float(f)) => f.to_string(),
        Expression::Literal(Literal::String(s)) => format!("'{s}'"),
        Expression::Literal(Literal::Boolean(b)) => b.to_string(),
        Expression::Literal(Literal::Null) => "NULL".to_string(),
        Expression::Parameter(name) => format!("${name}"),
        _ => format!("column{index}"),
    }
}

/// Indented tree rendering for EXPLAIN.
pub fn render_plan(plan: &Plan) -> String {
    fn go(out: &mut String, plan: &Plan, depth: usize) {
        let pad = "  ".repeat(depth);
        match plan {
            Plan::SingleRow => {
                let _ = writeln!(out, "{pad}SingleRow");
            }
            Plan::Argument => {
                let _ = writeln!(out, "{pad}Argument");
            }
            Plan::ScanLabel { alias, labels, .. } => {
                let _ = writeln!(out, "{pad}ScanLabel(alias={alias}, labels={labels:?})");
            }
            Plan::IndexSeek {
                alias,
                label,
                property,
                fallback,
                ..
            } => {
                let _ = writeln!(
                    out,
                    "{pad}IndexSeek(alias={alias}, label={label}, property={property})"
                );
                let _ = writeln!(out, "{pad}  fallback:");
                go(out, fallback, depth + 2);
            }
            Plan::NodeFilter { input, alias, labels, .. } => {
                let _ = writeln!(out, "{pad}NodeFilter(alias={alias}, labels={labels:?})");
                go(out, input, depth + 1);
            }
            Plan::Expand { input, spec } => {
                let _ = writeln!(
                    out,
                    "{pad}Expand({} -{:?}-> {}, types={:?})",
                    spec.src, spec.direction, spec.dst, spec.types
                );
                go(out, input, depth + 1);
            }
            Plan::OptionalExpand { input, spec } => {
                let _ = writeln!(
                    out,
                    "{pad}OptionalExpand({} -{:?}-> {}, types={:?})",
                    spec.src, spec.direction, spec.dst, spec.types
                );
                go(out, input, depth + 1);
            }
            Plan::VarLengthExpand {
                input,
                spec,
                min,
                max,
            } => {
                let _ = writeln!(
                    out,
                    "{pad}VarLengthExpand({} -{:?}-> {}, {}..{})",
                    spec.src,
                    spec.direction,
                    spec.dst,
                    min,
                    max.map(|m| m.to_string()).unwrap_or_else(|| "*".into())
                );
                go(out, input, depth + 1);
            }
            Plan::Optional { input, aliases } => {
                let _ = writeln!(out, "{pad}Optional(aliases={aliases:?})");
                go(out, input, depth + 1);
            }
            Plan::OptionalApply {
                input,
                right,
                null_aliases,
            } => {
                let _ = writeln!(out, "{pad}OptionalApply(null_aliases={null_aliases:?})");
                go(out, input, depth + 1);
                let _ = writeln!(out, "{pad}  right:");
                go(out, right, depth + 2);
            }
            Plan::CartesianProduct { left, right } => {
                let _ = writeln!(out, "{pad}CartesianProduct");
                go(out, left, depth + 1);
                go(out, right, depth + 1);
            }
            Plan::Filter { input, .. } => {
                let _ = writeln!(out, "{pad}Filter");
                go(out, input, depth + 1);
            }
            Plan::Project { input, columns, extend } => {
                let names: Vec<&str> = columns.iter().map(|(n, _)| n.as_str()).collect();
                let _ = writeln!(out, "{pad}Project(columns={names:?}, extend={extend})");
                go(out, input, depth + 1);
            }
            Plan::Aggregate {
                input,
                group_by,
                aggregates,
            } => {
                let keys: Vec<&str> = group_by.iter().map(|(n, _)| n.as_str()).collect();
                let aggs: Vec<&str> = aggregates.iter().map(|(n, _)| n.as_str()).collect();
                let _ = writeln!(out, "{pad}Aggregate(group_by={keys:?}, aggregates={aggs:?})");
                go(out, input, depth + 1);
            }
            Plan::Sort { input, keys } => {
                let dirs: Vec<String> = keys.iter().map(|(_, d)| format!("{d:?}")).collect();
                let _ = writeln!(out, "{pad}Sort(keys={dirs:?})");
                go(out, input, depth + 1);
            }
            Plan::Skip { input, count } => {
                let _ = writeln!(out, "{pad}Skip({count})");
                go(out, input, depth + 1);
            }
            Plan::Limit { input, count } => {
                let _ = writeln!(out, "{pad}Limit({count})");
                go(out, input, depth + 1);
            }
            Plan::Distinct { input } => {
                let _ = writeln!(out, "{pad}Distinct");
                go(out, input, depth + 1);
            }
            Plan::Union {
                left, right, all, ..
            } => {
                let _ = writeln!(out, "{pad}Union(all={all})");
                go(out, left, depth + 1);
                go(out, right, depth + 1);
            }
            Plan::Create { input, patterns } => {
                let _ = writeln!(out, "{pad}Create({} patterns)", patterns.len());
                go(out, input, depth + 1);
            }
            Plan::Delete { input, detach, .. } => {
                let _ = writeln!(out, "{pad}Delete(detach={detach})");
                go(out, input, depth + 1);
            }
            Plan::SetProperties { input, items } => {
                let _ = writeln!(out, "{pad}SetProperties({} items)", items.len());
                go(out, input, depth + 1);
            }
        }
    }

    let mut out = String::new();
    go(&mut out, plan, 0);
    out.trim_end().to_string()
}
