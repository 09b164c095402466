pub mod ast;
mod error;
pub mod evaluator;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod plan;

pub use crate::error::{Error, Result};
pub use crate::executor::{
    NodeValue, Params, PathValue, RelationshipValue, Row, Value, WriteSummary, WriteableGraph,
    execute_plan, execute_write,
};
pub use crate::plan::{CompiledQuery, Plan, QueryKind, compile};

use plexusdb_api::GraphView;

/// A parsed and compiled query, ready for repeated execution.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    compiled: CompiledQuery,
    explain: Option<String>,
}

impl PreparedQuery {
    pub fn kind(&self) -> QueryKind {
        self.compiled.kind
    }

    pub fn columns(&self) -> &[String] {
        &self.compiled.columns
    }

    pub fn is_explain(&self) -> bool {
        self.explain.is_some()
    }

    /// Streams result rows for a read query.
    pub fn execute_streaming<'a, V: GraphView>(
        &'a self,
        view: &'a V,
        params: &'a Params,
    ) -> Box<dyn Iterator<Item = Result<Row>> + 'a> {
        if let Some(text) = &self.explain {
            let row = Row::default().with("plan", Value::String(text.clone()));
            return Box::new(std::iter::once(Ok(row)));
        }
        execute_plan(view, &self.compiled.plan, params, None)
    }

    /// Applies a write query through `writer`, reading through `view`.
    pub fn execute_write<V: GraphView, W: WriteableGraph>(
        &self,
        view: &V,
        writer: &mut W,
        params: &Params,
    ) -> Result<WriteSummary> {
        if self.explain.is_some() {
            return Err(Error::Compile(
                "EXPLAIN cannot be executed as a write query".into(),
            ));
        }
        execute_write(&self.compiled.plan, view, writer, params)
    }
}

/// Parses a query into its AST without compiling it.
pub fn parse(text: &str) -> Result<ast::Query> {
    parser::Parser::parse(text)
}

/// Parses and compiles a query. An `EXPLAIN` prefix yields a prepared query
/// that renders the compiled plan instead of executing.
pub fn prepare(text: &str) -> Result<PreparedQuery> {
    if let Some(inner) = strip_explain_prefix(text) {
        if inner.is_empty() {
            return Err(Error::Compile("EXPLAIN requires a query".into()));
        }
        let query = parser::Parser::parse(inner)?;
        let compiled = compile(&query)?;
        let explain = Some(plan::render_plan(&compiled.plan));
        return Ok(PreparedQuery { compiled, explain });
    }

    let query = parser::Parser::parse(text)?;
    let compiled = compile(&query)?;
    log::trace!(
        "compiled {:?} query with columns {:?}",
        compiled.kind,
        compiled.columns
    );
    Ok(PreparedQuery {
        compiled,
        explain: None,
    })
}

fn strip_explain_prefix(input: &str) -> Option<&str> {
    let trimmed = input.trim_start();
    if trimmed.len() < "EXPLAIN".len() {
        return None;
    }
    let (head, tail) = trimmed.split_at("EXPLAIN".len());
    if !head.eq_ignore_ascii_case("EXPLAIN") {
        return None;
    }
    if let Some(next) = tail.chars().next() {
        if !next.is_whitespace() {
            return None;
        }
    }
    Some(tail.trim_start())
}
