//! Error taxonomy for the query engine.
//!
//! Syntax and compile errors surface before execution and are never
//! retried. Runtime type errors abort the current query only; the caller
//! rolls back any writes the failed statement buffered. Conflicts abort the
//! transaction and are the one class where caller retry is the documented
//! recovery path.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error at line {line}, column {column}: expected {expected}, found {found}")]
    Syntax {
        line: usize,
        column: usize,
        expected: String,
        found: String,
    },

    #[error("compile error: {0}")]
    Compile(String),

    #[error("type error: {0}")]
    RuntimeType(String),

    #[error("missing parameter ${0}")]
    MissingParameter(String),

    #[error("query deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Storage(#[from] plexusdb_storage::Error),
}

impl Error {
    pub(crate) fn syntax(
        line: usize,
        column: usize,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Error::Syntax {
            line,
            column,
            expected: expected.into(),
            found: found.into(),
        }
    }
}
