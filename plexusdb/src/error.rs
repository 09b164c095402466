use std::fmt;

/// The error type for PlexusDB operations.
#[derive(Debug)]
pub enum Error {
    /// IO error interacting with the filesystem.
    Io(std::io::Error),
    /// Error from the storage or transaction layer.
    Storage(plexusdb_storage::Error),
    /// Error from the query engine (syntax, compile, runtime type).
    Query(plexusdb_query::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Storage(e) => write!(f, "storage error: {e}"),
            Error::Query(e) => write!(f, "query error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Storage(e) => Some(e),
            Error::Query(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<plexusdb_storage::Error> for Error {
    fn from(e: plexusdb_storage::Error) -> Self {
        match e {
            plexusdb_storage::Error::Io(e) => Error::Io(e),
            other => Error::Storage(other),
        }
    }
}

impl From<plexusdb_query::Error> for Error {
    fn from(e: plexusdb_query::Error) -> Self {
        match e {
            // Storage failures keep their own taxonomy even when they
            // surface through the query engine.
            plexusdb_query::Error::Storage(inner) => Error::from(inner),
            other => Error::Query(other),
        }
    }
}

/// A specialized Result type for PlexusDB operations.
pub type Result<T> = std::result::Result<T, Error>;
