use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal record too large: {0}")]
    WalRecordTooLarge(u32),

    #[error("wal checksum mismatch at offset {offset}")]
    WalChecksumMismatch { offset: u64 },

    #[error("wal protocol error: {0}")]
    WalProtocol(&'static str),

    #[error("storage corrupted: {0}")]
    Corrupted(String),

    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("unknown node {0}")]
    UnknownNode(u64),

    #[error("unknown relationship {0}")]
    UnknownRelationship(u64),

    #[error("node {0} still has incident relationships; delete them first or use detach delete")]
    NodeHasRelationships(u64),

    #[error("constraint '{constraint}' violated by {entity}: {reason}")]
    ConstraintViolation {
        constraint: String,
        entity: String,
        reason: String,
    },

    #[error("transaction conflict: {0}")]
    Conflict(String),

    #[error("transaction is not active")]
    TransactionNotActive,

    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    #[error("index '{0}' already exists")]
    IndexExists(String),

    #[error("unknown index '{0}'")]
    UnknownIndex(String),

    #[error("constraint '{0}' already exists")]
    ConstraintExists(String),

    #[error("predicate '{0}' is not registered")]
    UnregisteredPredicate(String),

    #[error("store is poisoned after a fatal error and refuses further transactions")]
    Poisoned,
}
