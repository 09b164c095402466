pub mod block;
pub mod catalog;
pub mod constraint;
mod error;
pub mod index;
pub mod memtable;
pub mod snapshot;
pub mod store;
pub mod txn;
pub mod wal;

pub use crate::error::{Error, Result};
pub use crate::snapshot::Snapshot;
pub use crate::store::Store;
pub use crate::txn::{IsolationLevel, Savepoint, Transaction, TxView};

pub const FORMAT_VERSION: u32 = 1;
