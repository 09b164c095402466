//! Content-addressed block store.
//!
//! Every committed entity state is encoded to a canonical byte form and
//! stored under the SHA-256 hash of those bytes. Writes never mutate a
//! block: a new state produces a new block, and the per-entity head pointer
//! moves to the new address. Prior blocks stay in the store, so the full
//! version history of an entity remains addressable.

use crate::{Error, Result};
use plexusdb_api::{NodeId, NodeRecord, RelId, RelRecord};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Address of an immutable block: the SHA-256 digest of its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockAddress(pub [u8; 32]);

impl BlockAddress {
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        BlockAddress(hasher.finalize().into())
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct BlockStore {
    blocks: HashMap<BlockAddress, Arc<[u8]>>,
    node_heads: HashMap<NodeId, BlockAddress>,
    rel_heads: HashMap<RelId, BlockAddress>,
    node_history: HashMap<NodeId, Vec<BlockAddress>>,
    rel_history: HashMap<RelId, Vec<BlockAddress>>,
}

impl BlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a node state, returning the address of its block.
    ///
    /// Identical states hash to the same address and share one block.
    pub fn record_node(&mut self, record: &NodeRecord) -> Result<BlockAddress> {
        let bytes = encode(record)?;
        let addr = self.insert(bytes);
        self.node_heads.insert(record.id, addr);
        self.node_history.entry(record.id).or_default().push(addr);
        Ok(addr)
    }

    pub fn record_rel(&mut self, record: &RelRecord) -> Result<BlockAddress> {
        let bytes = encode(record)?;
        let addr = self.insert(bytes);
        self.rel_heads.insert(record.id, addr);
        self.rel_history.entry(record.id).or_default().push(addr);
        Ok(addr)
    }

    /// Drops the head pointer of a deleted node. History blocks remain.
    pub fn retire_node(&mut self, id: NodeId) {
        self.node_heads.remove(&id);
    }

    pub fn retire_rel(&mut self, id: RelId) {
        self.rel_heads.remove(&id);
    }

    pub fn node_head(&self, id: NodeId) -> Option<BlockAddress> {
        self.node_heads.get(&id).copied()
    }

    pub fn rel_head(&self, id: RelId) -> Option<BlockAddress> {
        self.rel_heads.get(&id).copied()
    }

    /// All block addresses ever recorded for a node, oldest first.
    pub fn node_versions(&self, id: NodeId) -> &[BlockAddress] {
        self.node_history.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn rel_versions(&self, id: RelId) -> &[BlockAddress] {
        self.rel_history.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decodes the node state stored at `addr`, verifying content integrity.
    pub fn node_at(&self, addr: BlockAddress) -> Result<NodeRecord> {
        let bytes = self.verified(addr)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Corrupted(format!("undecodable node block {addr}: {e}")))
    }

    pub fn rel_at(&self, addr: BlockAddress) -> Result<RelRecord> {
        let bytes = self.verified(addr)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Corrupted(format!("undecodable relationship block {addr}: {e}")))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn insert(&mut self, bytes: Vec<u8>) -> BlockAddress {
        let addr = BlockAddress::of(&bytes);
        self.blocks.entry(addr).or_insert_with(|| bytes.into());
        addr
    }

    fn verified(&self, addr: BlockAddress) -> Result<Arc<[u8]>> {
        let bytes = self
            .blocks
            .get(&addr)
            .cloned()
            .ok_or_else(|| Error::Corrupted(format!("missing block {addr}")))?;
        if BlockAddress::of(&bytes) != addr {
            return Err(Error::Corrupted(format!("block {addr} fails content check")));
        }
        Ok(bytes)
    }
}

/// Canonical encoding: JSON over record structs whose maps are `BTreeMap`,
/// so identical states always serialize to identical bytes.
fn encode<T: serde::Serialize>(record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| Error::Corrupted(format!("unencodable record: {e}")))
}
