//! Write-ahead log.
//!
//! Append-only record stream framed as `[len: u32][crc32: u32][body]`.
//! A transaction's records are bracketed by `Begin`/`Commit` markers; the
//! commit marker is what makes the transaction durable. Replay applies only
//! bracketed transactions, ignores a trailing partial record (torn write at
//! crash time), and treats a checksum mismatch on an interior record as
//! corruption.

use crate::constraint::ConstraintDecl;
use crate::index::IndexDef;
use crate::{Error, Result};
use crc32fast::Hasher;
use plexusdb_api::{NodeId, NodeRecord, RelId, RelRecord};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    Begin { txid: u64 },
    Commit { txid: u64 },
    CreateNode { node: NodeRecord },
    UpdateNode { node: NodeRecord },
    DeleteNode { id: NodeId },
    CreateRel { rel: RelRecord },
    UpdateRel { rel: RelRecord },
    DeleteRel { id: RelId },
    DeclareIndex { def: IndexDef },
    DeclareConstraint { decl: ConstraintDecl },
}

impl WalRecord {
    fn record_type(&self) -> u8 {
        match self {
            WalRecord::Begin { .. } => 1,
            WalRecord::Commit { .. } => 2,
            WalRecord::CreateNode { .. } => 3,
            WalRecord::UpdateNode { .. } => 4,
            WalRecord::DeleteNode { .. } => 5,
            WalRecord::CreateRel { .. } => 6,
            WalRecord::UpdateRel { .. } => 7,
            WalRecord::DeleteRel { .. } => 8,
            WalRecord::DeclareIndex { .. } => 9,
            WalRecord::DeclareConstraint { .. } => 10,
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.record_type()];
        serde_json::to_writer(&mut out, self)
            .map_err(|e| Error::Corrupted(format!("unencodable wal record: {e}")))?;
        Ok(out)
    }

    fn decode_body(body: &[u8]) -> Result<Self> {
        if body.len() < 2 {
            return Err(Error::WalProtocol("record body too short"));
        }
        let record: WalRecord = serde_json::from_slice(&body[1..])
            .map_err(|_| Error::WalProtocol("undecodable record payload"))?;
        if record.record_type() != body[0] {
            return Err(Error::WalProtocol("record type tag mismatch"));
        }
        Ok(record)
    }

    /// True for records that only make sense between Begin and Commit.
    fn is_op(&self) -> bool {
        !matches!(self, WalRecord::Begin { .. } | WalRecord::Commit { .. })
    }
}

/// One fully committed transaction recovered from the log.
#[derive(Debug)]
pub struct CommittedTx {
    pub txid: u64,
    pub ops: Vec<WalRecord>,
}

#[derive(Debug)]
pub struct Wal {
    path: PathBuf,
    file: File,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        let body = record.encode_body()?;
        let len = u32::try_from(body.len()).map_err(|_| Error::WalRecordTooLarge(u32::MAX))?;
        if len > MAX_RECORD_LEN {
            return Err(Error::WalRecordTooLarge(len));
        }
        let crc = crc32(&body);

        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&body)?;
        self.file.flush()?;
        Ok(())
    }

    pub fn fsync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Reads the whole log and returns the committed transactions in commit
    /// order. Records of a transaction without a commit marker are dropped;
    /// a truncated trailing record ends the scan cleanly.
    pub fn replay_committed(&self) -> Result<Vec<CommittedTx>> {
        let mut reader = WalReader::open(&self.path)?;
        let mut committed = Vec::new();

        let mut current_txid: Option<u64> = None;
        let mut pending: Vec<WalRecord> = Vec::new();

        while let Some((_offset, record)) = reader.next_record()? {
            match record {
                WalRecord::Begin { txid } => {
                    if current_txid.is_some() {
                        return Err(Error::WalProtocol("nested Begin"));
                    }
                    current_txid = Some(txid);
                    pending.clear();
                }
                WalRecord::Commit { txid } => {
                    if current_txid != Some(txid) {
                        return Err(Error::WalProtocol("Commit without matching Begin"));
                    }
                    committed.push(CommittedTx {
                        txid,
                        ops: std::mem::take(&mut pending),
                    });
                    current_txid = None;
                }
                op if op.is_op() => {
                    if current_txid.is_none() {
                        return Err(Error::WalProtocol("op outside transaction"));
                    }
                    pending.push(op);
                }
                _ => unreachable!(),
            }
        }

        if current_txid.is_some() {
            log::warn!(
                "wal {}: discarding uncommitted trailing transaction",
                self.path.display()
            );
        }
        Ok(committed)
    }
}

struct WalReader {
    file: File,
    offset: u64,
}

impl WalReader {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self { file, offset: 0 })
    }

    fn next_record(&mut self) -> Result<Option<(u64, WalRecord)>> {
        let record_offset = self.offset;

        let Some(len) = self.try_read_u32()? else {
            return Ok(None);
        };
        if len > MAX_RECORD_LEN {
            return Err(Error::WalRecordTooLarge(len));
        }
        let Some(crc) = self.try_read_u32()? else {
            return Ok(None);
        };

        let mut body = vec![0u8; len as usize];
        if let Err(e) = self.file.read_exact(&mut body) {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Ok(None);
            }
            return Err(Error::Io(e));
        }

        if crc32(&body) != crc {
            return Err(Error::WalChecksumMismatch {
                offset: record_offset,
            });
        }

        self.offset += 4 + 4 + len as u64;
        Ok(Some((record_offset, WalRecord::decode_body(&body)?)))
    }

    fn try_read_u32(&mut self) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        match self.file.read_exact(&mut buf) {
            Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn sample_node(id: NodeId) -> NodeRecord {
        NodeRecord {
            id,
            labels: vec!["Person".to_string()],
            properties: BTreeMap::new(),
        }
    }

    #[test]
    fn replay_returns_only_committed_txs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&WalRecord::Begin { txid: 1 }).unwrap();
            wal.append(&WalRecord::CreateNode {
                node: sample_node(1),
            })
            .unwrap();
            wal.append(&WalRecord::Commit { txid: 1 }).unwrap();

            wal.append(&WalRecord::Begin { txid: 2 }).unwrap();
            wal.append(&WalRecord::CreateNode {
                node: sample_node(2),
            })
            .unwrap();
            // no commit marker for txid 2
            wal.fsync().unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        let committed = wal.replay_committed().unwrap();
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].txid, 1);
        assert_eq!(committed[0].ops.len(), 1);
    }

    #[test]
    fn replay_ignores_trailing_partial_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&WalRecord::Begin { txid: 1 }).unwrap();
            wal.append(&WalRecord::CreateNode {
                node: sample_node(1),
            })
            .unwrap();
            wal.append(&WalRecord::Commit { txid: 1 }).unwrap();

            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x09, 0x00]).unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        let committed = wal.replay_committed().unwrap();
        assert_eq!(committed.len(), 1);
    }

    #[test]
    fn corrupted_interior_record_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&WalRecord::Begin { txid: 1 }).unwrap();
            wal.append(&WalRecord::Commit { txid: 1 }).unwrap();
        }

        // Flip a byte inside the first record body.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let wal = Wal::open(&path).unwrap();
        assert!(matches!(
            wal.replay_committed(),
            Err(Error::WalChecksumMismatch { .. })
        ));
    }

    #[test]
    fn op_outside_transaction_is_protocol_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&WalRecord::DeleteNode { id: 1 }).unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        assert!(matches!(
            wal.replay_committed(),
            Err(Error::WalProtocol(_))
        ));
    }
}
