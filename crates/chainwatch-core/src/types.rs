//! Shared types for the ingestion pipeline and the store.

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// Row id of a stored block.
pub type BlockId = i64;
/// Row id of a stored transaction.
pub type TransactionId = i64;

// ─── ForkFingerprint ──────────────────────────────────────────────────────────

/// A coarse per-block value used as a cheap divergence signal.
///
/// Two blocks on different branches may share a fingerprint; a match is never
/// proof of a shared branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForkFingerprint(pub u64);

impl ForkFingerprint {
    /// Derive a fingerprint from arbitrary bytes (e.g. the block producer's address).
    pub fn of(bytes: impl AsRef<[u8]>) -> Self {
        let digest = keccak256(bytes.as_ref());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(head))
    }
}

impl std::fmt::Display for ForkFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ─── BlockHeader ──────────────────────────────────────────────────────────────

/// The part of a block the tracker reasons about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Fork fingerprint. `None` when the header was rebuilt from storage.
    pub fingerprint: Option<ForkFingerprint>,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── Stability ────────────────────────────────────────────────────────────────

/// Whether a stored block may still be retracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stability {
    /// Inside an open confirmation window; may be deleted by a reorg.
    Provisional,
    /// Confirmed.
    Stable,
}

impl Stability {
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Stable)
    }
}

impl From<bool> for Stability {
    fn from(is_stable: bool) -> Self {
        if is_stable {
            Self::Stable
        } else {
            Self::Provisional
        }
    }
}

impl std::fmt::Display for Stability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisional => write!(f, "provisional"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

// ─── Rows ─────────────────────────────────────────────────────────────────────

/// A block row as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlock {
    pub id: BlockId,
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: u64,
    pub stability: Stability,
}

impl StoredBlock {
    /// Rebuild a tracker header from this row (the fingerprint is not persisted).
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
            fingerprint: None,
        }
    }
}

/// A normalized transaction, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub hash: B256,
    /// Sender, recovered from the signature.
    pub from: Address,
    /// Recipient; `None` for contract creation.
    pub to: Option<Address>,
    pub nonce: u64,
    pub data: Bytes,
    /// Transferred value in wei. Exceeds 64 bits, never a float.
    pub value: U256,
}

/// A transaction row as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub id: TransactionId,
    pub block_id: BlockId,
    pub record: TransactionRecord,
}

/// A decoded log entry, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Position within the transaction's receipt.
    pub index: u64,
    pub data: Bytes,
}

/// A log row as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredLog {
    pub id: i64,
    pub transaction_id: TransactionId,
    pub record: LogRecord,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub blocks: u64,
    pub transactions: u64,
    pub logs: u64,
}

// ─── BlockRecord ──────────────────────────────────────────────────────────────

/// Outcome of ingesting one block, reported only after every child write joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub block_id: BlockId,
    pub header: BlockHeader,
    pub transactions: usize,
    pub logs: usize,
    /// Malformed log entries that were skipped.
    pub skipped_logs: usize,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn header(number: u64, hash: u8, parent: u8) -> BlockHeader {
        BlockHeader {
            number,
            hash: B256::repeat_byte(hash),
            parent_hash: B256::repeat_byte(parent),
            timestamp: number * 12,
            fingerprint: None,
        }
    }

    #[test]
    fn block_extends_parent() {
        let parent = header(100, 0xaa, 0x00);
        let child = header(101, 0xbb, 0xaa);
        assert!(child.extends(&parent));
        assert!(!parent.extends(&child));
    }

    #[test]
    fn block_extends_false_on_gap() {
        let a = header(100, 0xaa, 0x00);
        let b = header(102, 0xcc, 0xaa); // gap
        assert!(!b.extends(&a));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(ForkFingerprint::of(b"S1"), ForkFingerprint::of(b"S1"));
        assert_ne!(ForkFingerprint::of(b"S1"), ForkFingerprint::of(b"S2"));
    }

    #[test]
    fn stability_from_flag() {
        assert_eq!(Stability::from(true), Stability::Stable);
        assert_eq!(Stability::from(false), Stability::Provisional);
        assert!(!Stability::Provisional.is_stable());
    }
}
