//! The `Store` contract consumed by the pipeline and the watcher.
//!
//! Every create is idempotent on the row's natural key:
//!
//! | table         | natural key                  |
//! |---------------|------------------------------|
//! | `block`       | `(block_num, block_hash)`    |
//! | `transaction` | `tx_hash`                    |
//! | `log`         | `(transaction_id, index)`    |
//!
//! Implementations must be safe to call from several tasks at once: the
//! pipeline writes the transactions of one block concurrently.

use alloy_primitives::B256;
use async_trait::async_trait;

use crate::error::WatchError;
use crate::types::{
    BlockHeader, BlockId, LogRecord, Stability, StoreCounts, StoredBlock, StoredLog,
    StoredTransaction, TransactionId, TransactionRecord,
};

#[async_trait]
pub trait Store: Send + Sync {
    /// Create the block row, or return the id of the existing row for the same height + hash.
    async fn insert_block(
        &self,
        header: &BlockHeader,
        stability: Stability,
    ) -> Result<BlockId, WatchError>;

    /// Create the transaction row, or return the id of the existing row for the same hash.
    async fn insert_transaction(
        &self,
        block_id: BlockId,
        tx: &TransactionRecord,
    ) -> Result<TransactionId, WatchError>;

    /// Bulk-create logs for one transaction. Already-present indexes are skipped.
    ///
    /// Returns the number of rows actually created.
    async fn insert_logs(
        &self,
        transaction_id: TransactionId,
        logs: &[LogRecord],
    ) -> Result<u64, WatchError>;

    /// Set the stability flag of every listed block whose flag differs.
    ///
    /// Returns the number of rows changed.
    async fn set_stability(&self, hashes: &[B256], stability: Stability)
        -> Result<u64, WatchError>;

    /// Delete the listed blocks together with their transactions and logs.
    ///
    /// Returns the number of block rows deleted.
    async fn delete_blocks(&self, hashes: &[B256]) -> Result<u64, WatchError>;

    /// The highest stored block, used to resume a session.
    async fn latest_block(&self) -> Result<Option<StoredBlock>, WatchError>;

    async fn block_by_hash(&self, hash: B256) -> Result<Option<StoredBlock>, WatchError>;

    /// All stored blocks at `number` (more than one only while a fork is unresolved).
    async fn blocks_at(&self, number: u64) -> Result<Vec<StoredBlock>, WatchError>;

    async fn transactions_for_block(
        &self,
        block_id: BlockId,
    ) -> Result<Vec<StoredTransaction>, WatchError>;

    async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<StoredTransaction>, WatchError>;

    async fn logs_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StoredLog>, WatchError>;

    async fn counts(&self) -> Result<StoreCounts, WatchError>;
}
