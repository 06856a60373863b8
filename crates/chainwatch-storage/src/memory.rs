//! In-memory store.
//!
//! Keeps blocks, transactions and logs in RAM behind one mutex. Useful for
//! tests and short-lived sessions that don't need persistence.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use alloy_primitives::B256;
use async_trait::async_trait;

use chainwatch_core::error::WatchError;
use chainwatch_core::store::Store;
use chainwatch_core::types::{
    BlockHeader, BlockId, LogRecord, Stability, StoreCounts, StoredBlock, StoredLog,
    StoredTransaction, TransactionId, TransactionRecord,
};

#[derive(Default)]
struct Tables {
    blocks: BTreeMap<BlockId, StoredBlock>,
    transactions: BTreeMap<TransactionId, StoredTransaction>,
    logs: BTreeMap<i64, StoredLog>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`Store`]. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All stored blocks ordered by height, then insertion.
    pub fn blocks(&self) -> Vec<StoredBlock> {
        let mut blocks: Vec<_> = self.tables().blocks.values().cloned().collect();
        blocks.sort_by_key(|b| (b.number, b.id));
        blocks
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_block(
        &self,
        header: &BlockHeader,
        stability: Stability,
    ) -> Result<BlockId, WatchError> {
        let mut t = self.tables();
        if let Some(existing) = t
            .blocks
            .values()
            .find(|b| b.number == header.number && b.hash == header.hash)
        {
            return Ok(existing.id);
        }
        let id = t.next_id();
        t.blocks.insert(
            id,
            StoredBlock {
                id,
                number: header.number,
                hash: header.hash,
                parent_hash: header.parent_hash,
                timestamp: header.timestamp,
                stability,
            },
        );
        Ok(id)
    }

    async fn insert_transaction(
        &self,
        block_id: BlockId,
        tx: &TransactionRecord,
    ) -> Result<TransactionId, WatchError> {
        let mut t = self.tables();
        if !t.blocks.contains_key(&block_id) {
            return Err(WatchError::Persistence(format!("block {block_id} does not exist")));
        }
        let existing = t
            .transactions
            .values()
            .find(|s| s.record.hash == tx.hash)
            .map(|s| (s.id, s.block_id));
        if let Some((id, previous_block)) = existing {
            // The same transaction included by a competing block follows the latest one.
            // Its logs came from the other block's receipt.
            if previous_block != block_id {
                t.logs.retain(|_, log| log.transaction_id != id);
                if let Some(moved) = t.transactions.get_mut(&id) {
                    moved.block_id = block_id;
                }
            }
            return Ok(id);
        }
        let id = t.next_id();
        t.transactions.insert(
            id,
            StoredTransaction {
                id,
                block_id,
                record: tx.clone(),
            },
        );
        Ok(id)
    }

    async fn insert_logs(
        &self,
        transaction_id: TransactionId,
        logs: &[LogRecord],
    ) -> Result<u64, WatchError> {
        let mut t = self.tables();
        if !t.transactions.contains_key(&transaction_id) {
            return Err(WatchError::Persistence(format!(
                "transaction {transaction_id} does not exist"
            )));
        }
        let mut created = 0;
        for log in logs {
            let present = t
                .logs
                .values()
                .any(|l| l.transaction_id == transaction_id && l.record.index == log.index);
            if present {
                continue;
            }
            let id = t.next_id();
            t.logs.insert(
                id,
                StoredLog {
                    id,
                    transaction_id,
                    record: log.clone(),
                },
            );
            created += 1;
        }
        Ok(created)
    }

    async fn set_stability(
        &self,
        hashes: &[B256],
        stability: Stability,
    ) -> Result<u64, WatchError> {
        let mut t = self.tables();
        let mut changed = 0;
        for block in t.blocks.values_mut() {
            if hashes.contains(&block.hash) && block.stability != stability {
                block.stability = stability;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_blocks(&self, hashes: &[B256]) -> Result<u64, WatchError> {
        let mut t = self.tables();
        let doomed: Vec<BlockId> = t
            .blocks
            .values()
            .filter(|b| hashes.contains(&b.hash))
            .map(|b| b.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }

        let doomed_txs: Vec<TransactionId> = t
            .transactions
            .values()
            .filter(|tx| doomed.contains(&tx.block_id))
            .map(|tx| tx.id)
            .collect();
        t.logs.retain(|_, log| !doomed_txs.contains(&log.transaction_id));
        t.transactions.retain(|id, _| !doomed_txs.contains(id));
        t.blocks.retain(|id, _| !doomed.contains(id));

        tracing::debug!(blocks = doomed.len(), transactions = doomed_txs.len(), "deleted blocks");
        Ok(doomed.len() as u64)
    }

    async fn latest_block(&self) -> Result<Option<StoredBlock>, WatchError> {
        Ok(self
            .tables()
            .blocks
            .values()
            .max_by_key(|b| (b.number, b.id))
            .cloned())
    }

    async fn block_by_hash(&self, hash: B256) -> Result<Option<StoredBlock>, WatchError> {
        Ok(self.tables().blocks.values().find(|b| b.hash == hash).cloned())
    }

    async fn blocks_at(&self, number: u64) -> Result<Vec<StoredBlock>, WatchError> {
        Ok(self
            .tables()
            .blocks
            .values()
            .filter(|b| b.number == number)
            .cloned()
            .collect())
    }

    async fn transactions_for_block(
        &self,
        block_id: BlockId,
    ) -> Result<Vec<StoredTransaction>, WatchError> {
        Ok(self
            .tables()
            .transactions
            .values()
            .filter(|tx| tx.block_id == block_id)
            .cloned()
            .collect())
    }

    async fn transaction_by_hash(
        &self,
        hash: B256,
    ) -> Result<Option<StoredTransaction>, WatchError> {
        Ok(self
            .tables()
            .transactions
            .values()
            .find(|tx| tx.record.hash == hash)
            .cloned())
    }

    async fn logs_for_transaction(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<StoredLog>, WatchError> {
        let mut logs: Vec<_> = self
            .tables()
            .logs
            .values()
            .filter(|l| l.transaction_id == transaction_id)
            .cloned()
            .collect();
        logs.sort_by_key(|l| l.record.index);
        Ok(logs)
    }

    async fn counts(&self) -> Result<StoreCounts, WatchError> {
        let t = self.tables();
        Ok(StoreCounts {
            blocks: t.blocks.len() as u64,
            transactions: t.transactions.len() as u64,
            logs: t.logs.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes, U256};

    fn header(number: u64, hash: u8, parent: u8) -> BlockHeader {
        BlockHeader {
            number,
            hash: B256::repeat_byte(hash),
            parent_hash: B256::repeat_byte(parent),
            timestamp: 1_700_000_000 + number,
            fingerprint: None,
        }
    }

    fn tx(hash: u8, to: Option<Address>, value: U256) -> TransactionRecord {
        TransactionRecord {
            hash: B256::repeat_byte(hash),
            from: Address::repeat_byte(0x11),
            to,
            nonce: 3,
            data: Bytes::from(vec![1, 2, 3]),
            value,
        }
    }

    fn log(index: u64) -> LogRecord {
        LogRecord {
            index,
            data: Bytes::from(vec![index as u8]),
        }
    }

    #[tokio::test]
    async fn inserts_are_idempotent() {
        let store = InMemoryStore::new();
        let b1 = store.insert_block(&header(100, 0xaa, 0x99), Stability::Provisional).await.unwrap();
        let b2 = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        assert_eq!(b1, b2);
        // the existing row keeps its flag
        assert_eq!(store.blocks()[0].stability, Stability::Provisional);

        let t1 = store.insert_transaction(b1, &tx(0x01, None, U256::ZERO)).await.unwrap();
        let t2 = store.insert_transaction(b1, &tx(0x01, None, U256::ZERO)).await.unwrap();
        assert_eq!(t1, t2);

        assert_eq!(store.insert_logs(t1, &[log(0), log(1)]).await.unwrap(), 2);
        assert_eq!(store.insert_logs(t1, &[log(1), log(2)]).await.unwrap(), 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts, StoreCounts { blocks: 1, transactions: 1, logs: 3 });
    }

    #[tokio::test]
    async fn same_height_different_hash_is_a_new_row() {
        let store = InMemoryStore::new();
        let a = store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let b = store.insert_block(&header(101, 0xcc, 0xaa), Stability::Provisional).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.blocks_at(101).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_cascades_to_transactions_and_logs() {
        let store = InMemoryStore::new();
        let keep = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        let orphaned = store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let kept_tx = store.insert_transaction(keep, &tx(0x01, None, U256::ZERO)).await.unwrap();
        let dropped_tx = store.insert_transaction(orphaned, &tx(0x02, None, U256::ZERO)).await.unwrap();
        store.insert_logs(kept_tx, &[log(0)]).await.unwrap();
        store.insert_logs(dropped_tx, &[log(0), log(1)]).await.unwrap();

        assert_eq!(store.delete_blocks(&[B256::repeat_byte(0xbb)]).await.unwrap(), 1);
        assert_eq!(store.delete_blocks(&[B256::repeat_byte(0xbb)]).await.unwrap(), 0);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts, StoreCounts { blocks: 1, transactions: 1, logs: 1 });
        assert!(store.transaction_by_hash(B256::repeat_byte(0x02)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_stability_only_touches_differing_rows() {
        let store = InMemoryStore::new();
        store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let hashes = [B256::repeat_byte(0xaa), B256::repeat_byte(0xbb)];
        assert_eq!(store.set_stability(&hashes, Stability::Stable).await.unwrap(), 1);
        assert_eq!(store.set_stability(&hashes, Stability::Stable).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn latest_block_is_highest() {
        let store = InMemoryStore::new();
        assert!(store.latest_block().await.unwrap().is_none());
        store.insert_block(&header(102, 0xcc, 0xbb), Stability::Provisional).await.unwrap();
        store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        assert_eq!(store.latest_block().await.unwrap().unwrap().number, 102);
    }

    #[tokio::test]
    async fn transaction_moves_to_competing_block() {
        let store = InMemoryStore::new();
        let b = store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let c = store.insert_block(&header(101, 0xcc, 0xaa), Stability::Provisional).await.unwrap();
        let first = store.insert_transaction(b, &tx(0x07, None, U256::ZERO)).await.unwrap();
        let second = store.insert_transaction(c, &tx(0x07, None, U256::ZERO)).await.unwrap();
        assert_eq!(first, second);

        store.delete_blocks(&[B256::repeat_byte(0xbb)]).await.unwrap();
        let stored = store.transaction_by_hash(B256::repeat_byte(0x07)).await.unwrap().unwrap();
        assert_eq!(stored.block_id, c);
    }

    #[tokio::test]
    async fn moved_transaction_drops_logs_of_previous_block() {
        let store = InMemoryStore::new();
        let b = store.insert_block(&header(101, 0xbb, 0xaa), Stability::Provisional).await.unwrap();
        let c = store.insert_block(&header(101, 0xcc, 0xaa), Stability::Provisional).await.unwrap();
        let id = store.insert_transaction(b, &tx(0x07, None, U256::ZERO)).await.unwrap();
        store.insert_logs(id, &[log(5)]).await.unwrap();

        // same block again keeps the logs
        store.insert_transaction(b, &tx(0x07, None, U256::ZERO)).await.unwrap();
        assert_eq!(store.logs_for_transaction(id).await.unwrap().len(), 1);

        store.insert_transaction(c, &tx(0x07, None, U256::ZERO)).await.unwrap();
        assert!(store.logs_for_transaction(id).await.unwrap().is_empty());
        store.insert_logs(id, &[log(0)]).await.unwrap();

        let logs = store.logs_for_transaction(id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].record.index, 0);
    }

    #[tokio::test]
    async fn contract_creation_and_max_value_round_trip() {
        let store = InMemoryStore::new();
        let b = store.insert_block(&header(100, 0xaa, 0x99), Stability::Stable).await.unwrap();
        store.insert_transaction(b, &tx(0x09, None, U256::MAX)).await.unwrap();
        let stored = store.transaction_by_hash(B256::repeat_byte(0x09)).await.unwrap().unwrap();
        assert_eq!(stored.record.to, None);
        assert_eq!(stored.record.value, U256::MAX);
    }

    #[tokio::test]
    async fn orphan_rows_are_rejected() {
        let store = InMemoryStore::new();
        assert!(store.insert_transaction(42, &tx(0x01, None, U256::ZERO)).await.is_err());
        assert!(store.insert_logs(42, &[log(0)]).await.is_err());
    }
}
