//! Ingestion pipeline: one fetched block → block, transaction and log rows.
//!
//! The block row is written first. Transactions are then written on a bounded
//! `buffer_unordered` pool, each task fetching its receipt and bulk-writing the
//! decoded logs. Every task is joined, failing ones included, before the block
//! is reported as ingested.

use std::sync::Arc;

use alloy_consensus::transaction::SignerRecoverable;
use alloy_consensus::{Transaction as _, TxEnvelope};
use alloy_primitives::{hex, Address, Bytes, B256};
use futures::stream::{self, StreamExt};

use chainwatch_core::config::WatcherConfig;
use chainwatch_core::error::WatchError;
use chainwatch_core::policy::RetryPolicy;
use chainwatch_core::store::Store;
use chainwatch_core::types::{BlockId, BlockRecord, LogRecord, Stability, TransactionRecord};

use crate::source::{BlockFetch, ChainSource, RawLog, SourceBlock};

/// Outcome of [`IngestionPipeline::ingest_block`].
#[derive(Debug, Clone)]
pub enum BlockIngest {
    Ingested(BlockRecord),
    NotYetProduced,
}

#[derive(Debug, Default)]
struct TxOutcome {
    logs: usize,
    skipped_logs: usize,
}

pub struct IngestionPipeline<S> {
    source: S,
    store: Arc<dyn Store>,
    retry: RetryPolicy,
    max_concurrency: usize,
    chain_id: u64,
}

impl<S: ChainSource> IngestionPipeline<S> {
    pub fn new(source: S, store: Arc<dyn Store>, config: &WatcherConfig) -> Self {
        Self {
            source,
            store,
            retry: RetryPolicy::new(config.retry.clone()),
            max_concurrency: config.max_concurrency.max(1),
            chain_id: config.chain_id,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fetch the block at `height`, retrying connectivity failures.
    pub async fn fetch(&self, height: u64) -> Result<BlockFetch, WatchError> {
        self.retry
            .run("eth_getBlockByNumber", || self.source.block_at(height))
            .await
    }

    /// Fetch and ingest the block at `height` as provisional.
    pub async fn ingest_block(&self, height: u64) -> Result<BlockIngest, WatchError> {
        match self.fetch(height).await? {
            BlockFetch::NotYetProduced => Ok(BlockIngest::NotYetProduced),
            BlockFetch::Produced(block) => self
                .ingest(&block, Stability::Provisional)
                .await
                .map(BlockIngest::Ingested),
        }
    }

    /// Write an already fetched block with the given stability.
    pub async fn ingest(
        &self,
        block: &SourceBlock,
        stability: Stability,
    ) -> Result<BlockRecord, WatchError> {
        let header = block.header();
        let block_id = self
            .retry
            .run("insert_block", || self.store.insert_block(&header, stability))
            .await?;
        tracing::debug!(number = header.number, hash = %header.hash, block_id, "block row written");

        let outcomes: Vec<Result<TxOutcome, WatchError>> = stream::iter(&block.transactions)
            .map(|tx| self.ingest_transaction(block_id, tx))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut logs = 0;
        let mut skipped_logs = 0;
        let mut failure = None;
        for outcome in outcomes {
            match outcome {
                Ok(tx) => {
                    logs += tx.logs;
                    skipped_logs += tx.skipped_logs;
                }
                Err(e) => {
                    tracing::error!(number = header.number, error = %e, "transaction ingestion failed");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        tracing::info!(
            number = header.number,
            hash = %header.hash,
            txs = block.transactions.len(),
            logs,
            skipped_logs,
            "block ingested"
        );

        Ok(BlockRecord {
            block_id,
            header,
            transactions: block.transactions.len(),
            logs,
            skipped_logs,
        })
    }

    async fn ingest_transaction(
        &self,
        block_id: BlockId,
        tx: &TxEnvelope,
    ) -> Result<TxOutcome, WatchError> {
        let record = self.normalize(tx);
        let tx_id = self
            .retry
            .run("insert_transaction", || self.store.insert_transaction(block_id, &record))
            .await?;

        let receipt = self
            .retry
            .run("eth_getTransactionReceipt", || self.source.receipt_logs(record.hash))
            .await?;
        let Some(raw) = receipt else {
            tracing::warn!(tx = %record.hash, "no receipt for transaction");
            return Ok(TxOutcome::default());
        };

        let (logs, skipped_logs) = decode_logs(record.hash, &raw);
        if !logs.is_empty() {
            let written = self
                .retry
                .run("insert_logs", || self.store.insert_logs(tx_id, &logs))
                .await?;
            tracing::debug!(tx = %record.hash, tx_id, written, "log rows written");
        }

        Ok(TxOutcome {
            logs: logs.len(),
            skipped_logs,
        })
    }

    /// Normalize a signed transaction into a row, recovering its sender.
    pub fn normalize(&self, tx: &TxEnvelope) -> TransactionRecord {
        let hash = *tx.tx_hash();
        if let Some(chain_id) = tx.chain_id() {
            if chain_id != self.chain_id {
                tracing::warn!(tx = %hash, chain_id, expected = self.chain_id, "transaction signed for another chain");
            }
        }

        let from = match tx.recover_signer() {
            Ok(from) => from,
            Err(e) => {
                tracing::warn!(tx = %hash, error = %e, "sender recovery failed, storing zero address");
                Address::ZERO
            }
        };

        TransactionRecord {
            hash,
            from,
            to: tx.to(),
            nonce: tx.nonce(),
            data: tx.input().clone(),
            value: tx.value(),
        }
    }
}

/// Decode raw receipt logs, skipping malformed entries.
///
/// Returns the decoded logs and the number of skipped entries.
pub fn decode_logs(tx_hash: B256, raw: &[RawLog]) -> (Vec<LogRecord>, usize) {
    let mut logs = Vec::with_capacity(raw.len());
    let mut skipped = 0;
    for (position, entry) in raw.iter().enumerate() {
        match decode_log(entry) {
            Ok(log) => logs.push(log),
            Err(e) => {
                skipped += 1;
                tracing::warn!(tx = %tx_hash, position, error = %e, "skipping malformed log");
            }
        }
    }
    (logs, skipped)
}

fn decode_log(raw: &RawLog) -> Result<LogRecord, WatchError> {
    let digits = raw
        .log_index
        .strip_prefix("0x")
        .ok_or_else(|| WatchError::Decode(format!("log index '{}' is not 0x-prefixed", raw.log_index)))?;
    let index = u64::from_str_radix(digits, 16)
        .map_err(|e| WatchError::Decode(format!("log index '{}': {e}", raw.log_index)))?;
    let data = hex::decode(&raw.data)
        .map_err(|e| WatchError::Decode(format!("log data: {e}")))?;
    Ok(LogRecord {
        index,
        data: Bytes::from(data),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(index: &str, data: &str) -> RawLog {
        RawLog {
            log_index: index.into(),
            data: data.into(),
        }
    }

    #[test]
    fn decode_well_formed_logs() {
        let (logs, skipped) = decode_logs(B256::ZERO, &[raw("0x0", "0xdeadbeef"), raw("0x1a", "0x")]);
        assert_eq!(skipped, 0);
        assert_eq!(logs[0].index, 0);
        assert_eq!(logs[0].data, Bytes::from(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(logs[1].index, 26);
        assert!(logs[1].data.is_empty());
    }

    #[test]
    fn malformed_log_is_skipped_alone() {
        let (logs, skipped) = decode_logs(
            B256::ZERO,
            &[raw("0x0", "0x01"), raw("0xzz", "0x02"), raw("0x2", "0xnothex"), raw("0x3", "0x03")],
        );
        assert_eq!(skipped, 2);
        assert_eq!(logs.iter().map(|l| l.index).collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn unprefixed_index_is_rejected() {
        assert!(decode_log(&raw("12", "0x")).is_err());
    }
}
