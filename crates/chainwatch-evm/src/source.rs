//! The `ChainSource` contract and the rate-limited wrapper around it.

use std::sync::Arc;

use alloy_consensus::TxEnvelope;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chainwatch_core::error::WatchError;
use chainwatch_core::policy::{RateLimiter, RateLimiterConfig};
use chainwatch_core::types::{BlockHeader, ForkFingerprint};

/// A block body as served by the chain source.
#[derive(Debug, Clone)]
pub struct SourceBlock {
    pub number: u64,
    pub hash: B256,
    pub parent_hash: B256,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
    /// Block producer; the fork fingerprint is derived from it.
    pub beneficiary: Address,
    pub transactions: Vec<TxEnvelope>,
}

impl SourceBlock {
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            number: self.number,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
            fingerprint: Some(ForkFingerprint::of(self.beneficiary.as_slice())),
        }
    }
}

/// Result of asking the source for a height.
#[derive(Debug, Clone)]
pub enum BlockFetch {
    Produced(SourceBlock),
    /// The height is beyond the current tip. A wait condition, not a failure.
    NotYetProduced,
}

/// A raw receipt log as returned by `eth_getTransactionReceipt`.
///
/// Kept as hex strings; decoding happens in the pipeline so a malformed
/// entry can be skipped on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLog {
    #[serde(rename = "logIndex")]
    pub log_index: String,
    pub data: String,
}

/// Read access to the observed chain.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Height of the current chain tip.
    async fn head_height(&self) -> Result<u64, WatchError>;

    /// The block at `height` with full transaction bodies.
    async fn block_at(&self, height: u64) -> Result<BlockFetch, WatchError>;

    /// Log entries of the transaction's receipt; `None` if no receipt exists.
    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, WatchError>;
}

#[async_trait]
impl<S: ChainSource + ?Sized> ChainSource for Arc<S> {
    async fn head_height(&self) -> Result<u64, WatchError> {
        (**self).head_height().await
    }

    async fn block_at(&self, height: u64) -> Result<BlockFetch, WatchError> {
        (**self).block_at(height).await
    }

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, WatchError> {
        (**self).receipt_logs(tx_hash).await
    }
}

/// Paces every request against the inner source through a token bucket.
pub struct RateLimitedSource<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S: ChainSource> RateLimitedSource<S> {
    pub fn new(inner: S, config: RateLimiterConfig) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(config),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ChainSource> ChainSource for RateLimitedSource<S> {
    async fn head_height(&self) -> Result<u64, WatchError> {
        self.limiter.acquire().await;
        self.inner.head_height().await
    }

    async fn block_at(&self, height: u64) -> Result<BlockFetch, WatchError> {
        self.limiter.acquire().await;
        self.inner.block_at(height).await
    }

    async fn receipt_logs(&self, tx_hash: B256) -> Result<Option<Vec<RawLog>>, WatchError> {
        self.limiter.acquire().await;
        self.inner.receipt_logs(tx_hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    struct CountingSource {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChainSource for CountingSource {
        async fn head_height(&self) -> Result<u64, WatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        }

        async fn block_at(&self, _height: u64) -> Result<BlockFetch, WatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(BlockFetch::NotYetProduced)
        }

        async fn receipt_logs(&self, _tx_hash: B256) -> Result<Option<Vec<RawLog>>, WatchError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn rate_limited_source_paces_requests() {
        let source = RateLimitedSource::new(
            CountingSource {
                calls: AtomicU32::new(0),
            },
            RateLimiterConfig {
                capacity: 1.0,
                refill_rate: 20.0,
            },
        );
        let started = Instant::now();
        for _ in 0..3 {
            assert_eq!(source.head_height().await.unwrap(), 42);
        }
        // first token is free, the next two need ~50ms each
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn header_carries_beneficiary_fingerprint() {
        let block = SourceBlock {
            number: 7,
            hash: B256::repeat_byte(7),
            parent_hash: B256::repeat_byte(6),
            timestamp: 84,
            beneficiary: Address::repeat_byte(0xaa),
            transactions: vec![],
        };
        let header = block.header();
        assert_eq!(header.number, 7);
        assert_eq!(
            header.fingerprint,
            Some(ForkFingerprint::of(Address::repeat_byte(0xaa).as_slice()))
        );
    }

    #[test]
    fn raw_log_from_receipt_json() {
        let log: RawLog = serde_json::from_str(
            r#"{"address":"0x00","logIndex":"0x1f","data":"0xdeadbeef","removed":false}"#,
        )
        .unwrap();
        assert_eq!(log.log_index, "0x1f");
        assert_eq!(log.data, "0xdeadbeef");
    }
}
