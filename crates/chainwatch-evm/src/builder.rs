//! Fluent builder API for creating watchers.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use chainwatch_evm::{HttpChainSource, Network, WatcherBuilder};
//!
//! # fn main() -> Result<(), chainwatch_core::WatchError> {
//! let profile = Network::Ethereum.profile();
//! let source = HttpChainSource::new(profile.rpc_url(None), Duration::from_secs(30))?;
//! let watcher = WatcherBuilder::from_profile(&profile)
//!     .start_offset(20)
//!     .confirmation_depth(12)
//!     .stop_height(19_000_100)
//!     .build(source)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chainwatch_core::config::WatcherConfig;
use chainwatch_core::error::WatchError;
use chainwatch_core::policy::{RateLimiterConfig, RetryConfig};
use chainwatch_core::store::Store;
use chainwatch_storage::InMemoryStore;

use crate::network::NetworkProfile;
use crate::source::{ChainSource, RateLimitedSource};
use crate::watcher::ChainWatcher;

/// Fluent builder for [`ChainWatcher`].
#[derive(Default)]
pub struct WatcherBuilder {
    config: WatcherConfig,
    store: Option<Arc<dyn Store>>,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a network profile's defaults.
    pub fn from_profile(profile: &NetworkProfile) -> Self {
        Self {
            config: profile.watcher_config(),
            store: None,
        }
    }

    /// Set the chain name used in logs.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.config.chain_id = chain_id;
        self
    }

    /// Start this many blocks behind the head when the store is empty.
    pub fn start_offset(mut self, offset: u64) -> Self {
        self.config.start_offset = offset;
        self
    }

    /// Set the number of confirmations closing a window (K).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    pub fn history_size(mut self, size: usize) -> Self {
        self.config.history_size = size;
        self
    }

    /// Set the wait between polls for a not yet produced block.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    /// Stop (after a final flush) once this height is processed.
    pub fn stop_height(mut self, height: u64) -> Self {
        self.config.stop_height = Some(height);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn rate_limit(mut self, rate_limit: RateLimiterConfig) -> Self {
        self.config.rate_limit = rate_limit;
        self
    }

    /// Persist into `store` instead of a fresh in-memory store.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the `WatcherConfig`.
    pub fn build_config(self) -> WatcherConfig {
        self.config
    }

    /// Validate the configuration and build a watcher pacing `source` by the rate budget.
    pub fn build<S: ChainSource>(
        self,
        source: S,
    ) -> Result<ChainWatcher<RateLimitedSource<S>>, WatchError> {
        self.config.validate()?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()) as Arc<dyn Store>);
        let source = RateLimitedSource::new(source, self.config.rate_limit.clone());
        Ok(ChainWatcher::new(self.config, source, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;

    #[test]
    fn builder_defaults() {
        let cfg = WatcherBuilder::new().build_config();
        assert_eq!(cfg.chain, "ethereum");
        assert_eq!(cfg.confirmation_depth, 6);
        assert_eq!(cfg.start_offset, 10);
        assert_eq!(cfg.max_concurrency, 16);
        assert!(cfg.stop_height.is_none());
    }

    #[test]
    fn builder_custom() {
        let cfg = WatcherBuilder::from_profile(&Network::Polygon.profile())
            .start_offset(3)
            .confirmation_depth(32)
            .max_concurrency(4)
            .stop_height(50_000_000)
            .build_config();

        assert_eq!(cfg.chain, "polygon");
        assert_eq!(cfg.chain_id, 137);
        assert_eq!(cfg.start_offset, 3);
        assert_eq!(cfg.confirmation_depth, 32);
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.stop_height, Some(50_000_000));
    }
}
