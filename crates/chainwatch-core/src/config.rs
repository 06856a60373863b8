//! Watcher configuration and runtime state.

use serde::{Deserialize, Serialize};

use crate::error::WatchError;
use crate::policy::{RateLimiterConfig, RetryConfig};

/// Configuration for one watcher session.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Chain slug used in logs (e.g. `"ethereum"`).
    pub chain: String,
    /// Chain id used when recovering transaction senders.
    pub chain_id: u64,
    /// Start this many blocks behind the current head when the store is empty.
    pub start_offset: u64,
    /// Confirmations required before provisional blocks become stable (K).
    pub confirmation_depth: u64,
    /// Number of processed blocks remembered for fork detection and rewinds.
    pub history_size: usize,
    /// Delay between polls while waiting for the next block (milliseconds).
    pub poll_interval_ms: u64,
    /// Maximum number of transactions of one block written concurrently.
    pub max_concurrency: usize,
    /// Stop (with a final flush) after processing this height.
    pub stop_height: Option<u64>,
    /// Backoff for source reads and store writes.
    pub retry: RetryConfig,
    /// Request budget against the chain source.
    pub rate_limit: RateLimiterConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            chain: "ethereum".into(),
            chain_id: 1,
            start_offset: 10,
            confirmation_depth: 6,
            history_size: 128,
            poll_interval_ms: 6_000,
            max_concurrency: 16,
            stop_height: None,
            retry: RetryConfig::default(),
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

impl WatcherConfig {
    /// Reject settings the watcher cannot run with.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.start_offset == 0 {
            return Err(WatchError::Config("start offset must be a positive integer".into()));
        }
        if self.confirmation_depth == 0 {
            return Err(WatchError::Config("confirmation depth must be at least 1".into()));
        }
        if (self.history_size as u64) <= self.confirmation_depth {
            return Err(WatchError::Config(format!(
                "history size {} must exceed confirmation depth {}",
                self.history_size, self.confirmation_depth
            )));
        }
        if self.max_concurrency == 0 {
            return Err(WatchError::Config("max concurrency must be at least 1".into()));
        }
        if self.rate_limit.capacity < 1.0 || self.rate_limit.refill_rate <= 0.0 {
            return Err(WatchError::Config("rate limit must allow at least one request".into()));
        }
        Ok(())
    }
}

/// Runtime state of the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatcherState {
    /// Not yet started.
    Idle,
    /// Following the chain tip.
    Live,
    /// Waiting for the next block to be produced.
    Waiting,
    /// Re-ingesting a range after the followed branch was overtaken.
    ReorgRecovery,
    /// Shutting down gracefully.
    Stopping,
    /// Terminated.
    Stopped,
    /// Encountered an unrecoverable error.
    Error,
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Live => write!(f, "live"),
            Self::Waiting => write!(f, "waiting"),
            Self::ReorgRecovery => write!(f, "reorg-recovery"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = WatcherConfig::default();
        assert_eq!(cfg.start_offset, 10);
        assert_eq!(cfg.confirmation_depth, 6);
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_offset_rejected() {
        let cfg = WatcherConfig {
            start_offset: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(WatchError::Config(_))));
    }

    #[test]
    fn history_must_cover_confirmation_window() {
        let cfg = WatcherConfig {
            confirmation_depth: 64,
            history_size: 64,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
