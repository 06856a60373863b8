//! chainwatch-core — chain-agnostic foundation of the tip watcher.
//!
//! # Architecture
//!
//! ```text
//! ChainWatcher (chainwatch-evm)
//!     ├── IngestionPipeline  → Store          (blocks, transactions, logs)
//!     ├── StabilityTracker   → StabilityDecision
//!     │       └── ForkWindow  (countdown, pending blocks, last fingerprint)
//!     └── policy: RetryPolicy, RateLimiter
//! ```

pub mod config;
pub mod error;
pub mod policy;
pub mod reorg;
pub mod store;
pub mod tracker;
pub mod types;

pub use config::{WatcherConfig, WatcherState};
pub use error::WatchError;
pub use policy::{RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy};
pub use reorg::{Confirmation, DivergenceKind, RewindPlan, StabilityDecision};
pub use store::Store;
pub use tracker::{ForkWindow, StabilityTracker};
pub use types::{
    BlockHeader, BlockId, BlockRecord, ForkFingerprint, LogRecord, Stability, StoreCounts,
    StoredBlock, StoredLog, StoredTransaction, TransactionId, TransactionRecord,
};
