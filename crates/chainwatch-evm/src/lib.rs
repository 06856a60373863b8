//! chainwatch-evm — EVM chain source, ingestion pipeline, and watcher loop.

pub mod builder;
pub mod network;
pub mod pipeline;
pub mod rpc;
pub mod source;
pub mod watcher;

pub use builder::WatcherBuilder;
pub use network::{Network, NetworkProfile};
pub use pipeline::{BlockIngest, IngestionPipeline};
pub use rpc::HttpChainSource;
pub use source::{BlockFetch, ChainSource, RateLimitedSource, RawLog, SourceBlock};
pub use watcher::{ChainWatcher, Step, WatcherStats};
