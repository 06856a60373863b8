//! The watcher loop: fetch the next height, ingest it, let the tracker judge
//! it, apply the verdict to the store, then advance or wait.
//!
//! # Start
//! Resume at `latest stored block + 1` (the stored block seeds the tracker),
//! otherwise start `start_offset` blocks behind the current head.
//!
//! # Per height
//! - `NotYetProduced` → sleep `poll_interval_ms` (or until shutdown), retry the same height.
//! - A block whose parent is not the last processed block: re-fetch the
//!   previous height first, so a replaced predecessor is observed before it.
//! - `Rewind` → delete the discarded rows, re-ingest the range, continue after it.
//!
//! # Stop
//! - stop height reached → final flush of the open window.
//! - shutdown token cancelled → the current block is drained, nothing is flushed.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::B256;
use tokio_util::sync::CancellationToken;

use chainwatch_core::config::{WatcherConfig, WatcherState};
use chainwatch_core::error::WatchError;
use chainwatch_core::reorg::{RewindPlan, StabilityDecision};
use chainwatch_core::store::Store;
use chainwatch_core::tracker::StabilityTracker;
use chainwatch_core::types::{BlockHeader, Stability};

use crate::pipeline::IngestionPipeline;
use crate::source::{BlockFetch, ChainSource, SourceBlock};

/// Attempts at closing the window on stop when closing keeps requiring a rewind.
const FINAL_FLUSH_ATTEMPTS: usize = 3;

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStats {
    pub blocks: u64,
    pub transactions: u64,
    pub logs: u64,
    pub skipped_logs: u64,
    pub divergences: u64,
    pub rewinds: u64,
    pub abandoned_blocks: u64,
}

/// Result of one [`ChainWatcher::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The height was processed; `next` is the following height to fetch.
    Processed { next: u64 },
    /// The height is not produced yet.
    Waiting { height: u64 },
}

/// Session state for one watched chain.
pub struct ChainWatcher<S> {
    config: WatcherConfig,
    pipeline: IngestionPipeline<S>,
    tracker: StabilityTracker,
    state: WatcherState,
    next_height: Option<u64>,
    stats: WatcherStats,
}

impl<S: ChainSource> ChainWatcher<S> {
    pub fn new(config: WatcherConfig, source: S, store: Arc<dyn Store>) -> Self {
        let pipeline = IngestionPipeline::new(source, store, &config);
        let tracker = StabilityTracker::new(config.confirmation_depth, config.history_size);
        Self {
            config,
            pipeline,
            tracker,
            state: WatcherState::Idle,
            next_height: None,
            stats: WatcherStats::default(),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    pub fn stats(&self) -> &WatcherStats {
        &self.stats
    }

    pub fn tracker(&self) -> &StabilityTracker {
        &self.tracker
    }

    pub fn pipeline(&self) -> &IngestionPipeline<S> {
        &self.pipeline
    }

    /// Next height to fetch; `None` before [`start`](Self::start).
    pub fn next_height(&self) -> Option<u64> {
        self.next_height
    }

    fn store(&self) -> &Arc<dyn Store> {
        self.pipeline.store()
    }

    /// Run until the stop height, shutdown, or a fatal error.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<WatcherStats, WatchError> {
        match self.run_inner(&shutdown).await {
            Ok(()) => {
                self.state = WatcherState::Stopped;
                tracing::info!(chain = %self.config.chain, stats = ?self.stats, "watcher stopped");
                Ok(self.stats.clone())
            }
            Err(e) => {
                self.state = WatcherState::Error;
                tracing::error!(chain = %self.config.chain, error = %e, "watcher failed");
                Err(e)
            }
        }
    }

    async fn run_inner(&mut self, shutdown: &CancellationToken) -> Result<(), WatchError> {
        self.config.validate()?;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut next = self.start().await?;

        loop {
            if shutdown.is_cancelled() {
                self.state = WatcherState::Stopping;
                tracing::info!(next, "shutdown requested");
                return Ok(());
            }
            if let Some(stop) = self.config.stop_height {
                if next > stop {
                    self.state = WatcherState::Stopping;
                    tracing::info!(stop, "stop height reached, flushing");
                    return self.finish().await;
                }
            }

            match self.step().await? {
                Step::Processed { next: following } => {
                    self.state = WatcherState::Live;
                    next = following;
                }
                Step::Waiting { height } => {
                    self.state = WatcherState::Waiting;
                    tracing::debug!(height, wait_ms = poll_interval.as_millis() as u64, "block not yet produced");
                    tokio::select! {
                        _ = shutdown.cancelled() => {}
                        _ = tokio::time::sleep(poll_interval) => {}
                    }
                }
            }
        }
    }

    /// Decide the first height of the session and seed the tracker.
    pub async fn start(&mut self) -> Result<u64, WatchError> {
        let store = Arc::clone(self.store());
        let latest = self
            .pipeline
            .retry()
            .run("latest_block", || store.latest_block())
            .await?;

        let next = match latest {
            Some(block) => {
                tracing::info!(
                    chain = %self.config.chain,
                    number = block.number,
                    hash = %block.hash,
                    stability = %block.stability,
                    "resuming from stored block"
                );
                self.tracker.seed(block.header());
                block.number + 1
            }
            None => {
                let head = self
                    .pipeline
                    .retry()
                    .run("eth_blockNumber", || self.pipeline.source().head_height())
                    .await?;
                let start = head.saturating_sub(self.config.start_offset);
                tracing::info!(chain = %self.config.chain, head, start, "starting behind the tip");
                start
            }
        };

        self.state = WatcherState::Live;
        self.next_height = Some(next);
        Ok(next)
    }

    /// Process the next height once.
    pub async fn step(&mut self) -> Result<Step, WatchError> {
        let height = match self.next_height {
            Some(height) => height,
            None => self.start().await?,
        };

        let block = match self.pipeline.fetch(height).await? {
            BlockFetch::NotYetProduced => return Ok(Step::Waiting { height }),
            BlockFetch::Produced(block) => block,
        };

        // The predecessor may have been replaced since it was processed.
        if let Some(head) = self.tracker.head().cloned() {
            if height > 0 && height == head.number + 1 && block.parent_hash != head.hash {
                if let BlockFetch::Produced(prev) = self.pipeline.fetch(height - 1).await? {
                    if prev.hash != head.hash && prev.hash == block.parent_hash {
                        tracing::debug!(height = height - 1, hash = %prev.hash, "predecessor re-served");
                        if let Some(next) = self.process(&prev).await? {
                            self.next_height = Some(next);
                            return Ok(Step::Processed { next });
                        }
                    }
                }
            }
        }

        let next = self.process(&block).await?.unwrap_or(height + 1);
        self.next_height = Some(next);
        Ok(Step::Processed { next })
    }

    /// Ingest one block and apply the tracker's verdict.
    ///
    /// Returns the height to continue from when the verdict was a rewind.
    async fn process(&mut self, block: &SourceBlock) -> Result<Option<u64>, WatchError> {
        let record = self.pipeline.ingest(block, Stability::Provisional).await?;
        self.stats.blocks += 1;
        self.stats.transactions += record.transactions as u64;
        self.stats.logs += record.logs as u64;
        self.stats.skipped_logs += record.skipped_logs as u64;

        let decision = self.tracker.observe(record.header.clone())?;
        tracing::debug!(number = record.header.number, decision = ?decision, "tracker verdict");
        self.apply(decision, &record.header).await
    }

    async fn apply(
        &mut self,
        decision: StabilityDecision,
        header: &BlockHeader,
    ) -> Result<Option<u64>, WatchError> {
        match decision {
            StabilityDecision::Stable => {
                self.mark(&[header.hash], Stability::Stable).await?;
            }
            StabilityDecision::Diverged { kind, reopened } => {
                self.stats.divergences += 1;
                tracing::warn!(
                    %kind,
                    number = header.number,
                    reopened = reopened.len(),
                    countdown = self.tracker.confirmation_depth(),
                    "fork suspected"
                );
                self.mark(&reopened, Stability::Provisional).await?;
            }
            StabilityDecision::Pending { remaining } => {
                tracing::debug!(number = header.number, remaining, "awaiting confirmations");
            }
            StabilityDecision::Confirmed(confirmation) => {
                self.mark(&confirmation.stable, Stability::Stable).await?;
                self.discard(&confirmation.abandoned).await?;
                self.stats.abandoned_blocks += confirmation.abandoned.len() as u64;
            }
            StabilityDecision::Rewind(plan) => {
                return self.rewind(plan).await.map(Some);
            }
            StabilityDecision::Duplicate => {
                tracing::debug!(number = header.number, hash = %header.hash, "block already processed");
            }
        }
        Ok(None)
    }

    /// Delete the discarded rows and re-ingest the planned range.
    ///
    /// Returns the height following the replayed range.
    async fn rewind(&mut self, plan: RewindPlan) -> Result<u64, WatchError> {
        self.state = WatcherState::ReorgRecovery;
        self.stats.rewinds += 1;
        tracing::warn!(
            detected_at = plan.detected_at,
            from = plan.from,
            to = plan.to,
            depth = plan.depth(),
            "re-ingesting overtaken range"
        );

        self.discard(&plan.discard).await?;
        self.stats.abandoned_blocks += plan.discard.len() as u64;

        let mut replayed = Vec::new();
        let mut next = plan.to + 1;
        for height in plan.from..=plan.to {
            match self.pipeline.fetch(height).await? {
                BlockFetch::NotYetProduced => {
                    next = height;
                    break;
                }
                BlockFetch::Produced(block) => {
                    let record = self.pipeline.ingest(&block, Stability::Provisional).await?;
                    self.stats.blocks += 1;
                    replayed.push(record.header);
                }
            }
        }

        let hashes: Vec<B256> = replayed.iter().map(|b| b.hash).collect();
        let superseded = self.tracker.replayed(replayed);
        self.discard(&superseded).await?;
        self.stats.abandoned_blocks += superseded.len() as u64;
        self.mark(&hashes, Stability::Provisional).await?;

        self.state = WatcherState::Live;
        Ok(next)
    }

    /// Close the open window regardless of the countdown.
    pub async fn finish(&mut self) -> Result<(), WatchError> {
        for _ in 0..FINAL_FLUSH_ATTEMPTS {
            let Some(decision) = self.tracker.finish()? else {
                return Ok(());
            };
            let head = self.tracker.head().cloned();
            match (decision, head) {
                (StabilityDecision::Rewind(plan), _) => {
                    let next = self.rewind(plan).await?;
                    self.next_height = Some(next);
                }
                (decision, Some(head)) => {
                    self.apply(decision, &head).await?;
                    return Ok(());
                }
                (_, None) => return Ok(()),
            }
        }
        tracing::warn!(
            pending = self.tracker.window().pending.len(),
            "confirmation window still open after final flush"
        );
        Ok(())
    }

    async fn mark(&self, hashes: &[B256], stability: Stability) -> Result<(), WatchError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let store = self.store();
        let changed = self
            .pipeline
            .retry()
            .run("set_stability", || store.set_stability(hashes, stability))
            .await?;
        tracing::debug!(%stability, requested = hashes.len(), changed, "stability updated");
        Ok(())
    }

    async fn discard(&self, hashes: &[B256]) -> Result<(), WatchError> {
        if hashes.is_empty() {
            return Ok(());
        }
        let store = self.store();
        let deleted = self
            .pipeline
            .retry()
            .run("delete_blocks", || store.delete_blocks(hashes))
            .await?;
        tracing::info!(requested = hashes.len(), deleted, "blocks of abandoned branch deleted");
        Ok(())
    }
}
