//! Stability tracker: decides which ingested blocks are provisional, which
//! are stable, and when the followed branch must be repaired.
//!
//! Per observed block `B` with predecessor `P`:
//!
//! 1. **Divergence**: `B` carries a different fork fingerprint than the one
//!    recorded for its height, or (outside a window) `B` does not extend `P`.
//!    The countdown resets to `K`, `P` and every remembered block `B` could
//!    contend with are pulled back into the pending set.
//! 2. **Inside a window**: `B` extending `P` counts one confirmation. A
//!    parent mismatch means the branch was overtaken: rewind
//!    `B.height - |pending|` ..= `B.height`.
//! 3. **Window closes** (countdown reaches 0): the lineage of the newest
//!    pending block becomes stable, pending blocks off that lineage are
//!    abandoned.
//!
//! The fingerprint is a heuristic. A different block served with the same
//! fingerprint is only caught through its parent link.

use std::collections::VecDeque;

use alloy_primitives::B256;

use crate::error::WatchError;
use crate::reorg::{Confirmation, DivergenceKind, RewindPlan, StabilityDecision};
use crate::types::{BlockHeader, ForkFingerprint};

/// Tracker-internal confirmation window.
#[derive(Debug, Clone, Default)]
pub struct ForkWindow {
    /// Confirmations still required; 0 = stable regime.
    pub confirmation_countdown: u64,
    /// Provisional blocks in arrival order.
    pub pending: Vec<BlockHeader>,
    /// Fork fingerprint of the last processed block.
    pub last_fork_signal: Option<ForkFingerprint>,
    pub last_processed_hash: Option<B256>,
}

impl ForkWindow {
    pub fn is_open(&self) -> bool {
        self.confirmation_countdown > 0 || !self.pending.is_empty()
    }

    pub fn pending_hashes(&self) -> Vec<B256> {
        self.pending.iter().map(|b| b.hash).collect()
    }

    fn contains(&self, hash: &B256) -> bool {
        self.pending.iter().any(|b| &b.hash == hash)
    }
}

/// Classifies processed blocks and detects branch changes.
///
/// Owned and mutated by the watcher loop only.
pub struct StabilityTracker {
    window: ForkWindow,
    /// Recently processed blocks, oldest first.
    history: VecDeque<BlockHeader>,
    history_size: usize,
    confirmation_depth: u64,
    /// First height of the session; rewinds never reach below it.
    floor: Option<u64>,
}

impl StabilityTracker {
    pub fn new(confirmation_depth: u64, history_size: usize) -> Self {
        Self {
            window: ForkWindow::default(),
            history: VecDeque::with_capacity(history_size),
            history_size,
            confirmation_depth,
            floor: None,
        }
    }

    /// Resume after a restart from the most recently stored block.
    pub fn seed(&mut self, head: BlockHeader) {
        self.history.clear();
        self.window = ForkWindow::default();
        self.floor = Some(head.number);
        self.remember(head);
    }

    pub fn window(&self) -> &ForkWindow {
        &self.window
    }

    /// The last processed block.
    pub fn head(&self) -> Option<&BlockHeader> {
        self.history.back()
    }

    /// Lowest height a rewind may start from.
    pub fn floor(&self) -> Option<u64> {
        let oldest = self.history.front().map(|b| b.number);
        match (self.floor, oldest) {
            (Some(floor), Some(oldest)) => Some(floor.max(oldest)),
            (floor, oldest) => floor.or(oldest),
        }
    }

    pub fn confirmation_depth(&self) -> u64 {
        self.confirmation_depth
    }

    /// Evaluate one newly ingested block.
    pub fn observe(&mut self, block: BlockHeader) -> Result<StabilityDecision, WatchError> {
        if self.history.iter().any(|b| b.hash == block.hash) {
            return Ok(StabilityDecision::Duplicate);
        }

        let Some(prev) = self.history.back().cloned() else {
            self.floor = Some(block.number);
            self.remember(block);
            return Ok(StabilityDecision::Stable);
        };

        let fingerprint_diverged = self.fingerprint_diverges(&block, &prev);
        let lineage_break = !block.extends(&prev);
        let in_window = self.window.confirmation_countdown > 0;

        if fingerprint_diverged || (!in_window && lineage_break) {
            let kind = if fingerprint_diverged {
                DivergenceKind::Fingerprint
            } else {
                DivergenceKind::Lineage
            };
            return Ok(self.open_window(block, &prev, kind));
        }

        if in_window {
            if lineage_break {
                let start = block.number as i128 - self.window.pending.len() as i128;
                return self.plan_rewind(block.number, start, block.number, Some(block.hash));
            }

            self.window.confirmation_countdown -= 1;
            let remaining = self.window.confirmation_countdown;
            self.window.pending.push(block.clone());
            self.remember(block);

            if remaining == 0 {
                return self.flush();
            }
            return Ok(StabilityDecision::Pending { remaining });
        }

        self.remember(block);
        Ok(StabilityDecision::Stable)
    }

    /// Close any open window regardless of the countdown (final flush on stop).
    pub fn finish(&mut self) -> Result<Option<StabilityDecision>, WatchError> {
        if self.window.pending.is_empty() {
            self.window.confirmation_countdown = 0;
            return Ok(None);
        }
        self.flush().map(Some)
    }

    /// Install the blocks re-ingested for a [`RewindPlan`] as the new window.
    ///
    /// Returns the hashes of remembered blocks at the replayed heights that
    /// were replaced by a different block; their rows must be deleted.
    pub fn replayed(&mut self, blocks: Vec<BlockHeader>) -> Vec<B256> {
        let superseded: Vec<B256> = self
            .history
            .iter()
            .filter(|old| {
                blocks.iter().any(|b| b.number == old.number)
                    && !blocks.iter().any(|b| b.hash == old.hash)
            })
            .map(|old| old.hash)
            .collect();

        self.history
            .retain(|old| !superseded.contains(&old.hash) && !blocks.iter().any(|b| b.hash == old.hash));

        for block in blocks {
            self.window.pending.push(block.clone());
            self.remember(block);
        }
        self.window.confirmation_countdown = self.confirmation_depth;
        superseded
    }

    // ─── internals ──────────────────────────────────────────────────────────

    fn fingerprint_diverges(&self, block: &BlockHeader, prev: &BlockHeader) -> bool {
        let Some(fingerprint) = block.fingerprint else {
            return false;
        };
        let recorded = if block.number == prev.number {
            self.window.last_fork_signal
        } else {
            self.history
                .iter()
                .rev()
                .find(|b| b.number == block.number)
                .and_then(|b| b.fingerprint)
        };
        recorded.is_some_and(|recorded| recorded != fingerprint)
    }

    fn open_window(
        &mut self,
        block: BlockHeader,
        prev: &BlockHeader,
        kind: DivergenceKind,
    ) -> StabilityDecision {
        let contested_from = block.number.saturating_sub(1);
        let mut reopened = Vec::new();
        for tracked in &self.history {
            let contested = tracked.number >= contested_from || tracked.hash == prev.hash;
            if contested && !self.window.contains(&tracked.hash) {
                reopened.push(tracked.hash);
                self.window.pending.push(tracked.clone());
            }
        }

        tracing::warn!(
            kind = %kind,
            at = block.number,
            hash = %block.hash,
            previous = %prev.hash,
            reopened = reopened.len(),
            "divergence detected, confirmation window opened"
        );

        self.window.confirmation_countdown = self.confirmation_depth;
        self.window.pending.push(block.clone());
        self.remember(block);
        StabilityDecision::Diverged { kind, reopened }
    }

    fn flush(&mut self) -> Result<StabilityDecision, WatchError> {
        let Some(newest) = self.window.pending.last().cloned() else {
            self.window.confirmation_countdown = 0;
            return Ok(StabilityDecision::Confirmed(Confirmation::default()));
        };

        let mut lineage = vec![newest.clone()];
        let mut cursor = newest.clone();
        while lineage.len() < self.window.pending.len() {
            let Some(parent) = self
                .window
                .pending
                .iter()
                .find(|b| b.hash == cursor.parent_hash)
                .cloned()
            else {
                break;
            };
            lineage.push(parent.clone());
            cursor = parent;
        }

        // The oldest canonical block must attach to a remembered block, unless
        // nothing is remembered below it.
        let root = cursor;
        let mut below = self
            .history
            .iter()
            .filter(|b| b.number + 1 == root.number)
            .peekable();
        let anchored = below.peek().is_none() || below.any(|b| b.hash == root.parent_hash);
        if !anchored {
            let to = self.window.pending.iter().map(|b| b.number).max().unwrap_or(newest.number);
            tracing::warn!(
                root = root.number,
                parent = %root.parent_hash,
                "confirmed branch does not attach to stable history, rewinding"
            );
            return self.plan_rewind(newest.number, root.number as i128 - 1, to, None);
        }

        lineage.reverse();
        let stable: Vec<B256> = lineage.iter().map(|b| b.hash).collect();
        let abandoned: Vec<B256> = self
            .window
            .pending
            .iter()
            .filter(|b| !stable.contains(&b.hash))
            .map(|b| b.hash)
            .collect();

        self.history.retain(|b| !abandoned.contains(&b.hash));
        self.window.pending.clear();
        self.window.confirmation_countdown = 0;

        tracing::info!(
            stable = stable.len(),
            abandoned = abandoned.len(),
            head = newest.number,
            "confirmation window closed"
        );
        Ok(StabilityDecision::Confirmed(Confirmation { stable, abandoned }))
    }

    fn plan_rewind(
        &mut self,
        detected_at: u64,
        start: i128,
        to: u64,
        trigger: Option<B256>,
    ) -> Result<StabilityDecision, WatchError> {
        // Every discarded pending block must be re-ingested.
        let lowest_pending = self.window.pending.iter().map(|b| b.number as i128).min();
        let start = lowest_pending.map_or(start, |lowest| start.min(lowest));

        let floor = self.floor().unwrap_or(0);
        if start < floor as i128 {
            tracing::error!(start = start as i64, floor, at = detected_at, "rewind outside tracked window");
            return Err(WatchError::ForkRewindOutOfRange {
                start,
                floor,
                at: detected_at,
            });
        }

        let mut discard: Vec<B256> = self.window.pending.drain(..).map(|b| b.hash).collect();
        discard.extend(trigger);
        self.history.retain(|b| !discard.contains(&b.hash));
        self.window.confirmation_countdown = self.confirmation_depth;
        self.window.last_processed_hash = self.history.back().map(|b| b.hash);
        self.window.last_fork_signal = self.history.back().and_then(|b| b.fingerprint);

        let plan = RewindPlan {
            detected_at,
            from: start as u64,
            to,
            discard,
        };
        tracing::warn!(
            from = plan.from,
            to = plan.to,
            discarded = plan.discard.len(),
            "followed branch overtaken, rewinding"
        );
        Ok(StabilityDecision::Rewind(plan))
    }

    fn remember(&mut self, block: BlockHeader) {
        self.window.last_processed_hash = Some(block.hash);
        self.window.last_fork_signal = block.fingerprint;
        if self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(block);
    }
}
