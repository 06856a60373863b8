//! Decisions emitted by the [`StabilityTracker`](crate::tracker::StabilityTracker).
//!
//! The tracker never touches the store itself. Each observed block yields one
//! [`StabilityDecision`] which the watcher applies:
//!
//! | decision    | store effect                                                     |
//! |-------------|------------------------------------------------------------------|
//! | `Stable`    | mark the block stable                                            |
//! | `Diverged`  | mark the reopened blocks provisional                             |
//! | `Pending`   | nothing (the block stays provisional)                            |
//! | `Confirmed` | mark the canonical blocks stable, delete the abandoned ones      |
//! | `Rewind`    | delete the discarded blocks, re-ingest `from..=to`               |
//! | `Duplicate` | nothing                                                          |

use alloy_primitives::B256;

/// What made the tracker infer a divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceKind {
    /// A different fork fingerprint was served at an already-observed height.
    Fingerprint,
    /// The block does not extend the previously processed block.
    Lineage,
}

impl std::fmt::Display for DivergenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fingerprint => write!(f, "fingerprint"),
            Self::Lineage => write!(f, "lineage"),
        }
    }
}

/// Outcome of closing a confirmation window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Confirmation {
    /// Blocks on the winning branch, oldest first.
    pub stable: Vec<B256>,
    /// Provisional blocks that turned out to belong to an abandoned branch.
    pub abandoned: Vec<B256>,
}

/// A range of heights that must be fetched and ingested again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindPlan {
    /// Height of the block that triggered the rewind.
    pub detected_at: u64,
    /// First height to re-ingest (inclusive).
    pub from: u64,
    /// Last height to re-ingest (inclusive).
    pub to: u64,
    /// Provisional blocks to delete before re-ingesting.
    pub discard: Vec<B256>,
}

impl RewindPlan {
    /// Number of heights covered by the rewind.
    pub fn depth(&self) -> u64 {
        self.to - self.from + 1
    }
}

/// The tracker's verdict for one observed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StabilityDecision {
    /// Extends the followed branch in the stable regime.
    Stable,
    /// A divergence opened (or re-opened) a confirmation window.
    Diverged {
        kind: DivergenceKind,
        /// Previously processed blocks pulled back into the window.
        reopened: Vec<B256>,
    },
    /// Extends the branch inside an open window; `remaining` confirmations to go.
    Pending { remaining: u64 },
    /// The window closed.
    Confirmed(Confirmation),
    /// The followed branch was overtaken.
    Rewind(RewindPlan),
    /// The block was already processed this session.
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewind_depth_is_inclusive() {
        let plan = RewindPlan {
            detected_at: 105,
            from: 102,
            to: 105,
            discard: vec![],
        };
        assert_eq!(plan.depth(), 4);
    }
}
