//! Run reporting.
//!
//! A run always ends with a `SyncSummary`, whether it finished, failed or
//! was cancelled. Per-record failures are listed individually.

use crate::cursor::ChangeCursor;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use tristore_types::{RecordId, Timestamp};
use uuid::Uuid;

/// One leg of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Store A → store B.
    SourceToIntermediate,
    /// Store B → store C.
    IntermediateToTarget,
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageId::SourceToIntermediate => f.write_str("source_to_intermediate"),
            StageId::IntermediateToTarget => f.write_str("intermediate_to_target"),
        }
    }
}

/// Where a stage is in its batch lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagePhase {
    Listing,
    Mapping,
    Upserting,
    Committed,
}

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Stage { stage: StageId, phase: StagePhase },
    Done,
    Failed,
    Cancelled,
}

impl RunPhase {
    /// Shorthand for a stage phase.
    pub const fn stage(stage: StageId, phase: StagePhase) -> Self {
        RunPhase::Stage { stage, phase }
    }

    /// Returns true for `Done`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed | RunPhase::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use StagePhase::*;
        use StageId::*;

        if self.is_terminal() {
            return false;
        }
        if next == RunPhase::Failed {
            return true;
        }
        match (*self, next) {
            (RunPhase::Idle, RunPhase::Stage { stage: SourceToIntermediate, phase: Listing }) => {
                true
            }
            (RunPhase::Idle, RunPhase::Cancelled) => true,
            (RunPhase::Stage { stage: a, phase: from }, RunPhase::Stage { stage: b, phase: to })
                if a == b =>
            {
                matches!(
                    (from, to),
                    (Listing, Mapping) | (Listing, Committed) | (Mapping, Upserting) | (Upserting, Committed)
                )
            }
            (
                RunPhase::Stage { stage: SourceToIntermediate, phase: Committed },
                RunPhase::Stage { stage: IntermediateToTarget, phase: Listing },
            ) => true,
            (RunPhase::Stage { stage: IntermediateToTarget, phase: Committed }, RunPhase::Done) => {
                true
            }
            (RunPhase::Stage { phase: Committed, .. }, RunPhase::Cancelled) => true,
            _ => false,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Failed {
        /// `None` when the run failed before any stage started.
        stage: Option<StageId>,
        kind: ErrorKind,
        message: String,
    },
    Cancelled,
}

/// A record that could not be synced in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    pub stage: StageId,
    pub external_id: RecordId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Counters and cursors for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageId,
    /// Records returned by the change listing.
    pub listed: usize,
    pub created: usize,
    pub updated: usize,
    /// Records with a per-record failure.
    pub skipped: usize,
    /// Records never attempted (cancellation or a fatal error elsewhere).
    pub unprocessed: usize,
    /// Whether the stage reached `Committed`.
    pub committed: bool,
    pub cursor_before: ChangeCursor,
    pub cursor_after: ChangeCursor,
}

impl StageReport {
    pub(crate) fn new(stage: StageId, cursor: &ChangeCursor) -> Self {
        Self {
            stage,
            listed: 0,
            created: 0,
            updated: 0,
            skipped: 0,
            unprocessed: 0,
            committed: false,
            cursor_before: cursor.clone(),
            cursor_after: cursor.clone(),
        }
    }

    /// Records whose attempt completed, successfully or not.
    pub fn processed(&self) -> usize {
        self.created + self.updated + self.skipped
    }
}

/// The result of one orchestrated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub outcome: RunOutcome,
    pub processed_count: usize,
    pub created_count: usize,
    pub updated_count: usize,
    pub skipped_count: usize,
    /// Cursor for the source → intermediate stage after this run.
    pub new_cursor_a: ChangeCursor,
    /// Cursor for the intermediate → target stage after this run.
    pub new_cursor_b: ChangeCursor,
    pub failures: Vec<RecordFailure>,
    pub stages: Vec<StageReport>,
    /// Every state the orchestrator passed through, in order.
    pub phases: Vec<RunPhase>,
}

impl SyncSummary {
    /// Returns true if the run reached `Done`.
    pub fn is_done(&self) -> bool {
        self.outcome == RunOutcome::Done
    }

    /// Returns the report for a stage, if it started.
    pub fn stage(&self, stage: StageId) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}
