//! Run-level model types: per-entity task records, run phases and the
//! summary counters surfaced at the end of a run.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::key::EntityKey;

// ---------------------------------------------------------------------------
// Per-entity outcome
// ---------------------------------------------------------------------------

/// Final outcome of one dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Remote call succeeded and the success was durably recorded.
    Success,
    /// Entity (or dependent resource) not found; nothing to do.
    Skipped { reason: String },
    /// Transient failures exhausted the retry bound, or recording the success
    /// locally failed. The entity stays eligible for the next run.
    TransientError { message: String },
    /// Non-retryable failure. The entity stays eligible for the next run.
    PermanentError { message: String },
}

impl TaskOutcome {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Skipped { .. } => "skipped",
            Self::TransientError { .. } => "transient_error",
            Self::PermanentError { .. } => "permanent_error",
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::TransientError { .. } | Self::PermanentError { .. }
        )
    }
}

/// Record of one dispatched operation, owned by the worker that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub key: EntityKey,
    pub attempts: u32,
    pub outcome: TaskOutcome,
}

// ---------------------------------------------------------------------------
// Run tracking
// ---------------------------------------------------------------------------

/// Orchestrator phase. Phases advance linearly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Backup,
    Load,
    Dispatch,
    Finalize,
}

impl RunPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Backup => "backup",
            Self::Load => "load",
            Self::Dispatch => "dispatch",
            Self::Finalize => "finalize",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Dispatch ran to completion, possibly with per-entity failures.
    Completed,
    /// Missing required input or unrecoverable I/O before any dispatch.
    AbortedBeforeDispatch,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::AbortedBeforeDispatch => "aborted_before_dispatch",
        }
    }

    /// Process exit code for this status.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::AbortedBeforeDispatch => 1,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique entities produced by the file loader or the entity source.
    pub discovered: u64,
    /// Input lines rejected as malformed.
    pub malformed: u64,
    /// Input lines that repeated an earlier entity.
    pub duplicates: u64,
    /// Entities filtered out because the checkpoint already holds them.
    pub already_done: u64,
    /// Entities submitted to workers.
    pub dispatched: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Extra attempts spent on transient errors.
    pub retries: u64,
    /// Listing calls that returned a partial result.
    pub incomplete_listings: u64,
}

impl RunSummary {
    /// Fold one task record into the counters.
    pub fn record(&mut self, record: &TaskRecord) {
        self.retries += u64::from(record.attempts.saturating_sub(1));
        match record.outcome {
            TaskOutcome::Success => self.processed += 1,
            TaskOutcome::Skipped { .. } => self.skipped += 1,
            TaskOutcome::TransientError { .. } | TaskOutcome::PermanentError { .. } => {
                self.failed += 1;
            }
        }
    }

    /// Every dispatched entity has exactly one outcome.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.processed + self.skipped + self.failed == self.dispatched
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed={} skipped={} failed={} already_done={} malformed={} duplicates={} retries={}",
            self.processed,
            self.skipped,
            self.failed,
            self.already_done,
            self.malformed,
            self.duplicates,
            self.retries
        )?;
        if self.incomplete_listings > 0 {
            write!(f, " incomplete_listings={}", self.incomplete_listings)?;
        }
        Ok(())
    }
}
