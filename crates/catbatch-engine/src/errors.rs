//! Remote error classification and run-level error model.

use std::path::PathBuf;

use catbatch_state::StateError;
use catbatch_types::{ServiceError, ServiceErrorKind};

/// What the engine does with a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// The entity is gone; log, count as skipped, move on.
    Skip,
    /// Transient; try again after the policy delay.
    Retry,
    /// Permanent for this entity; log and leave it unprocessed.
    Fail,
}

impl Disposition {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::Retry => "retry",
            Self::Fail => "fail",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a service error to exactly one [`Disposition`].
#[must_use]
pub fn classify(err: &ServiceError) -> Disposition {
    match err.kind {
        ServiceErrorKind::NotFound => Disposition::Skip,
        ServiceErrorKind::Throttled | ServiceErrorKind::Timeout | ServiceErrorKind::Unavailable => {
            Disposition::Retry
        }
        _ => Disposition::Fail,
    }
}

/// Failure that stops a run before any entity is dispatched.
///
/// Per-entity errors never surface here; they become counted outcomes.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The entity list (or a candidate list to promote) does not exist.
    #[error("input file {} not found", .0.display())]
    MissingInput(PathBuf),

    /// A required state file could not be backed up.
    #[error("state file preparation failed: {0}")]
    Backup(#[source] StateError),

    /// Checkpoint, output or run-log I/O failed before dispatch.
    #[error("state i/o failed: {0}")]
    StateIo(#[source] StateError),

    /// Blocking task panicked or was cancelled.
    #[error("{task} task failed: {message}")]
    Task { task: &'static str, message: String },
}

impl From<StateError> for OrchestratorError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::MissingInput { path } => Self::MissingInput(path),
            err @ StateError::Backup { .. } => Self::Backup(err),
            err => Self::StateIo(err),
        }
    }
}

impl OrchestratorError {
    pub(crate) fn task(task: &'static str, err: &tokio::task::JoinError) -> Self {
        Self::Task {
            task,
            message: err.to_string(),
        }
    }
}
