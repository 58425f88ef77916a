//! Run result types.

use std::path::PathBuf;
use std::time::Duration;

use catbatch_types::{RunStatus, RunSummary};

use crate::config::types::OperationKind;
use crate::operation::OutputKind;

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub job: String,
    pub operation: OperationKind,
    pub status: RunStatus,
    pub summary: RunSummary,
    pub work_dir: PathBuf,
    pub run_log: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
    pub outputs: Vec<(OutputKind, PathBuf)>,
    pub duration: Duration,
}

impl RunReport {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }
}

/// Readiness of a job, as reported by `check`.
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub work_dir: PathBuf,
    /// The configured work directory could not be used.
    pub work_dir_fallback: bool,
    /// Entity file to load, and whether it exists. `None` for catalog sources.
    pub input: Option<(PathBuf, bool)>,
    /// Candidate list to promote, and whether it exists.
    pub promote_from: Option<(PathBuf, bool)>,
    pub checkpoint: Option<PathBuf>,
    /// Entries already in the checkpoint.
    pub checkpointed: usize,
    pub outputs: Vec<(OutputKind, PathBuf)>,
}

impl CheckReport {
    /// Every required input is present.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.input.as_ref().map_or(true, |(_, exists)| *exists)
            && self.promote_from.as_ref().map_or(true, |(_, exists)| *exists)
    }
}
