//! Durable run state for catbatch.
//!
//! Provides the append-only [`CheckpointStore`], the [`StateFileManager`]
//! that backs files up before they are truncated or replaced, and the
//! [`RunLog`] written alongside `tracing` output.

#![warn(clippy::pedantic)]

pub mod checkpoint;
pub mod error;
pub mod files;
pub mod run_log;

pub use checkpoint::{CheckpointLoad, CheckpointSet, CheckpointStore};
pub use error::StateError;
pub use files::{BackupMode, BackupReport, Requirement, StateFile, StateFileManager};
pub use run_log::RunLog;
