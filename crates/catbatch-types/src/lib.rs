//! Shared catbatch model types: entity keys, the remote-service error model,
//! retry policy and run summary.
//!
//! This crate has no I/O and no async runtime dependency.

pub mod error;
pub mod key;
pub mod retry;
pub mod run;

pub use error::{ServiceError, ServiceErrorKind};
pub use key::{EntityKey, Granularity, KeyError};
pub use retry::RetryPolicy;
pub use run::{RunPhase, RunStatus, RunSummary, TaskOutcome, TaskRecord};
