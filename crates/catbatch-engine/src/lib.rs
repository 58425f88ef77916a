//! Batch catalog operation orchestrator.
//!
//! Loads or enumerates catalog entities, applies one idempotent operation to
//! each with bounded concurrency and classified retries, and records durable
//! progress so an interrupted run resumes where it stopped.

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod input;
pub mod memory;
pub mod operation;
pub mod orchestrator;
pub mod recorder;
pub mod resolve;
pub mod result;
pub mod retry;
pub mod service;
pub mod source;

// Re-export public API for convenience
pub use config::{parse_job, parse_job_str, validate_job, JobConfig};
pub use errors::{classify, Disposition, OrchestratorError};
pub use memory::InMemoryCatalog;
pub use orchestrator::{check_job, run_job};
pub use resolve::{memory_service, resolve_job, ResolvedJob};
pub use result::{CheckReport, RunReport};
pub use service::CatalogService;
