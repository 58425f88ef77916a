//! Resolution of a validated job into concrete paths, files and knobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use catbatch_state::{BackupMode, StateError};
use catbatch_types::Granularity;

use crate::config::types::{BackupConfig, JobConfig, ServiceConfig, SourceConfig};
use crate::dispatcher::DispatchOptions;
use crate::memory::InMemoryCatalog;
use crate::operation::{self, EntityOperation, OutputKind};
use crate::service::CatalogService;

pub const DEFAULT_CHECKPOINT: &str = "processed.txt";
pub const DEFAULT_EXISTING: &str = "existing_schedules.txt";
pub const DEFAULT_MISSING: &str = "missing_schedules.txt";
pub const DEFAULT_COLUMN_LISTING: &str = "table_columns_list.txt";

/// One output file of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub kind: OutputKind,
    pub path: PathBuf,
    /// Truncated at the start of each run; otherwise appended to.
    pub fresh: bool,
    pub header: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    File {
        path: PathBuf,
        /// Granularity of the lines in the file.
        fields: Granularity,
        promote_from: Option<PathBuf>,
    },
    Catalog {
        databases: Vec<String>,
        listing: Option<PathBuf>,
    },
}

/// A job with every path made absolute and every default applied.
#[derive(Clone)]
pub struct ResolvedJob {
    pub job: String,
    pub operation: Arc<dyn EntityOperation>,
    pub work_dir: PathBuf,
    /// The configured work directory was unusable and a temporary one is used.
    pub work_dir_fallback: bool,
    pub source: ResolvedSource,
    pub checkpoint: Option<PathBuf>,
    pub run_log: PathBuf,
    pub truncate_run_log: bool,
    pub backup_mode: BackupMode,
    pub keep_backups: Option<usize>,
    pub outputs: Vec<OutputFile>,
    pub dispatch: DispatchOptions,
}

impl std::fmt::Debug for ResolvedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedJob")
            .field("job", &self.job)
            .field("operation", &self.operation.kind())
            .field("work_dir", &self.work_dir)
            .field("work_dir_fallback", &self.work_dir_fallback)
            .field("source", &self.source)
            .field("checkpoint", &self.checkpoint)
            .field("run_log", &self.run_log)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

impl ResolvedJob {
    /// Granularity of the keys handed to the operation.
    #[must_use]
    pub fn granularity(&self) -> Granularity {
        self.operation.granularity()
    }

    #[must_use]
    pub fn output_paths(&self) -> Vec<(OutputKind, PathBuf)> {
        self.outputs
            .iter()
            .map(|o| (o.kind, o.path.clone()))
            .collect()
    }
}

/// Resolve a validated job.
///
/// Input paths resolve against the configured work directory; state files
/// resolve against the effective one, which falls back to a directory under
/// the system temp dir when the configured one is not writable.
///
/// # Errors
///
/// Returns [`StateError::Io`] if neither the work directory nor the fallback
/// can be used.
pub fn resolve_job(config: &JobConfig) -> Result<ResolvedJob, StateError> {
    let requested = match &config.state.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().map_err(|e| StateError::Io {
            path: PathBuf::from("."),
            source: e,
        })?,
    };
    let (work_dir, work_dir_fallback) = usable_work_dir(&requested, &config.job)?;

    let operation = operation::from_config(&config.operation);
    let granularity = operation.granularity();

    let source = match &config.source {
        SourceConfig::File {
            path,
            fields,
            promote_from,
        } => ResolvedSource::File {
            path: under(&requested, path),
            fields: fields
                .and_then(Granularity::from_field_count)
                .unwrap_or(granularity),
            promote_from: promote_from.as_deref().map(|p| under(&requested, p)),
        },
        SourceConfig::Catalog { databases, listing } => ResolvedSource::Catalog {
            databases: databases.clone(),
            listing: listing.as_deref().map(|p| under(&work_dir, p)),
        },
    };

    let checkpoint = match &config.state.checkpoint {
        Some(explicit) => explicit.as_deref().map(|p| under(&work_dir, p)),
        None => operation
            .kind()
            .is_mutation()
            .then(|| work_dir.join(DEFAULT_CHECKPOINT)),
    };

    let configured = &config.state.outputs;
    let fresh = !operation.kind().is_mutation();
    let outputs = operation
        .outputs()
        .iter()
        .filter_map(|&kind| {
            let explicit = match kind {
                OutputKind::Results => configured.results.as_deref(),
                OutputKind::Existing => configured.existing.as_deref(),
                OutputKind::Missing => configured.missing.as_deref(),
            };
            let path = match explicit {
                Some(path) => under(&work_dir, path),
                None => work_dir.join(default_output(operation.as_ref(), kind)?),
            };
            Some(OutputFile {
                kind,
                path,
                fresh,
                header: operation.header(kind),
            })
        })
        .collect();

    let backup_mode = match &config.state.backup {
        BackupConfig::Directory { dir, .. } => BackupMode::Directory(under(&work_dir, dir)),
        BackupConfig::Sibling { .. } => BackupMode::Sibling,
    };

    Ok(ResolvedJob {
        job: config.job.clone(),
        operation,
        work_dir: work_dir.clone(),
        work_dir_fallback,
        source,
        checkpoint,
        run_log: under(&work_dir, &config.state.run_log),
        truncate_run_log: config.state.truncate_run_log,
        backup_mode,
        keep_backups: config.state.backup.keep(),
        outputs,
        dispatch: DispatchOptions::from(&config.resources),
    })
}

/// Output files a run writes when none is configured.
fn default_output(operation: &dyn EntityOperation, kind: OutputKind) -> Option<&'static str> {
    use crate::config::types::OperationKind;
    match (operation.kind(), kind) {
        (OperationKind::AuditSchedules, OutputKind::Existing) => Some(DEFAULT_EXISTING),
        (OperationKind::AuditSchedules, OutputKind::Missing) => Some(DEFAULT_MISSING),
        (OperationKind::ListColumns, OutputKind::Results) => Some(DEFAULT_COLUMN_LISTING),
        _ => None,
    }
}

fn under(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn usable_work_dir(requested: &Path, job: &str) -> Result<(PathBuf, bool), StateError> {
    if is_writable(requested) {
        return Ok((requested.to_path_buf(), false));
    }
    let fallback = std::env::temp_dir().join("catbatch").join(job);
    tracing::warn!(
        requested = %requested.display(),
        fallback = %fallback.display(),
        "Work directory unavailable or not writable, using temporary directory"
    );
    std::fs::create_dir_all(&fallback).map_err(|e| StateError::Io {
        path: fallback.clone(),
        source: e,
    })?;
    Ok((fallback, true))
}

fn is_writable(dir: &Path) -> bool {
    std::fs::create_dir_all(dir).is_ok() && tempfile::tempfile_in(dir).is_ok()
}

/// Build the in-process catalog for `service.kind: memory`.
///
/// Returns `None` for remote services, which the caller constructs.
///
/// # Errors
///
/// Returns an error if the fixture cannot be read or parsed.
pub fn memory_service(
    config: &JobConfig,
) -> Result<Option<Arc<dyn CatalogService>>> {
    let ServiceConfig::Memory { fixture, page_size } = &config.service else {
        return Ok(None);
    };
    let base = match &config.state.work_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let mut catalog = InMemoryCatalog::from_file(&under(&base, fixture))?;
    if let Some(page_size) = *page_size {
        catalog = catalog.with_page_size(page_size);
    }
    Ok(Some(Arc::new(catalog)))
}
