//! Run orchestrator: prepares state files, loads or enumerates entities,
//! dispatches the operation and finalizes the run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;

use catbatch_state::{CheckpointStore, RunLog, StateError, StateFile, StateFileManager};
use catbatch_types::{EntityKey, RunPhase, RunStatus, RunSummary};

use crate::dispatcher::{partition_pending, Dispatcher};
use crate::errors::OrchestratorError;
use crate::input::{self, InputLoad};
use crate::recorder::{OutputSink, Recorder};
use crate::resolve::{ResolvedJob, ResolvedSource};
use crate::result::{CheckReport, RunReport};
use crate::service::CatalogService;
use crate::source;

const START_TIMESTAMP_FMT: &str = "%Y-%m-%d %H:%M:%S";

/// Entities to dispatch plus the load-time counters.
struct Loaded {
    keys: Vec<EntityKey>,
    summary: RunSummary,
}

/// Run a resolved job to completion.
///
/// Per-entity failures are counted in the returned report. Only problems
/// found before dispatch starts produce an error.
///
/// # Errors
///
/// Returns [`OrchestratorError`] when a required input is missing, a required
/// backup fails, or the checkpoint or outputs cannot be opened.
pub async fn run_job(
    job: &ResolvedJob,
    service: Arc<dyn CatalogService>,
) -> Result<RunReport, OrchestratorError> {
    let start = Instant::now();
    let manager = StateFileManager::new(job.backup_mode.clone(), job.dispatch.retry)
        .with_retention(job.keep_backups);

    enter(RunPhase::Init, job);
    let log = open_run_log(job, &manager).await?;
    log.info(format!(
        "Starting {} ({}) at {}",
        job.job,
        job.operation.kind(),
        Local::now().format(START_TIMESTAMP_FMT)
    ));
    if job.work_dir_fallback {
        log.warn(format!(
            "Work directory unavailable or not writable, using {}",
            job.work_dir.display()
        ));
    }

    match prepare_and_dispatch(job, service, &manager, &log).await {
        Ok(summary) => {
            log.info(format!(
                "Completed {} at {}: {summary}",
                job.job,
                Local::now().format(START_TIMESTAMP_FMT)
            ));
            flush(&log);
            Ok(RunReport {
                job: job.job.clone(),
                operation: job.operation.kind(),
                status: RunStatus::Completed,
                summary,
                work_dir: job.work_dir.clone(),
                run_log: log.path().map(PathBuf::from),
                checkpoint: job.checkpoint.clone(),
                outputs: job.output_paths(),
                duration: start.elapsed(),
            })
        }
        Err(err) => {
            log.error(format!("Aborting before dispatch: {err}"));
            flush(&log);
            Err(err)
        }
    }
}

async fn prepare_and_dispatch(
    job: &ResolvedJob,
    service: Arc<dyn CatalogService>,
    manager: &StateFileManager,
    log: &Arc<RunLog>,
) -> Result<RunSummary, OrchestratorError> {
    enter(RunPhase::Backup, job);
    prepare_state_files(job, manager, log).await?;

    enter(RunPhase::Load, job);
    let Loaded { keys, mut summary } = load(job, Arc::clone(&service), log).await?;
    let store = open_checkpoint(job).await?;
    let (pending, already_done) = match &store {
        Some(store) => partition_pending(keys, store.set()),
        None => (keys, 0),
    };
    summary.already_done = already_done;
    if already_done > 0 {
        log.info(format!("{already_done} entities already processed, skipping"));
    }
    let sinks = open_outputs(job).await?;

    enter(RunPhase::Dispatch, job);
    let dispatcher = Dispatcher::new(job.dispatch);
    let recorder = Recorder::spawn(store, sinks, dispatcher.options().concurrency * 2);
    let dispatched = dispatcher
        .run(
            pending,
            Arc::clone(&job.operation),
            service,
            &recorder.handle(),
            Arc::clone(log),
        )
        .await;

    enter(RunPhase::Finalize, job);
    match recorder.close().await {
        Ok(closed) => {
            if let Some(e) = closed.sync_error {
                log.error(format!("Final checkpoint sync failed: {e}"));
            }
        }
        Err(e) => log.error(format!("Recorder did not shut down cleanly: {e}")),
    }

    summary.dispatched = dispatched.dispatched;
    summary.processed = dispatched.processed;
    summary.skipped = dispatched.skipped;
    summary.failed = dispatched.failed;
    summary.retries = dispatched.retries;
    Ok(summary)
}

fn enter(phase: RunPhase, job: &ResolvedJob) {
    tracing::info!(job = %job.job, operation = %job.operation.kind(), %phase, "Entering phase");
}

fn flush(log: &RunLog) {
    if let Err(e) = log.flush() {
        tracing::error!(error = %e, "Failed to flush run log");
    }
}

async fn blocking<T, F>(task: &'static str, f: F) -> Result<T, OrchestratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StateError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OrchestratorError::task(task, &e))?
        .map_err(OrchestratorError::from)
}

/// Back up the previous run log, then open it (truncated unless configured
/// otherwise). A run log that cannot be opened degrades to tracing only.
async fn open_run_log(
    job: &ResolvedJob,
    manager: &StateFileManager,
) -> Result<Arc<RunLog>, OrchestratorError> {
    let path = job.run_log.clone();
    let truncate = job.truncate_run_log;
    let manager = manager.clone();
    let log = blocking("run_log", move || {
        if truncate {
            manager.backup_and_rotate(
                &[StateFile::optional(path.clone())],
                &RunLog::disabled(),
            )?;
        }
        Ok(match RunLog::create(&path, truncate) {
            Ok(log) => log,
            Err(e) => {
                tracing::error!(error = %e, "Run log unavailable, logging to tracing only");
                RunLog::disabled()
            }
        })
    })
    .await?;
    Ok(Arc::new(log))
}

/// Back up every state file about to be written, promote the candidate
/// list, and truncate the fresh outputs.
async fn prepare_state_files(
    job: &ResolvedJob,
    manager: &StateFileManager,
    log: &Arc<RunLog>,
) -> Result<(), OrchestratorError> {
    let mut files = Vec::new();
    let mut fresh: Vec<(PathBuf, Option<&'static str>)> = Vec::new();
    if let Some(checkpoint) = &job.checkpoint {
        files.push(StateFile::optional(checkpoint.clone()));
    }
    for output in &job.outputs {
        if output.fresh {
            files.push(StateFile::required(output.path.clone()));
            fresh.push((output.path.clone(), output.header));
        } else {
            files.push(StateFile::optional(output.path.clone()));
        }
    }
    if let ResolvedSource::Catalog {
        listing: Some(listing),
        ..
    } = &job.source
    {
        files.push(StateFile::required(listing.clone()));
    }
    let promote = match &job.source {
        ResolvedSource::File {
            path,
            promote_from: Some(from),
            ..
        } => Some((path.clone(), from.clone())),
        _ => None,
    };

    let manager = manager.clone();
    let log = Arc::clone(log);
    blocking("backup", move || {
        let report = manager.backup_and_rotate(&files, &log)?;
        tracing::debug!(
            backed_up = report.backed_up.len(),
            skipped = report.skipped.len(),
            failed_optional = report.failed_optional.len(),
            pruned = report.pruned.len(),
            "State files backed up"
        );
        if let Some((dest, src)) = promote {
            manager.atomic_replace(&dest, &src, &log)?;
        }
        let (headed, plain): (Vec<_>, Vec<_>) =
            fresh.into_iter().partition(|(_, header)| header.is_some());
        manager.initialize(&plain.into_iter().map(|(path, _)| path).collect::<Vec<_>>())?;
        for (path, header) in headed {
            input::write_entities(&path, &[], header)?;
        }
        Ok(())
    })
    .await
}

async fn load(
    job: &ResolvedJob,
    service: Arc<dyn CatalogService>,
    log: &Arc<RunLog>,
) -> Result<Loaded, OrchestratorError> {
    let target = job.granularity();
    match &job.source {
        ResolvedSource::File { path, fields, .. } => {
            let path = path.clone();
            let fields = *fields;
            let load_log = Arc::clone(log);
            let InputLoad {
                keys,
                malformed,
                duplicates,
                ..
            } = blocking("load", move || {
                input::load_entities(&path, fields, target, &load_log)
            })
            .await?;
            log_loaded(log.as_ref(), keys.len(), malformed, duplicates);
            Ok(Loaded {
                summary: RunSummary {
                    discovered: keys.len() as u64,
                    malformed,
                    duplicates,
                    ..RunSummary::default()
                },
                keys,
            })
        }
        ResolvedSource::Catalog { databases, listing } => {
            log.info("Fetching entities from the catalog");
            let found = source::enumerate(
                service,
                job.dispatch.retry,
                target,
                databases,
                job.dispatch.concurrency,
            )
            .await;
            if found.incomplete_listings > 0 {
                log.warn(format!(
                    "{} listings ended early; re-run to pick up the rest",
                    found.incomplete_listings
                ));
            }
            if let Some(listing) = listing {
                let path = listing.clone();
                let entries = found.listing.clone();
                blocking("listing", move || {
                    input::write_entities(&path, &entries, None)
                })
                .await?;
                log.info(format!(
                    "Wrote {} entries to {}",
                    found.listing.len(),
                    listing.display()
                ));
            }
            log.info(format!("Discovered {} entities", found.keys.len()));
            Ok(Loaded {
                summary: RunSummary {
                    discovered: found.keys.len() as u64,
                    malformed: found.invalid_names,
                    incomplete_listings: found.incomplete_listings,
                    ..RunSummary::default()
                },
                keys: found.keys,
            })
        }
    }
}

fn log_loaded(log: &RunLog, keys: usize, malformed: u64, duplicates: u64) {
    log.info(format!(
        "Loaded {keys} entities ({malformed} malformed, {duplicates} duplicate lines skipped)"
    ));
}

async fn open_checkpoint(job: &ResolvedJob) -> Result<Option<CheckpointStore>, OrchestratorError> {
    let Some(path) = job.checkpoint.clone() else {
        return Ok(None);
    };
    blocking("checkpoint", move || CheckpointStore::open(&path).map(Some)).await
}

async fn open_outputs(
    job: &ResolvedJob,
) -> Result<HashMap<crate::operation::OutputKind, OutputSink>, OrchestratorError> {
    let outputs = job.output_paths();
    blocking("outputs", move || {
        outputs
            .into_iter()
            .map(|(kind, path)| OutputSink::append(&path).map(|sink| (kind, sink)))
            .collect()
    })
    .await
}

/// Inspect a resolved job without touching any state file.
///
/// # Errors
///
/// Returns [`OrchestratorError`] if the checkpoint exists but cannot be read.
pub async fn check_job(job: &ResolvedJob) -> Result<CheckReport, OrchestratorError> {
    let (input, promote_from) = match &job.source {
        ResolvedSource::File {
            path, promote_from, ..
        } => (
            Some((path.clone(), path.exists())),
            promote_from.as_ref().map(|p| (p.clone(), p.exists())),
        ),
        ResolvedSource::Catalog { .. } => (None, None),
    };

    let checkpointed = match job.checkpoint.clone() {
        Some(path) => {
            blocking("checkpoint", move || {
                CheckpointStore::load(&path).map(|loaded| loaded.set.len())
            })
            .await?
        }
        None => 0,
    };

    Ok(CheckReport {
        work_dir: job.work_dir.clone(),
        work_dir_fallback: job.work_dir_fallback,
        input,
        promote_from,
        checkpoint: job.checkpoint.clone(),
        checkpointed,
        outputs: job.output_paths(),
    })
}
