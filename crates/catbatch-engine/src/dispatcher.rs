//! Batched, bounded-concurrency dispatch of one operation over many entities.

use std::sync::Arc;

use tokio::task::JoinSet;

use catbatch_state::{CheckpointSet, RunLog};
use catbatch_types::{EntityKey, RetryPolicy, RunSummary, TaskOutcome, TaskRecord};

use crate::config::types::{ResourceConfig, DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use crate::operation::{Applied, EntityOperation};
use crate::recorder::RecorderHandle;
use crate::retry::{with_retry, Attempt};
use crate::service::CatalogService;

/// Batching and concurrency knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    pub concurrency: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&ResourceConfig> for DispatchOptions {
    fn from(resources: &ResourceConfig) -> Self {
        Self {
            concurrency: resources.concurrency,
            batch_size: resources.batch_size,
            retry: resources.retry.policy(),
        }
    }
}

/// Split `keys` into those still to do and the number already checkpointed.
#[must_use]
pub fn partition_pending(keys: Vec<EntityKey>, done: &CheckpointSet) -> (Vec<EntityKey>, u64) {
    let total = keys.len();
    let pending: Vec<EntityKey> = keys.into_iter().filter(|k| !done.contains(k)).collect();
    let already_done = (total - pending.len()) as u64;
    (pending, already_done)
}

struct Worker {
    operation: Arc<dyn EntityOperation>,
    service: Arc<dyn CatalogService>,
    recorder: RecorderHandle,
    retry: RetryPolicy,
    log: Arc<RunLog>,
}

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    options: DispatchOptions,
}

impl Dispatcher {
    #[must_use]
    pub fn new(options: DispatchOptions) -> Self {
        Self {
            options: DispatchOptions {
                concurrency: options.concurrency.max(1),
                batch_size: options.batch_size.max(1),
                retry: options.retry,
            },
        }
    }

    #[must_use]
    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    /// Apply `operation` to every entity and return the outcome counters.
    ///
    /// No per-entity outcome stops the run. The recorder is synced after each
    /// batch.
    pub async fn run(
        &self,
        entities: Vec<EntityKey>,
        operation: Arc<dyn EntityOperation>,
        service: Arc<dyn CatalogService>,
        recorder: &RecorderHandle,
        log: Arc<RunLog>,
    ) -> RunSummary {
        let worker = Arc::new(Worker {
            operation,
            service,
            recorder: recorder.clone(),
            retry: self.options.retry,
            log,
        });
        let mut summary = RunSummary::default();
        let batches = entities.len().div_ceil(self.options.batch_size);

        for (index, batch) in entities.chunks(self.options.batch_size).enumerate() {
            tracing::info!(
                batch = index + 1,
                batches,
                size = batch.len(),
                operation = %worker.operation.kind(),
                "Dispatching batch"
            );
            self.run_batch(batch, &worker, &mut summary).await;

            if let Err(e) = recorder.sync().await {
                worker
                    .log
                    .error(format!("Failed to sync checkpoint after batch {}: {e}", index + 1));
            }
        }

        tracing::info!(
            dispatched = summary.dispatched,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            retries = summary.retries,
            "Dispatch finished"
        );
        summary
    }

    async fn run_batch(&self, batch: &[EntityKey], worker: &Arc<Worker>, summary: &mut RunSummary) {
        let mut in_flight = JoinSet::new();
        let mut pending = batch.iter();

        loop {
            while in_flight.len() < self.options.concurrency {
                let Some(key) = pending.next() else { break };
                summary.dispatched += 1;
                in_flight.spawn(process_one(Arc::clone(worker), key.clone()));
            }
            match in_flight.join_next().await {
                Some(Ok(record)) => summary.record(&record),
                Some(Err(e)) => {
                    worker.log.error(format!("Worker task failed: {e}"));
                    summary.failed += 1;
                }
                None => break,
            }
        }
    }
}

async fn process_one(worker: Arc<Worker>, key: EntityKey) -> TaskRecord {
    let kind = worker.operation.kind();
    let dotted = key.dotted();
    worker.log.info(format!("Processing {kind} for {dotted}"));

    let operation = &worker.operation;
    let service = worker.service.as_ref();
    let target = &key;
    let report = with_retry(&worker.retry, kind.as_str(), move |_| {
        operation.apply(service, target)
    })
    .await;

    let outcome = match report.outcome {
        Attempt::Succeeded(Applied { outputs, detail }) => {
            // Counted only after the recorder has written it.
            match worker.recorder.record(key.clone(), outputs).await {
                Ok(_) => {
                    match detail {
                        Some(detail) => worker
                            .log
                            .info(format!("{kind} succeeded for {dotted} {detail}")),
                        None => worker.log.info(format!("{kind} succeeded for {dotted}")),
                    }
                    TaskOutcome::Success
                }
                Err(e) => {
                    worker
                        .log
                        .error(format!("Failed to record success for {dotted}: {e}"));
                    TaskOutcome::TransientError {
                        message: e.to_string(),
                    }
                }
            }
        }
        Attempt::Skipped(err) => {
            worker
                .log
                .warn(format!("Skipping {dotted}: not found ({})", err.message));
            TaskOutcome::Skipped {
                reason: err.to_string(),
            }
        }
        Attempt::Exhausted(err) => {
            worker.log.error(format!(
                "Giving up on {dotted} after {} attempts: {err}",
                report.attempts
            ));
            TaskOutcome::TransientError {
                message: err.to_string(),
            }
        }
        Attempt::Failed(err) => {
            worker.log.error(format!("Error processing {dotted}: {err}"));
            TaskOutcome::PermanentError {
                message: err.to_string(),
            }
        }
    };

    TaskRecord {
        key,
        attempts: report.attempts,
        outcome,
    }
}
