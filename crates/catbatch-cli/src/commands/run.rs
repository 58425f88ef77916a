use std::path::Path;

use anyhow::{Context, Result};

use catbatch_engine::{resolve_job, run_job, JobConfig, RunReport};

use super::{build_service, load_job};

/// Resource settings given on the command line.
#[derive(Debug, Default)]
pub struct Overrides {
    pub concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<u32>,
}

impl Overrides {
    fn apply(&self, config: &mut JobConfig) {
        if let Some(concurrency) = self.concurrency {
            config.resources.concurrency = concurrency;
        }
        if let Some(batch_size) = self.batch_size {
            config.resources.batch_size = batch_size;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.resources.retry.max_attempts = max_attempts;
        }
    }
}

/// Execute the `run` command: parse, validate, resolve and run a job.
///
/// Returns the process exit code for the finished run.
pub async fn execute(job_path: &Path, overrides: &Overrides) -> Result<i32> {
    let mut config = load_job(job_path)?;
    overrides.apply(&mut config);
    // Overrides may have broken a constraint the file satisfied.
    catbatch_engine::validate_job(&config)?;

    tracing::info!(
        job = %config.job,
        operation = %config.operation.kind,
        concurrency = config.resources.concurrency,
        batch_size = config.resources.batch_size,
        max_attempts = config.resources.retry.max_attempts,
        "Job validated"
    );

    let job = resolve_job(&config).context("Failed to prepare work directory")?;
    let service = build_service(&config)?;
    let report = run_job(&job, service)
        .await
        .with_context(|| format!("Job '{}' aborted before dispatch", config.job))?;

    print_report(&report);
    Ok(report.exit_code())
}

fn print_report(report: &RunReport) {
    let s = &report.summary;
    println!(
        "Job '{}' ({}) {}.",
        report.job, report.operation, report.status
    );
    println!("  Discovered:      {}", s.discovered);
    println!("  Already done:    {}", s.already_done);
    println!("  Dispatched:      {}", s.dispatched);
    println!("  Processed:       {}", s.processed);
    println!("  Skipped:         {}", s.skipped);
    println!("  Failed:          {}", s.failed);
    if s.retries > 0 {
        println!("  Retries:         {}", s.retries);
    }
    if s.malformed > 0 || s.duplicates > 0 {
        println!("  Malformed:       {}", s.malformed);
        println!("  Duplicates:      {}", s.duplicates);
    }
    if s.incomplete_listings > 0 {
        println!("  Incomplete listings: {}", s.incomplete_listings);
    }
    println!("  Duration:        {:.2}s", report.duration.as_secs_f64());
    println!("  Work dir:        {}", report.work_dir.display());
    if let Some(checkpoint) = &report.checkpoint {
        println!("  Checkpoint:      {}", checkpoint.display());
    }
    for (kind, path) in &report.outputs {
        println!("  Output ({}): {}", kind.as_str(), path.display());
    }
    if let Some(run_log) = &report.run_log {
        println!("  Run log:         {}", run_log.display());
    }

    // Machine-readable summary for wrappers and schedulers
    let json = serde_json::json!({
        "job": report.job,
        "operation": report.operation,
        "status": report.status,
        "summary": s,
        "duration_secs": report.duration.as_secs_f64(),
    });
    println!("@@SUMMARY_JSON@@{json}");
}
