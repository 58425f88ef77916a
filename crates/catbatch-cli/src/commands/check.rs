use std::path::Path;

use anyhow::{Context, Result};

use catbatch_engine::{check_job, resolve_job};

use super::{build_service, load_job};

/// Execute the `check` command: validate the job and report whether its
/// inputs and state files are ready, without modifying anything.
pub async fn execute(job_path: &Path) -> Result<()> {
    let config = load_job(job_path)?;
    println!("Job structure:     OK");

    let job = resolve_job(&config).context("Failed to prepare work directory")?;
    if job.work_dir_fallback {
        println!("Work dir:          FALLBACK {}", job.work_dir.display());
    } else {
        println!("Work dir:          OK {}", job.work_dir.display());
    }

    let service_ok = match build_service(&config) {
        Ok(_) => {
            println!("Catalog service:   OK");
            true
        }
        Err(e) => {
            println!("Catalog service:   FAILED\n  {e:#}");
            false
        }
    };

    let report = check_job(&job).await?;
    if let Some((path, exists)) = &report.input {
        print_file("Input", path, *exists);
    }
    if let Some((path, exists)) = &report.promote_from {
        print_file("Candidate list", path, *exists);
    }
    if let Some(checkpoint) = &report.checkpoint {
        println!(
            "Checkpoint:        {} ({} entries)",
            checkpoint.display(),
            report.checkpointed
        );
    }
    for (kind, path) in &report.outputs {
        println!("{:18} {}", format!("Output {}:", kind.as_str()), path.display());
    }

    if report.is_ready() && service_ok {
        println!("\nAll checks passed.");
        Ok(())
    } else {
        anyhow::bail!("One or more checks failed")
    }
}

fn print_file(label: &str, path: &Path, exists: bool) {
    let status = if exists { "OK" } else { "MISSING" };
    println!("{:18} {status} {}", format!("{label}:"), path.display());
}
