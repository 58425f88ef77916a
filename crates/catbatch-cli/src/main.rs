mod client;
mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "catbatch",
    version,
    about = "Resumable batch operations over a data catalog"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a job
    Run {
        /// Path to job YAML file
        job: PathBuf,
        /// Maximum operations in flight
        #[arg(long)]
        concurrency: Option<usize>,
        /// Entities per batch; the checkpoint is synced after each
        #[arg(long)]
        batch_size: Option<usize>,
        /// Attempts per entity on transient errors
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Validate a job and report input and state readiness
    Check {
        /// Path to job YAML file
        job: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run {
            job,
            concurrency,
            batch_size,
            max_attempts,
        } => {
            let overrides = commands::run::Overrides {
                concurrency,
                batch_size,
                max_attempts,
            };
            let code = commands::run::execute(&job, &overrides).await?;
            if code != 0 {
                std::process::exit(code);
            }
            Ok(())
        }
        Commands::Check { job } => commands::check::execute(&job).await,
    }
}
