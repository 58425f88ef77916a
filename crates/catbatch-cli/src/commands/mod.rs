pub mod check;
pub mod run;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use catbatch_engine::config::types::ServiceConfig;
use catbatch_engine::{memory_service, parse_job, validate_job, CatalogService, JobConfig};

use crate::client::HttpCatalogClient;

/// Parse and validate a job file.
pub(crate) fn load_job(path: &Path) -> Result<JobConfig> {
    let config =
        parse_job(path).with_context(|| format!("Failed to parse job: {}", path.display()))?;
    validate_job(&config)?;
    Ok(config)
}

/// Catalog client for the job's `service` section.
pub(crate) fn build_service(config: &JobConfig) -> Result<Arc<dyn CatalogService>> {
    match &config.service {
        ServiceConfig::Http {
            endpoint,
            token,
            timeout_secs,
        } => Ok(Arc::new(HttpCatalogClient::new(
            endpoint,
            token.clone(),
            Duration::from_secs(*timeout_secs),
        )?)),
        ServiceConfig::Memory { .. } => {
            memory_service(config)?.context("Memory catalog could not be built")
        }
    }
}
