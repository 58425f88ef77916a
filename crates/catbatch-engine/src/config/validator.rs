//! Semantic validation for parsed job configuration values.

use anyhow::{bail, Result};
use catbatch_types::Granularity;

use crate::config::types::{
    JobConfig, OperationConfig, OperationKind, ServiceConfig, SourceConfig, StateConfig,
};

/// Validate a parsed job configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the job config.
pub fn validate_job(config: &JobConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(format!(
            "Unsupported job version '{}', expected '1.0'",
            config.version
        ));
    }

    if config.job.trim().is_empty() {
        errors.push("Job name must not be empty".to_string());
    }

    validate_operation(&config.operation, &mut errors);
    validate_source(config, &mut errors);
    validate_state(&config.state, &mut errors);

    if config.resources.concurrency == 0 {
        errors.push("concurrency must be at least 1".to_string());
    }
    if config.resources.batch_size == 0 {
        errors.push("batch_size must be at least 1".to_string());
    }
    if config.resources.retry.max_attempts == 0 {
        errors.push("retry.max_attempts must be at least 1".to_string());
    }

    match &config.service {
        ServiceConfig::Http {
            endpoint,
            timeout_secs,
            ..
        } => {
            if endpoint.trim().is_empty() {
                errors.push("service.endpoint must not be empty".to_string());
            }
            if *timeout_secs == 0 {
                errors.push("service.timeout_secs must be > 0".to_string());
            }
        }
        ServiceConfig::Memory { page_size, .. } => {
            if *page_size == Some(0) {
                errors.push("service.page_size must be at least 1".to_string());
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Job validation failed:\n  - {}", errors.join("\n  - "));
    }
}

fn validate_operation(op: &OperationConfig, errors: &mut Vec<String>) {
    if let Some(grant) = &op.grant {
        if grant.principal.trim().is_empty() {
            errors.push("operation.grant.principal must not be empty".to_string());
        }
        if grant.permissions.is_empty() {
            errors.push("operation.grant.permissions must not be empty".to_string());
        }
        if let Some(p) = grant.grantable.iter().find(|g| !grant.permissions.contains(g)) {
            errors.push(format!(
                "operation.grant.grantable '{p}' is not among the granted permissions"
            ));
        }
    }

    match op.kind {
        OperationKind::GrantAccess => {
            if op.grant.is_none() {
                errors.push("grant_access requires operation.grant".to_string());
            }
        }
        OperationKind::CreateSchedule => {
            if op.role.as_deref().map_or(true, |r| r.trim().is_empty()) {
                errors.push("create_schedule requires operation.role".to_string());
            }
            if op.schedule.cron.is_some() && op.schedule.random.is_some() {
                errors.push("operation.schedule: set either cron or random, not both".to_string());
            }
            if let Some(cron) = &op.schedule.cron {
                if !(cron.starts_with("cron(") && cron.ends_with(')')) {
                    errors.push(format!(
                        "operation.schedule.cron '{cron}' must look like cron(...)"
                    ));
                }
            }
            if let Some(days) = op.schedule.random {
                if !(1..=28).contains(&days.min_day) || !(1..=28).contains(&days.max_day) {
                    errors.push("operation.schedule.random days must be within 1-28".to_string());
                }
                if days.min_day > days.max_day {
                    errors.push(format!(
                        "operation.schedule.random min_day {} is after max_day {}",
                        days.min_day, days.max_day
                    ));
                }
            }
        }
        OperationKind::StopSchedule
        | OperationKind::DeleteColumnStatistics
        | OperationKind::AuditSchedules
        | OperationKind::ListColumns => {
            if op.grant.is_some() {
                errors.push(format!("{} does not take operation.grant", op.kind));
            }
        }
    }

    if op.level.is_some() && op.kind != OperationKind::GrantAccess {
        errors.push(format!("{} does not take operation.level", op.kind));
    }
}

fn validate_source(config: &JobConfig, errors: &mut Vec<String>) {
    let required = config.operation.granularity();
    match &config.source {
        SourceConfig::File { path, fields, .. } => {
            if path.as_os_str().is_empty() {
                errors.push("source.path must not be empty".to_string());
            }
            if let Some(fields) = *fields {
                match Granularity::from_field_count(fields) {
                    None => errors.push(format!("source.fields must be 1-3, got {fields}")),
                    Some(g) if g < required => errors.push(format!(
                        "source.fields {fields} is too coarse for {} ({} fields required)",
                        config.operation.kind,
                        required.field_count()
                    )),
                    Some(_) => {}
                }
            }
        }
        SourceConfig::Catalog { databases, .. } => {
            if let Some(db) = databases.iter().find(|d| d.trim().is_empty()) {
                errors.push(format!("source.databases contains an empty name '{db}'"));
            }
        }
    }
}

fn validate_state(state: &StateConfig, errors: &mut Vec<String>) {
    if state.run_log.as_os_str().is_empty() {
        errors.push("state.run_log must not be empty".to_string());
    }
    if state.backup.keep() == Some(0) {
        errors.push("state.backup.keep must be at least 1".to_string());
    }
}
