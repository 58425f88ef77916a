//! Per-entity operations applied by the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};

use catbatch_types::{EntityKey, Granularity, ServiceError};

use crate::config::types::{OperationConfig, OperationKind, RandomDays};
use crate::service::{column_parts, table_parts, CatalogService, GrantRequest, ScheduleRequest};

/// Output file a line is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Results,
    Existing,
    Missing,
}

impl OutputKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Results => "results",
            Self::Existing => "existing",
            Self::Missing => "missing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub kind: OutputKind,
    pub line: String,
}

impl OutputLine {
    pub fn new(kind: OutputKind, line: impl Into<String>) -> Self {
        Self {
            kind,
            line: line.into(),
        }
    }
}

/// What a successful `apply` produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub outputs: Vec<OutputLine>,
    /// Extra detail for the success log line.
    pub detail: Option<String>,
}

/// One idempotent action on one entity.
#[async_trait]
pub trait EntityOperation: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Granularity of the keys this operation accepts.
    fn granularity(&self) -> Granularity;

    /// Outputs this operation writes to on success.
    fn outputs(&self) -> &'static [OutputKind];

    /// Header line for an output, written when the file is initialized.
    fn header(&self, _kind: OutputKind) -> Option<&'static str> {
        None
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError>;
}

/// Build the operation a job configures.
#[must_use]
pub fn from_config(config: &OperationConfig) -> Arc<dyn EntityOperation> {
    match config.kind {
        OperationKind::GrantAccess => Arc::new(GrantAccess {
            level: config.granularity(),
            // Validation guarantees a grant for this kind.
            grant: config.grant.clone().unwrap_or_else(|| GrantRequest {
                principal: String::new(),
                permissions: Vec::new(),
                grantable: Vec::new(),
            }),
        }),
        OperationKind::CreateSchedule => Arc::new(CreateSchedule {
            role: config.role.clone().unwrap_or_default(),
            catalog_id: config.catalog_id.clone(),
            grant: config.grant.clone(),
            cron: match &config.schedule.cron {
                Some(cron) => CronSpec::Fixed(cron.clone()),
                None => CronSpec::Random(config.schedule.random.unwrap_or_default()),
            },
        }),
        OperationKind::StopSchedule => Arc::new(StopSchedule),
        OperationKind::DeleteColumnStatistics => Arc::new(DeleteColumnStatistics),
        OperationKind::AuditSchedules => Arc::new(AuditSchedules),
        OperationKind::ListColumns => Arc::new(ListColumns),
    }
}

/// Monthly cron `cron(m h d * ? *)` with a random minute, hour and day.
pub fn random_cron<R: Rng + ?Sized>(rng: &mut R, days: RandomDays) -> String {
    let minute = rng.gen_range(0..=59);
    let hour = rng.gen_range(0..=23);
    let day = rng.gen_range(days.min_day..=days.max_day.max(days.min_day));
    format!("cron({minute} {hour} {day} * ? *)")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronSpec {
    Fixed(String),
    Random(RandomDays),
}

impl CronSpec {
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Fixed(cron) => cron.clone(),
            Self::Random(days) => random_cron(&mut rand::thread_rng(), *days),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrantAccess {
    pub level: Granularity,
    pub grant: GrantRequest,
}

#[async_trait]
impl EntityOperation for GrantAccess {
    fn kind(&self) -> OperationKind {
        OperationKind::GrantAccess
    }

    fn granularity(&self) -> Granularity {
        self.level
    }

    fn outputs(&self) -> &'static [OutputKind] {
        &[OutputKind::Results]
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError> {
        service.grant_access(key, &self.grant).await?;
        Ok(Applied {
            outputs: vec![OutputLine::new(OutputKind::Results, key.to_string())],
            detail: Some(format!(
                "granted {} to {}",
                self.grant.permissions.join("/"),
                self.grant.principal
            )),
        })
    }
}

/// Optionally grant access, then create or update the statistics schedule.
#[derive(Debug, Clone)]
pub struct CreateSchedule {
    pub role: String,
    pub catalog_id: Option<String>,
    pub grant: Option<GrantRequest>,
    pub cron: CronSpec,
}

#[async_trait]
impl EntityOperation for CreateSchedule {
    fn kind(&self) -> OperationKind {
        OperationKind::CreateSchedule
    }

    fn granularity(&self) -> Granularity {
        Granularity::Table
    }

    fn outputs(&self) -> &'static [OutputKind] {
        &[OutputKind::Results]
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError> {
        table_parts(key)?;
        if let Some(grant) = &self.grant {
            service.grant_access(key, grant).await?;
            tracing::debug!(entity = %key, principal = grant.principal, "Granted access");
        }
        let request = ScheduleRequest {
            role: self.role.clone(),
            cron: self.cron.render(),
            catalog_id: self.catalog_id.clone(),
        };
        service.create_or_update_schedule(key, &request).await?;
        Ok(Applied {
            outputs: vec![OutputLine::new(
                OutputKind::Results,
                format!("{key},{}", request.cron),
            )],
            detail: Some(format!("with schedule {}", request.cron)),
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StopSchedule;

#[async_trait]
impl EntityOperation for StopSchedule {
    fn kind(&self) -> OperationKind {
        OperationKind::StopSchedule
    }

    fn granularity(&self) -> Granularity {
        Granularity::Table
    }

    fn outputs(&self) -> &'static [OutputKind] {
        &[OutputKind::Results]
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError> {
        table_parts(key)?;
        service.stop_schedule(key).await?;
        Ok(Applied {
            outputs: vec![OutputLine::new(OutputKind::Results, key.to_string())],
            detail: None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteColumnStatistics;

#[async_trait]
impl EntityOperation for DeleteColumnStatistics {
    fn kind(&self) -> OperationKind {
        OperationKind::DeleteColumnStatistics
    }

    fn granularity(&self) -> Granularity {
        Granularity::Column
    }

    fn outputs(&self) -> &'static [OutputKind] {
        &[OutputKind::Results]
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError> {
        column_parts(key)?;
        service.delete_statistics(key).await?;
        Ok(Applied {
            outputs: vec![OutputLine::new(OutputKind::Results, key.to_string())],
            detail: None,
        })
    }
}

/// Sort tables into those with an active schedule and those without.
#[derive(Debug, Clone, Copy)]
pub struct AuditSchedules;

#[async_trait]
impl EntityOperation for AuditSchedules {
    fn kind(&self) -> OperationKind {
        OperationKind::AuditSchedules
    }

    fn granularity(&self) -> Granularity {
        Granularity::Table
    }

    fn outputs(&self) -> &'static [OutputKind] {
        &[OutputKind::Existing, OutputKind::Missing]
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError> {
        let (db, table) = table_parts(key)?;
        let (kind, detail) = match service.get_schedule_settings(db, table).await {
            Ok(settings) if settings.is_scheduled() => (OutputKind::Existing, "schedule exists"),
            Ok(_) => (OutputKind::Missing, "schedule not active"),
            Err(err) if err.is_not_found() => (OutputKind::Missing, "no schedule settings"),
            Err(err) => return Err(err),
        };
        Ok(Applied {
            outputs: vec![OutputLine::new(kind, key.to_string())],
            detail: Some(detail.to_string()),
        })
    }
}

/// Expand a table into one `db,table,column` line per column.
#[derive(Debug, Clone, Copy)]
pub struct ListColumns;

#[async_trait]
impl EntityOperation for ListColumns {
    fn kind(&self) -> OperationKind {
        OperationKind::ListColumns
    }

    fn granularity(&self) -> Granularity {
        Granularity::Table
    }

    fn outputs(&self) -> &'static [OutputKind] {
        &[OutputKind::Results]
    }

    fn header(&self, kind: OutputKind) -> Option<&'static str> {
        (kind == OutputKind::Results).then_some(Granularity::Column.header())
    }

    async fn apply(
        &self,
        service: &dyn CatalogService,
        key: &EntityKey,
    ) -> Result<Applied, ServiceError> {
        let (db, table) = table_parts(key)?;
        let meta = service.get_table(db, table).await?;
        let mut ignored = 0usize;
        let outputs: Vec<OutputLine> = meta
            .columns
            .into_iter()
            .filter_map(|c| match EntityKey::column(db, table, &c.name) {
                Ok(column) => Some(OutputLine::new(OutputKind::Results, column.to_string())),
                Err(e) => {
                    tracing::warn!(table = %key, column = %c.name, error = %e, "Ignoring column name");
                    ignored += 1;
                    None
                }
            })
            .collect();
        let detail = if ignored > 0 {
            format!("{} columns ({ignored} unusable names ignored)", outputs.len())
        } else {
            format!("{} columns", outputs.len())
        };
        Ok(Applied {
            outputs,
            detail: Some(detail),
        })
    }
}
