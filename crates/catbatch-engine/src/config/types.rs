//! Job configuration types (deserialized from YAML).

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use catbatch_types::retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use catbatch_types::{Granularity, RetryPolicy};

use crate::service::GrantRequest;

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_MIN_DAY: u32 = 5;
pub const DEFAULT_MAX_DAY: u32 = 25;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Top-level job definition.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub version: String,
    pub job: String,
    pub operation: OperationConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub service: ServiceConfig,
}

/// Per-entity operation to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    GrantAccess,
    CreateSchedule,
    StopSchedule,
    DeleteColumnStatistics,
    AuditSchedules,
    ListColumns,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GrantAccess => "grant_access",
            Self::CreateSchedule => "create_schedule",
            Self::StopSchedule => "stop_schedule",
            Self::DeleteColumnStatistics => "delete_column_statistics",
            Self::AuditSchedules => "audit_schedules",
            Self::ListColumns => "list_columns",
        }
    }

    /// Whether the operation changes the catalog (and so checkpoints by default).
    #[must_use]
    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::AuditSchedules | Self::ListColumns)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    pub kind: OperationKind,
    /// Resource level for `grant_access`; defaults to table.
    #[serde(default)]
    pub level: Option<Granularity>,
    /// Role the statistics schedule runs as.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub catalog_id: Option<String>,
    /// Grant applied before (or, for `grant_access`, instead of) the operation.
    #[serde(default)]
    pub grant: Option<GrantRequest>,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl OperationConfig {
    /// Granularity of the keys the operation acts on.
    #[must_use]
    pub fn granularity(&self) -> Granularity {
        match self.kind {
            OperationKind::GrantAccess => self.level.unwrap_or(Granularity::Table),
            OperationKind::DeleteColumnStatistics => Granularity::Column,
            OperationKind::CreateSchedule
            | OperationKind::StopSchedule
            | OperationKind::AuditSchedules
            | OperationKind::ListColumns => Granularity::Table,
        }
    }
}

/// Cron used by `create_schedule`: a fixed expression, or a random monthly
/// slot with the day drawn from `random.min_day..=random.max_day`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub random: Option<RandomDays>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RandomDays {
    #[serde(default = "default_min_day")]
    pub min_day: u32,
    #[serde(default = "default_max_day")]
    pub max_day: u32,
}

impl Default for RandomDays {
    fn default() -> Self {
        Self {
            min_day: DEFAULT_MIN_DAY,
            max_day: DEFAULT_MAX_DAY,
        }
    }
}

fn default_min_day() -> u32 {
    DEFAULT_MIN_DAY
}

fn default_max_day() -> u32 {
    DEFAULT_MAX_DAY
}

/// Where entity keys come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A comma-separated entity list.
    File {
        path: PathBuf,
        /// Fields per line; defaults to the operation's granularity.
        #[serde(default)]
        fields: Option<usize>,
        /// Candidate list copied over `path` before loading.
        #[serde(default)]
        promote_from: Option<PathBuf>,
    },
    /// The catalog listing API.
    Catalog {
        /// Restrict to these databases; empty lists every database.
        #[serde(default)]
        databases: Vec<String>,
        /// Write the discovered `db,table` listing here.
        #[serde(default)]
        listing: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// Base for relative paths; defaults to the current directory.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Absent: per-operation default. `null`: no checkpoint.
    #[serde(default, deserialize_with = "explicit_null")]
    pub checkpoint: Option<Option<PathBuf>>,
    #[serde(default = "default_run_log")]
    pub run_log: PathBuf,
    #[serde(default = "default_true")]
    pub truncate_run_log: bool,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub outputs: OutputsConfig,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            work_dir: None,
            checkpoint: None,
            run_log: default_run_log(),
            truncate_run_log: true,
            backup: BackupConfig::default(),
            outputs: OutputsConfig::default(),
        }
    }
}

/// Distinguish a missing key (`None`) from an explicit `null` (`Some(None)`).
fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_run_log() -> PathBuf {
    PathBuf::from("run.log")
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackupConfig {
    /// Shared backup directory (relative to `work_dir`).
    Directory {
        #[serde(default = "default_backup_dir")]
        dir: PathBuf,
        #[serde(default)]
        keep: Option<usize>,
    },
    /// Backups next to each file.
    Sibling {
        #[serde(default)]
        keep: Option<usize>,
    },
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self::Directory {
            dir: default_backup_dir(),
            keep: None,
        }
    }
}

impl BackupConfig {
    #[must_use]
    pub fn keep(&self) -> Option<usize> {
        match self {
            Self::Directory { keep, .. } | Self::Sibling { keep } => *keep,
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("bkp_log")
}

/// Output files; unset entries fall back to per-operation defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputsConfig {
    #[serde(default)]
    pub results: Option<PathBuf>,
    #[serde(default)]
    pub existing: Option<PathBuf>,
    #[serde(default)]
    pub missing: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            retry: RetryConfig::default(),
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: default_delay_ms(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            std::time::Duration::from_millis(self.delay_ms),
        )
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delay_ms() -> u64 {
    u64::try_from(DEFAULT_RETRY_DELAY.as_millis()).unwrap_or(u64::MAX)
}

/// Remote catalog to talk to.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceConfig {
    Http {
        endpoint: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    /// In-process catalog loaded from a YAML fixture.
    Memory {
        fixture: PathBuf,
        #[serde(default)]
        page_size: Option<usize>,
    },
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
version: "1.0"
job: stop
operation:
  kind: stop_schedule
source:
  kind: file
  path: tables.txt
service:
  kind: memory
  fixture: catalog.yaml
"#;

    #[test]
    fn defaults_fill_in() {
        let config: JobConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.resources.concurrency, 5);
        assert_eq!(config.resources.batch_size, 1000);
        assert_eq!(config.resources.retry.max_attempts, 3);
        assert_eq!(config.resources.retry.delay_ms, 2000);
        assert_eq!(config.state.run_log, PathBuf::from("run.log"));
        assert!(config.state.truncate_run_log);
        assert_eq!(config.state.checkpoint, None);
        assert_eq!(config.state.backup, BackupConfig::default());
        assert_eq!(config.operation.granularity(), Granularity::Table);
    }

    #[test]
    fn explicit_null_checkpoint_disables() {
        let yaml = format!("{MINIMAL}state:\n  checkpoint: null\n");
        let config: JobConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.state.checkpoint, Some(None));

        let yaml = format!("{MINIMAL}state:\n  checkpoint: done.txt\n");
        let config: JobConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            config.state.checkpoint,
            Some(Some(PathBuf::from("done.txt")))
        );
    }

    #[test]
    fn tagged_sections_parse() {
        let yaml = r#"
version: "1.0"
job: audit
operation:
  kind: grant_access
  level: column
  grant: { principal: "arn:role", permissions: [SELECT] }
source:
  kind: catalog
  databases: [sales]
  listing: all_table_list.txt
state:
  backup: { mode: sibling, keep: 3 }
service:
  kind: http
  endpoint: http://localhost:8080
"#;
        let config: JobConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.operation.granularity(), Granularity::Column);
        assert!(matches!(
            config.source,
            SourceConfig::Catalog { ref databases, .. } if databases == &["sales".to_string()]
        ));
        assert_eq!(config.state.backup.keep(), Some(3));
        assert!(matches!(
            config.service,
            ServiceConfig::Http { timeout_secs: 30, .. }
        ));
        assert!(config.operation.grant.unwrap().grantable.is_empty());
    }

    #[test]
    fn only_audit_and_listing_are_read_only() {
        assert!(OperationKind::CreateSchedule.is_mutation());
        assert!(OperationKind::DeleteColumnStatistics.is_mutation());
        assert!(!OperationKind::AuditSchedules.is_mutation());
        assert!(!OperationKind::ListColumns.is_mutation());
    }
}
