//! In-process [`CatalogService`] backed by a YAML fixture.
//!
//! Serves rehearsal runs (`service.kind: memory`) and the test suites. Every
//! call is counted per `(CallKind, key)` and faults can be injected for any
//! call, either permanently or for a number of calls.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use catbatch_types::{EntityKey, Granularity, ServiceError};

use crate::service::{
    column_parts, table_parts, CatalogService, ColumnMetadata, GrantRequest, Page,
    ScheduleRequest, ScheduleSettings, TableMetadata, SCHEDULED,
};

pub const DEFAULT_PAGE_SIZE: usize = 100;

/// State reported after a schedule has been stopped.
pub const NOT_SCHEDULED: &str = "NOT_SCHEDULED";

/// Which service method a counter or fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    ListDatabases,
    ListTables,
    GetTable,
    GetSchedule,
    GrantAccess,
    CreateSchedule,
    StopSchedule,
    DeleteStatistics,
}

impl CallKind {
    #[must_use]
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::GrantAccess | Self::CreateSchedule | Self::StopSchedule | Self::DeleteStatistics
        )
    }
}

/// Fixture file layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogFixture {
    #[serde(default)]
    pub databases: Vec<DatabaseFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseFixture {
    pub name: String,
    #[serde(default)]
    pub tables: Vec<TableFixture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableFixture {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub schedule: Option<ScheduleSettings>,
}

#[derive(Debug, Clone, Default)]
struct TableState {
    columns: Vec<String>,
    /// Columns that currently have statistics.
    statistics: BTreeSet<String>,
    schedule: Option<ScheduleSettings>,
}

#[derive(Debug)]
struct Fault {
    error: ServiceError,
    /// `None` fails every call.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct Inner {
    databases: BTreeMap<String, BTreeMap<String, TableState>>,
    grants: BTreeMap<String, GrantRequest>,
    calls: HashMap<(CallKind, String), u32>,
    faults: HashMap<(CallKind, String), Fault>,
}

/// Fixture-backed catalog with call accounting and fault injection.
#[derive(Debug)]
pub struct InMemoryCatalog {
    page_size: usize,
    inner: Mutex<Inner>,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new(CatalogFixture::default())
    }
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new(fixture: CatalogFixture) -> Self {
        let mut inner = Inner::default();
        for db in fixture.databases {
            let tables = inner.databases.entry(db.name).or_default();
            for table in db.tables {
                tables.insert(
                    table.name,
                    TableState {
                        statistics: table.columns.iter().cloned().collect(),
                        columns: table.columns,
                        schedule: table.schedule,
                    },
                );
            }
        }
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            inner: Mutex::new(inner),
        }
    }

    /// Load a fixture file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid fixture.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog fixture: {}", path.display()))?;
        let fixture: CatalogFixture =
            serde_yaml::from_str(&content).context("Failed to parse catalog fixture YAML")?;
        Ok(Self::new(fixture))
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Add a table (and its database) with the given columns.
    pub fn add_table(&self, database: &str, table: &str, columns: &[&str]) {
        let mut inner = self.lock();
        inner
            .databases
            .entry(database.to_string())
            .or_default()
            .insert(
                table.to_string(),
                TableState {
                    columns: columns.iter().map(ToString::to_string).collect(),
                    statistics: columns.iter().map(ToString::to_string).collect(),
                    schedule: None,
                },
            );
    }

    /// Make calls of `kind` for `key` fail with `error`.
    ///
    /// `key` is `""` for database listings, the database name for table
    /// listings, and the serialized entity key otherwise. With `times` set,
    /// only that many calls fail.
    pub fn fail(&self, kind: CallKind, key: &str, error: ServiceError, times: Option<u32>) {
        self.lock().faults.insert(
            (kind, key.to_string()),
            Fault {
                error,
                remaining: times,
            },
        );
    }

    /// Calls of `kind` made for `key`.
    #[must_use]
    pub fn calls(&self, kind: CallKind, key: &str) -> u32 {
        self.lock()
            .calls
            .get(&(kind, key.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Calls of `kind` across all keys.
    #[must_use]
    pub fn total_calls(&self, kind: CallKind) -> u32 {
        self.lock()
            .calls
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|(_, n)| n)
            .sum()
    }

    /// Mutation calls of any kind.
    #[must_use]
    pub fn mutation_calls(&self) -> u32 {
        self.lock()
            .calls
            .iter()
            .filter(|((k, _), _)| k.is_mutation())
            .map(|(_, n)| n)
            .sum()
    }

    #[must_use]
    pub fn schedule(&self, database: &str, table: &str) -> Option<ScheduleSettings> {
        self.lock()
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .and_then(|t| t.schedule.clone())
    }

    #[must_use]
    pub fn grant(&self, resource: &EntityKey) -> Option<GrantRequest> {
        self.lock().grants.get(&resource.to_string()).cloned()
    }

    #[must_use]
    pub fn has_statistics(&self, database: &str, table: &str, column: &str) -> bool {
        self.lock()
            .databases
            .get(database)
            .and_then(|tables| tables.get(table))
            .is_some_and(|t| t.statistics.contains(column))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Count the call and apply any injected fault, returning the guard.
    fn enter(&self, kind: CallKind, key: &str) -> Result<MutexGuard<'_, Inner>, ServiceError> {
        let mut inner = self.lock();
        *inner.calls.entry((kind, key.to_string())).or_default() += 1;
        let fault_key = (kind, key.to_string());
        if let Some(fault) = inner.faults.get_mut(&fault_key) {
            let error = fault.error.clone();
            match &mut fault.remaining {
                None => return Err(error),
                Some(0) => {}
                Some(n) => {
                    *n -= 1;
                    return Err(error);
                }
            }
        }
        Ok(inner)
    }

    fn page(&self, names: Vec<String>, token: Option<&str>) -> Result<Page, ServiceError> {
        let start = match token {
            None | Some("") => 0,
            Some(t) => t.parse::<usize>().map_err(|_| {
                ServiceError::invalid_input("InvalidToken", format!("bad continuation token {t}"))
            })?,
        };
        let end = (start + self.page_size).min(names.len());
        let next_token = (end < names.len()).then(|| end.to_string());
        Ok(Page {
            names: names.get(start..end).map(<[String]>::to_vec).unwrap_or_default(),
            next_token,
        })
    }
}

fn not_found(what: impl std::fmt::Display) -> ServiceError {
    ServiceError::not_found("EntityNotFound", format!("{what} not found"))
}

impl Inner {
    fn table_mut(&mut self, database: &str, table: &str) -> Result<&mut TableState, ServiceError> {
        self.databases
            .get_mut(database)
            .ok_or_else(|| not_found(format!("database {database}")))?
            .get_mut(table)
            .ok_or_else(|| not_found(format!("table {database}.{table}")))
    }

    fn exists(&self, key: &EntityKey) -> bool {
        let Some(tables) = self.databases.get(key.database_name()) else {
            return false;
        };
        match (key.table_name(), key.column_name()) {
            (None, _) => true,
            (Some(t), None) => tables.contains_key(t),
            (Some(t), Some(c)) => tables
                .get(t)
                .is_some_and(|state| state.columns.iter().any(|col| col == c)),
        }
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalog {
    async fn list_databases(&self, next_token: Option<&str>) -> Result<Page, ServiceError> {
        let names: Vec<String> = {
            let inner = self.enter(CallKind::ListDatabases, "")?;
            let names = inner.databases.keys().cloned().collect();
            names
        };
        self.page(names, next_token)
    }

    async fn list_tables(
        &self,
        database: &str,
        next_token: Option<&str>,
    ) -> Result<Page, ServiceError> {
        let names: Vec<String> = {
            let inner = self.enter(CallKind::ListTables, database)?;
            let Some(tables) = inner.databases.get(database) else {
                return Err(not_found(format!("database {database}")));
            };
            let names = tables.keys().cloned().collect();
            names
        };
        self.page(names, next_token)
    }

    async fn get_table(&self, database: &str, table: &str) -> Result<TableMetadata, ServiceError> {
        let key = format!("{database},{table}");
        let mut inner = self.enter(CallKind::GetTable, &key)?;
        let columns = inner
            .table_mut(database, table)?
            .columns
            .iter()
            .map(|name| ColumnMetadata { name: name.clone() })
            .collect();
        Ok(TableMetadata {
            name: table.to_string(),
            columns,
        })
    }

    async fn get_schedule_settings(
        &self,
        database: &str,
        table: &str,
    ) -> Result<ScheduleSettings, ServiceError> {
        let key = format!("{database},{table}");
        let mut inner = self.enter(CallKind::GetSchedule, &key)?;
        let schedule = inner.table_mut(database, table)?.schedule.clone();
        schedule.ok_or_else(|| not_found(format!("schedule settings for {database}.{table}")))
    }

    async fn grant_access(
        &self,
        resource: &EntityKey,
        grant: &GrantRequest,
    ) -> Result<(), ServiceError> {
        let key = resource.to_string();
        let mut inner = self.enter(CallKind::GrantAccess, &key)?;
        if !inner.exists(resource) {
            return Err(not_found(format!("{} {}", resource.granularity(), resource.dotted())));
        }
        inner.grants.insert(key, grant.clone());
        Ok(())
    }

    async fn create_or_update_schedule(
        &self,
        table: &EntityKey,
        request: &ScheduleRequest,
    ) -> Result<(), ServiceError> {
        let (db, t) = table_parts(table)?;
        let mut inner = self.enter(CallKind::CreateSchedule, &table.to_string())?;
        inner.table_mut(db, t)?.schedule = Some(ScheduleSettings {
            state: SCHEDULED.to_string(),
            cron: Some(request.cron.clone()),
        });
        Ok(())
    }

    async fn stop_schedule(&self, table: &EntityKey) -> Result<(), ServiceError> {
        let (db, t) = table_parts(table)?;
        let mut inner = self.enter(CallKind::StopSchedule, &table.to_string())?;
        let schedule = inner
            .table_mut(db, t)?
            .schedule
            .as_mut()
            .ok_or_else(|| not_found(format!("schedule for {db}.{t}")))?;
        schedule.state = NOT_SCHEDULED.to_string();
        Ok(())
    }

    async fn delete_statistics(&self, column: &EntityKey) -> Result<(), ServiceError> {
        let (db, t, c) = column_parts(column)?;
        let mut inner = self.enter(CallKind::DeleteStatistics, &column.to_string())?;
        let state = inner.table_mut(db, t)?;
        if !state.statistics.remove(c) {
            return Err(not_found(format!("statistics for column {db}.{t}.{c}")));
        }
        Ok(())
    }
}

impl InMemoryCatalog {
    /// Number of entities at `granularity` currently in the catalog.
    #[must_use]
    pub fn entity_count(&self, granularity: Granularity) -> usize {
        let inner = self.lock();
        match granularity {
            Granularity::Database => inner.databases.len(),
            Granularity::Table => inner.databases.values().map(BTreeMap::len).sum(),
            Granularity::Column => inner
                .databases
                .values()
                .flat_map(BTreeMap::values)
                .map(|t| t.columns.len())
                .sum(),
        }
    }
}
