//! Remote catalog service boundary.
//!
//! The engine only talks to the catalog through [`CatalogService`]. Adapters
//! map their transport failures to [`ServiceError`] kinds; nothing past this
//! trait looks at status codes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use catbatch_types::{EntityKey, ServiceError};

/// Schedule state reported for tables with an active statistics schedule.
pub const SCHEDULED: &str = "SCHEDULED";

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl Page {
    /// Continuation token for the next request; an empty token ends the listing.
    #[must_use]
    pub fn continuation(&self) -> Option<&str> {
        self.next_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnMetadata>,
}

/// Statistics schedule of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl ScheduleSettings {
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.state == SCHEDULED
    }
}

/// Permission grant on a database, table or column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRequest {
    pub principal: String,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub grantable: Vec<String>,
}

/// Create-or-update request for a table's statistics schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub role: String,
    pub cron: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_id: Option<String>,
}

/// Hierarchical, paginated catalog with idempotent per-entity mutations.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn list_databases(&self, next_token: Option<&str>) -> Result<Page, ServiceError>;

    async fn list_tables(
        &self,
        database: &str,
        next_token: Option<&str>,
    ) -> Result<Page, ServiceError>;

    async fn get_table(&self, database: &str, table: &str) -> Result<TableMetadata, ServiceError>;

    async fn get_schedule_settings(
        &self,
        database: &str,
        table: &str,
    ) -> Result<ScheduleSettings, ServiceError>;

    async fn grant_access(
        &self,
        resource: &EntityKey,
        grant: &GrantRequest,
    ) -> Result<(), ServiceError>;

    async fn create_or_update_schedule(
        &self,
        table: &EntityKey,
        request: &ScheduleRequest,
    ) -> Result<(), ServiceError>;

    async fn stop_schedule(&self, table: &EntityKey) -> Result<(), ServiceError>;

    async fn delete_statistics(&self, column: &EntityKey) -> Result<(), ServiceError>;
}

/// `(database, table)` of a table-level key.
///
/// # Errors
///
/// Returns an `InvalidInput` error for database-level keys.
pub fn table_parts(key: &EntityKey) -> Result<(&str, &str), ServiceError> {
    key.table_name()
        .map(|table| (key.database_name(), table))
        .ok_or_else(|| {
            ServiceError::invalid_input("InvalidEntity", format!("{key} is not a table key"))
        })
}

/// `(database, table, column)` of a column-level key.
///
/// # Errors
///
/// Returns an `InvalidInput` error for coarser keys.
pub fn column_parts(key: &EntityKey) -> Result<(&str, &str, &str), ServiceError> {
    match (key.table_name(), key.column_name()) {
        (Some(table), Some(column)) => Ok((key.database_name(), table, column)),
        _ => Err(ServiceError::invalid_input(
            "InvalidEntity",
            format!("{key} is not a column key"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_ends_listing() {
        let page = Page {
            names: vec!["a".into()],
            next_token: Some(String::new()),
        };
        assert_eq!(page.continuation(), None);

        let page = Page {
            names: vec![],
            next_token: Some("2".into()),
        };
        assert_eq!(page.continuation(), Some("2"));
    }

    #[test]
    fn only_exact_scheduled_state_counts() {
        let settings = |state: &str| ScheduleSettings {
            state: state.into(),
            cron: None,
        };
        assert!(settings("SCHEDULED").is_scheduled());
        assert!(!settings("NOT_SCHEDULED").is_scheduled());
        assert!(!settings("STOPPED").is_scheduled());
    }

    #[test]
    fn key_parts_require_granularity() {
        let db = EntityKey::database("db").unwrap();
        let table = EntityKey::table("db", "t").unwrap();
        let column = EntityKey::column("db", "t", "c").unwrap();

        assert!(table_parts(&db).is_err());
        assert_eq!(table_parts(&column).unwrap(), ("db", "t"));
        assert!(column_parts(&table).is_err());
        assert_eq!(column_parts(&column).unwrap(), ("db", "t", "c"));
    }
}
