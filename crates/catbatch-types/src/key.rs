//! Entity keys addressing one catalog resource.
//!
//! A key is an ordered tuple `(database[, table[, column]])`. Its serialized
//! form is the comma-joined components, which is also the line format of
//! entity lists and checkpoint logs. Equality and hashing use that form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator between key components in files.
pub const FIELD_SEPARATOR: char = ',';

/// Depth of a key in the database → table → column hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Database,
    Table,
    Column,
}

impl Granularity {
    /// Number of fields a serialized key of this granularity carries.
    #[must_use]
    pub fn field_count(self) -> usize {
        match self {
            Self::Database => 1,
            Self::Table => 2,
            Self::Column => 3,
        }
    }

    /// Inverse of [`Granularity::field_count`].
    #[must_use]
    pub fn from_field_count(fields: usize) -> Option<Self> {
        match fields {
            1 => Some(Self::Database),
            2 => Some(Self::Table),
            3 => Some(Self::Column),
            _ => None,
        }
    }

    /// Header line written at the top of listing files of this granularity.
    #[must_use]
    pub fn header(self) -> &'static str {
        match self {
            Self::Database => "DatabaseName",
            Self::Table => "DatabaseName,TableName",
            Self::Column => "DatabaseName,TableName,ColumnName",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Table => "table",
            Self::Column => "column",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a line or component could not become an [`EntityKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("expected {expected} field(s), found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("unsupported number of fields: {0}")]
    UnsupportedFieldCount(usize),

    #[error("empty {0} name")]
    EmptyComponent(&'static str),

    #[error("{0} name contains a separator or line break")]
    InvalidComponent(&'static str),
}

/// Identifier of one catalog resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityKey {
    database: String,
    table: Option<String>,
    column: Option<String>,
}

fn validate(component: &str, what: &'static str) -> Result<String, KeyError> {
    let trimmed = component.trim();
    if trimmed.is_empty() {
        return Err(KeyError::EmptyComponent(what));
    }
    if trimmed.contains([FIELD_SEPARATOR, '\n', '\r']) {
        return Err(KeyError::InvalidComponent(what));
    }
    Ok(trimmed.to_string())
}

impl EntityKey {
    /// Key of a database.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the name is empty or contains a separator.
    pub fn database(database: &str) -> Result<Self, KeyError> {
        Ok(Self {
            database: validate(database, "database")?,
            table: None,
            column: None,
        })
    }

    /// Key of a table within a database.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if a name is empty or contains a separator.
    pub fn table(database: &str, table: &str) -> Result<Self, KeyError> {
        Ok(Self {
            database: validate(database, "database")?,
            table: Some(validate(table, "table")?),
            column: None,
        })
    }

    /// Key of a column within a table.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if a name is empty or contains a separator.
    pub fn column(database: &str, table: &str, column: &str) -> Result<Self, KeyError> {
        Ok(Self {
            database: validate(database, "database")?,
            table: Some(validate(table, "table")?),
            column: Some(validate(column, "column")?),
        })
    }

    /// Parse a serialized line that must have exactly the fields of `granularity`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] on a field-count mismatch or an invalid component.
    pub fn parse(line: &str, granularity: Granularity) -> Result<Self, KeyError> {
        let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split(FIELD_SEPARATOR).collect();
        let expected = granularity.field_count();
        if fields.len() != expected {
            return Err(KeyError::FieldCount {
                expected,
                found: fields.len(),
            });
        }
        Self::from_fields(&fields)
    }

    /// Parse a serialized line of any supported granularity.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the line has more than three fields or an
    /// invalid component.
    pub fn parse_any(line: &str) -> Result<Self, KeyError> {
        let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split(FIELD_SEPARATOR).collect();
        Self::from_fields(&fields)
    }

    fn from_fields(fields: &[&str]) -> Result<Self, KeyError> {
        match fields {
            [db] => Self::database(db),
            [db, table] => Self::table(db, table),
            [db, table, column] => Self::column(db, table, column),
            other => Err(KeyError::UnsupportedFieldCount(other.len())),
        }
    }

    #[must_use]
    pub fn granularity(&self) -> Granularity {
        match (&self.table, &self.column) {
            (None, _) => Granularity::Database,
            (Some(_), None) => Granularity::Table,
            (Some(_), Some(_)) => Granularity::Column,
        }
    }

    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database
    }

    #[must_use]
    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref()
    }

    #[must_use]
    pub fn column_name(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Truncate the key to a coarser granularity.
    ///
    /// Returns `None` when `granularity` is finer than the key itself.
    #[must_use]
    pub fn project(&self, granularity: Granularity) -> Option<Self> {
        if granularity > self.granularity() {
            return None;
        }
        Some(Self {
            database: self.database.clone(),
            table: if granularity >= Granularity::Table {
                self.table.clone()
            } else {
                None
            },
            column: if granularity == Granularity::Column {
                self.column.clone()
            } else {
                None
            },
        })
    }

    /// Dotted form used in log messages (`db.table.column`).
    #[must_use]
    pub fn dotted(&self) -> String {
        self.components().collect::<Vec<_>>().join(".")
    }

    fn components(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.database.as_str())
            .chain(self.table.as_deref())
            .chain(self.column.as_deref())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.database)?;
        if let Some(table) = &self.table {
            write!(f, "{FIELD_SEPARATOR}{table}")?;
        }
        if let Some(column) = &self.column {
            write!(f, "{FIELD_SEPARATOR}{column}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for EntityKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_any(&value)
    }
}

impl From<EntityKey> for String {
    fn from(key: EntityKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_table_key() {
        let key = EntityKey::parse("sales,orders", Granularity::Table).unwrap();
        assert_eq!(key.database_name(), "sales");
        assert_eq!(key.table_name(), Some("orders"));
        assert_eq!(key.column_name(), None);
        assert_eq!(key.to_string(), "sales,orders");
        assert_eq!(key.dotted(), "sales.orders");
    }

    #[test]
    fn parse_trims_components_and_line_endings() {
        let key = EntityKey::parse(" sales , orders \r\n", Granularity::Table).unwrap();
        assert_eq!(key.to_string(), "sales,orders");
    }

    #[test]
    fn single_field_line_is_rejected_for_table_granularity() {
        let err = EntityKey::parse("dbonly", Granularity::Table).unwrap_err();
        assert_eq!(
            err,
            KeyError::FieldCount {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn extra_fields_are_rejected_not_truncated() {
        let err = EntityKey::parse("a,b,c", Granularity::Table).unwrap_err();
        assert!(matches!(err, KeyError::FieldCount { found: 3, .. }));
    }

    #[test]
    fn empty_component_is_rejected() {
        assert_eq!(
            EntityKey::parse("db,", Granularity::Table).unwrap_err(),
            KeyError::EmptyComponent("table")
        );
        assert_eq!(
            EntityKey::parse(",tbl", Granularity::Table).unwrap_err(),
            KeyError::EmptyComponent("database")
        );
    }

    #[test]
    fn constructors_reject_separator() {
        assert_eq!(
            EntityKey::table("db", "a,b").unwrap_err(),
            KeyError::InvalidComponent("table")
        );
        assert_eq!(
            EntityKey::database("x\ny").unwrap_err(),
            KeyError::InvalidComponent("database")
        );
    }

    #[test]
    fn parse_any_infers_granularity() {
        assert_eq!(
            EntityKey::parse_any("db").unwrap().granularity(),
            Granularity::Database
        );
        assert_eq!(
            EntityKey::parse_any("db,t,c").unwrap().granularity(),
            Granularity::Column
        );
        assert_eq!(
            EntityKey::parse_any("a,b,c,d").unwrap_err(),
            KeyError::UnsupportedFieldCount(4)
        );
    }

    #[test]
    fn project_to_coarser_granularity() {
        let key = EntityKey::column("db", "t", "c").unwrap();
        assert_eq!(
            key.project(Granularity::Table).unwrap(),
            EntityKey::table("db", "t").unwrap()
        );
        assert_eq!(
            key.project(Granularity::Database).unwrap(),
            EntityKey::database("db").unwrap()
        );
        assert_eq!(key.project(Granularity::Column).unwrap(), key);
    }

    #[test]
    fn project_to_finer_granularity_is_none() {
        let key = EntityKey::table("db", "t").unwrap();
        assert!(key.project(Granularity::Column).is_none());
    }

    #[test]
    fn serde_uses_serialized_form() {
        let key = EntityKey::table("db", "t").unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"db,t\"");
        let back: EntityKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<EntityKey>("\"\"").is_err());
    }

    #[test]
    fn header_matches_field_count() {
        for g in [Granularity::Database, Granularity::Table, Granularity::Column] {
            assert_eq!(g.header().split(',').count(), g.field_count());
            assert_eq!(Granularity::from_field_count(g.field_count()), Some(g));
        }
    }

    proptest! {
        #[test]
        fn wrong_field_count_never_parses(fields in proptest::collection::vec("[a-z0-9_]{1,8}", 1..6)) {
            let line = fields.join(",");
            let result = EntityKey::parse(&line, Granularity::Table);
            if fields.len() == 2 {
                prop_assert_eq!(result.unwrap().to_string(), line);
            } else {
                prop_assert!(result.is_err());
            }
        }
    }
}
