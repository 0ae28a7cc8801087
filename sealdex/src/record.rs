//! Row model shared with the record store, and search filters over it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Columns that are never searched by substring.
pub const RESERVED_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Name of the hash column for `field`.
#[must_use]
pub fn hash_column(field: &str) -> String {
    format!("{field}_hash")
}

/// Name of the optional plaintext backup column for `field`.
#[must_use]
pub fn backup_column(field: &str) -> String {
    format!("{field}_backup")
}

/// Name of the token attribute for `field` in search documents.
#[must_use]
pub fn parts_attribute(field: &str) -> String {
    format!("{field}_parts")
}

/// One row of a record type.
///
/// Attributes are addressed by column name. Values are JSON scalars; text
/// columns hold `Value::String`, missing and null columns are equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key.
    pub id: String,
    /// Creation timestamp, if the row tracks one.
    pub created_at: Option<DateTime<Utc>>,
    /// Remaining columns.
    pub attributes: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), created_at: None, attributes: BTreeMap::new() }
    }

    /// Sets the creation timestamp.
    #[must_use]
    pub fn created(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Builder form of [`Record::set`].
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    /// Returns the raw value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column).filter(|v| !v.is_null())
    }

    /// Returns the value of a text column.
    #[must_use]
    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Writes a column.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(column.into(), value.into());
    }

    /// Removes a column, returning its previous value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.attributes.remove(column)
    }

    /// True when the column is missing, null, or an empty string.
    #[must_use]
    pub fn is_blank(&self, column: &str) -> bool {
        match self.get(column) {
            None => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }

    /// Renders a column for substring matching; strings as-is, numbers and
    /// booleans via their JSON text.
    fn searchable_text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

/// Physical columns of a record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    table: String,
    columns: Vec<String>,
}

impl TableSchema {
    /// Creates a schema description.
    #[must_use]
    pub fn new<I, S>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { table: table.into(), columns: columns.into_iter().map(Into::into).collect() }
    }

    /// Returns the table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns all column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// True if the table has the column.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// A single predicate over one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Clause {
    /// `column = value`
    Equals {
        /// Column name
        column: String,
        /// Exact value
        value: String,
    },
    /// `column LIKE %needle%`, case-insensitive
    Contains {
        /// Column name
        column: String,
        /// Substring to look for
        needle: String,
    },
}

impl Clause {
    /// Evaluates the clause against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Equals { column, value } => {
                column_text(record, column).is_some_and(|actual| actual == *value)
            }
            Self::Contains { column, needle } => column_text(record, column)
                .is_some_and(|actual| actual.to_lowercase().contains(&needle.to_lowercase())),
        }
    }

    /// Column the clause reads.
    #[must_use]
    pub fn column(&self) -> &str {
        match self {
            Self::Equals { column, .. } | Self::Contains { column, .. } => column,
        }
    }
}

fn column_text(record: &Record, column: &str) -> Option<String> {
    if column == "id" {
        return Some(record.id.clone());
    }
    record.searchable_text(column)
}

/// Result of a search: which records the caller should load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchFilter {
    /// Records whose primary key is in the list (remote index hits, in rank order).
    Ids(Vec<String>),
    /// Records satisfying at least one clause.
    AnyOf(Vec<Clause>),
}

impl SearchFilter {
    /// Evaluates the filter against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Ids(ids) => ids.iter().any(|id| *id == record.id),
            Self::AnyOf(clauses) => clauses.iter().any(|clause| clause.matches(record)),
        }
    }

    /// True if the filter was answered by the remote index.
    #[must_use]
    pub const fn is_remote(&self) -> bool {
        matches!(self, Self::Ids(_))
    }
}
