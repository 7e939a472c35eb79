// src/store/mod.rs
//
// Record storage used by the ingestion pipeline and the dashboard queries.
// Records are JSON objects kept one per row; each backend assigns the
// identifier and the creation time.

mod postgres;
mod sqlite;

pub use postgres::{PostgresConfig, PostgresStore};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record: field name to JSON value
pub type Record = Map<String, Value>;

// ============================================================================
// Errors
// ============================================================================

/// Storage failure. Always surfaced to the caller, never swallowed.
#[derive(Debug, Clone)]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::new(format!("sqlite: {}", err))
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::new(format!("postgres: {}", err))
    }
}

// ============================================================================
// Query Types
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
}

impl QueryOptions {
    pub fn latest(column: &str, limit: usize) -> Self {
        QueryOptions {
            limit: Some(limit),
            order_by: Some(OrderBy {
                column: column.to_string(),
                direction: SortDirection::Desc,
            }),
        }
    }
}

/// A record as read back from storage
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub fields: Record,
}

/// Columns every table has besides the JSON payload
pub(crate) const ROW_COLUMNS: [&str; 2] = ["id", "created_at"];

// ============================================================================
// Store Trait
// ============================================================================

/// Storage collaborator for ingested records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert one record into `table`, returning the assigned identifier.
    async fn insert(&self, table: &str, record: &Record) -> Result<i64, StoreError>;

    /// Records of `table` whose fields equal every entry of `filters`.
    /// A null filter value matches both an explicit null and a missing field.
    async fn query(
        &self,
        table: &str,
        filters: &Record,
        options: &QueryOptions,
    ) -> Result<Vec<StoredRecord>, StoreError>;
}

/// Table and field names are spliced into SQL, so only plain identifiers
/// are accepted.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::new(format!("invalid identifier: {:?}", name)))
    }
}
