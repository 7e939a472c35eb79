// src/store/sqlite.rs
//
// SQLite-backed record store. One table per record table name, each row
// holding the record as a JSON document. Field filters and ordering go
// through json_extract.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use super::{
    validate_identifier, QueryOptions, Record, RecordStore, StoreError, StoredRecord, ROW_COLUMNS,
};

struct SqliteInner {
    conn: Connection,
    /// Tables already created during this session
    tables: HashSet<String>,
}

/// rusqlite::Connection is !Sync, so we use Mutex (not RwLock).
pub struct SqliteStore {
    inner: Mutex<SqliteInner>,
}

// ============================================================================
// Initialisation
// ============================================================================

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::new(format!("Failed to create database dir: {}", e))
            })?;
        }
        let conn = Connection::open(path)?;

        // WAL mode for concurrent read/write
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        // Synchronous NORMAL is safe with WAL and faster than FULL
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;

        tlog!("[store] SQLite database opened at {:?}", path);
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        SqliteStore {
            inner: Mutex::new(SqliteInner {
                conn,
                tables: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ensure_table(inner: &mut SqliteInner, table: &str) -> Result<(), StoreError> {
    if inner.tables.contains(table) {
        return Ok(());
    }
    validate_identifier(table)?;
    inner.conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL,
            payload TEXT NOT NULL
        );",
    ))?;
    inner.tables.insert(table.to_string());
    Ok(())
}

// ============================================================================
// Query Building
// ============================================================================

/// SQL expression for a record field or one of the row columns
fn column_expr(column: &str) -> Result<String, StoreError> {
    validate_identifier(column)?;
    if ROW_COLUMNS.contains(&column) {
        Ok(column.to_string())
    } else {
        Ok(format!("json_extract(payload, '$.{}')", column))
    }
}

/// json_extract hands back SQL scalars for JSON scalars and JSON text for
/// containers, so the bound parameter has to match that shape.
fn filter_param(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn build_select(
    table: &str,
    filters: &Record,
    options: &QueryOptions,
) -> Result<(String, Vec<SqlValue>), StoreError> {
    validate_identifier(table)?;
    let mut sql = format!("SELECT id, created_at, payload FROM \"{}\"", table);
    let mut binds = Vec::new();

    let mut clauses = Vec::new();
    for (field, value) in filters {
        let expr = column_expr(field)?;
        if value.is_null() {
            clauses.push(format!("{} IS NULL", expr));
        } else {
            binds.push(filter_param(value));
            clauses.push(format!("{} = ?{}", expr, binds.len()));
        }
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    match options.order_by {
        Some(ref order) => {
            sql.push_str(&format!(
                " ORDER BY {} {}, id {}",
                column_expr(&order.column)?,
                order.direction.as_sql(),
                order.direction.as_sql()
            ));
        }
        None => sql.push_str(" ORDER BY id ASC"),
    }

    if let Some(limit) = options.limit {
        binds.push(SqlValue::Integer(limit as i64));
        sql.push_str(&format!(" LIMIT ?{}", binds.len()));
    }

    Ok((sql, binds))
}

fn parse_created_at(text: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn parse_payload(text: &str) -> rusqlite::Result<Record> {
    serde_json::from_str::<Record>(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })
}

// ============================================================================
// RecordStore
// ============================================================================

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, table: &str, record: &Record) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| StoreError::new(format!("Failed to encode record: {}", e)))?;
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut inner = self.lock();
        ensure_table(&mut inner, table)?;
        inner.conn.execute(
            &format!(
                "INSERT INTO \"{}\" (created_at, payload) VALUES (?1, ?2)",
                table
            ),
            params![created_at, payload],
        )?;
        Ok(inner.conn.last_insert_rowid())
    }

    async fn query(
        &self,
        table: &str,
        filters: &Record,
        options: &QueryOptions,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let (sql, binds) = build_select(table, filters, options)?;

        let mut inner = self.lock();
        ensure_table(&mut inner, table)?;
        let mut stmt = inner.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter()), |row| {
            let created_at: String = row.get(1)?;
            let payload: String = row.get(2)?;
            Ok(StoredRecord {
                id: row.get(0)?,
                created_at: parse_created_at(&created_at)?,
                fields: parse_payload(&payload)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}
