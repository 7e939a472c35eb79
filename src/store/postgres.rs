// src/store/postgres.rs
//
// PostgreSQL-backed record store. Records live in a JSONB column; equality
// filters become a single containment test against the payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row};

use super::{
    validate_identifier, QueryOptions, Record, RecordStore, StoreError, StoredRecord, ROW_COLUMNS,
};

/// PostgreSQL connection configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub sslmode: Option<String>,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    5432
}
fn default_database() -> String {
    "echoplant".to_string()
}
fn default_username() -> String {
    "postgres".to_string()
}

impl Default for PostgresConfig {
    fn default() -> Self {
        PostgresConfig {
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: None,
            sslmode: None,
        }
    }
}

impl PostgresConfig {
    /// Build connection string for tokio-postgres
    pub fn to_connection_string(&self) -> String {
        let mut parts = vec![
            format!("host={}", self.host),
            format!("port={}", self.port),
            format!("dbname={}", self.database),
            format!("user={}", self.username),
        ];

        if let Some(ref pw) = self.password {
            parts.push(format!("password={}", pw));
        }

        if let Some(ref ssl) = self.sslmode {
            parts.push(format!("sslmode={}", ssl));
        }

        parts.join(" ")
    }
}

pub struct PostgresStore {
    client: Client,
    tables: Mutex<HashSet<String>>,
}

impl PostgresStore {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let conn_str = config.to_connection_string();
        let (client, connection) = tokio_postgres::connect(&conn_str, NoTls).await?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tlog!("[store] PostgreSQL connection error: {}", e);
            }
        });

        tlog!(
            "[store] Connected to PostgreSQL {}:{}/{}",
            config.host,
            config.port,
            config.database
        );
        Ok(PostgresStore {
            client,
            tables: Mutex::new(HashSet::new()),
        })
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        let known = self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(table);
        if known {
            return Ok(());
        }
        self.client.batch_execute(&create_table_sql(table)?).await?;
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.to_string());
        Ok(())
    }
}

// ============================================================================
// SQL
// ============================================================================

fn create_table_sql(table: &str) -> Result<String, StoreError> {
    validate_identifier(table)?;
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            id BIGSERIAL PRIMARY KEY,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            payload JSONB NOT NULL
        )"
    ))
}

fn insert_sql(table: &str) -> Result<String, StoreError> {
    validate_identifier(table)?;
    Ok(format!(
        "INSERT INTO \"{}\" (payload) VALUES ($1) RETURNING id",
        table
    ))
}

fn column_expr(column: &str) -> Result<String, StoreError> {
    validate_identifier(column)?;
    if ROW_COLUMNS.contains(&column) {
        Ok(column.to_string())
    } else {
        Ok(format!("payload->'{}'", column))
    }
}

/// Non-null filters, matched together by JSONB containment
fn containment_filters(filters: &Record) -> Record {
    filters
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// SELECT statement for a query. Non-null filters bind as `$1` (a JSONB
/// object) and the limit, when present, as the next parameter. A null
/// filter matches an explicit null or a missing field.
fn build_select(
    table: &str,
    filters: &Record,
    options: &QueryOptions,
) -> Result<String, StoreError> {
    validate_identifier(table)?;
    for field in filters.keys() {
        validate_identifier(field)?;
    }

    let mut sql = format!("SELECT id, created_at, payload FROM \"{}\"", table);
    let mut next_param = 1;
    let mut conditions = Vec::new();
    if !containment_filters(filters).is_empty() {
        conditions.push("payload @> $1".to_string());
        next_param += 1;
    }
    for (field, _) in filters.iter().filter(|(_, v)| v.is_null()) {
        conditions.push(format!(
            "(payload->'{0}' IS NULL OR payload->'{0}' = 'null'::jsonb)",
            field
        ));
    }
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    match options.order_by {
        Some(ref order) => sql.push_str(&format!(
            " ORDER BY {} {}, id {}",
            column_expr(&order.column)?,
            order.direction.as_sql(),
            order.direction.as_sql()
        )),
        None => sql.push_str(" ORDER BY id ASC"),
    }

    if options.limit.is_some() {
        sql.push_str(&format!(" LIMIT ${}", next_param));
    }
    Ok(sql)
}

fn row_to_record(row: &Row) -> Result<StoredRecord, StoreError> {
    let payload: Value = row.try_get("payload")?;
    let fields = match payload {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::new(format!(
                "Stored payload is not an object: {}",
                other
            )))
        }
    };
    Ok(StoredRecord {
        id: row.try_get("id")?,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
        fields,
    })
}

// ============================================================================
// RecordStore
// ============================================================================

#[async_trait]
impl RecordStore for PostgresStore {
    async fn insert(&self, table: &str, record: &Record) -> Result<i64, StoreError> {
        self.ensure_table(table).await?;
        let payload = Value::Object(record.clone());
        let row = self
            .client
            .query_one(&insert_sql(table)?, &[&payload])
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn query(
        &self,
        table: &str,
        filters: &Record,
        options: &QueryOptions,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let sql = build_select(table, filters, options)?;
        self.ensure_table(table).await?;

        let contained = containment_filters(filters);
        let has_contained = !contained.is_empty();
        let filter_doc = Value::Object(contained);
        let limit = options.limit.map(|l| l as i64);
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        if has_contained {
            params.push(&filter_doc);
        }
        if let Some(ref limit) = limit {
            params.push(limit);
        }

        let rows = self.client.query(&sql, &params).await?;
        rows.iter().map(row_to_record).collect()
    }
}
