use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::error::DatabaseError;
use sqlx::{AnyPool, Row as _};
use tracing::{debug, info};

use super::{key_values, validate_identifier, BackendError, BackendKind, BackendResult, Row, TableBackend};
use crate::tables::CREATED_AT;

/// Placeholder syntax of the connected database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Sqlite,
    Postgres,
}

impl SqlDialect {
    pub fn from_url(url: &str) -> Option<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Some(SqlDialect::Postgres)
        } else if url.starts_with("sqlite:") {
            Some(SqlDialect::Sqlite)
        } else {
            None
        }
    }

    /// Bind placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::Sqlite => "?".to_string(),
            SqlDialect::Postgres => format!("${}", index),
        }
    }
}

/// Raw SQL backend over a `sqlx` pool
pub struct SqlBackend {
    pool: AnyPool,
    dialect: SqlDialect,
}

impl SqlBackend {
    /// Open a pool against `url`. Any failure is reported as unavailable.
    pub async fn connect(url: &str, max_connections: u32, acquire_timeout: Duration) -> BackendResult<Self> {
        let dialect = SqlDialect::from_url(url)
            .ok_or_else(|| BackendError::Unavailable("unsupported database URL scheme".to_string()))?;

        install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        info!("Connected to {:?} database", dialect);
        Ok(Self { pool, dialect })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: AnyPool, dialect: SqlDialect) -> Self {
        Self { pool, dialect }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl TableBackend for SqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    async fn select(&self, table: &str, columns: &[&str]) -> BackendResult<Vec<Row>> {
        let sql = select_statement(table, columns)?;
        debug!("{}", sql);

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_error(table, e))?;

        rows.iter()
            .map(|row| {
                let mut out = Row::new();
                for (index, column) in columns.iter().enumerate() {
                    let value: Option<String> = row
                        .try_get(index)
                        .map_err(|e| BackendError::query(table, e.to_string()))?;
                    out.insert(column.to_string(), value.map(Value::String).unwrap_or(Value::Null));
                }
                Ok(out)
            })
            .collect()
    }

    async fn upsert_by_key(&self, table: &str, key_columns: &[&str], row: Row) -> BackendResult<()> {
        key_values(table, key_columns, &row)?;

        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        let sql = upsert_statement(self.dialect, table, &columns, key_columns)?;

        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = query.bind(bind_value(value));
        }

        query.execute(&self.pool).await.map_err(|e| map_error(table, e))?;
        Ok(())
    }

    async fn delete_by_key(&self, table: &str, key: &Row) -> BackendResult<u64> {
        let columns: Vec<&str> = key.keys().map(String::as_str).collect();
        let sql = delete_statement(self.dialect, table, &columns)?;

        let mut query = sqlx::query(&sql);
        for value in key.values() {
            query = query.bind(bind_value(value));
        }

        let result = query.execute(&self.pool).await.map_err(|e| map_error(table, e))?;
        Ok(result.rows_affected())
    }

    async fn raw_execute(&self, statement: &str) -> BackendResult<u64> {
        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| map_error("<raw>", e))?;
        Ok(result.rows_affected())
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("SQL pool closed");
    }
}

fn quote(name: &str) -> BackendResult<String> {
    Ok(format!("\"{}\"", validate_identifier(name)?))
}

fn quote_all(names: &[&str]) -> BackendResult<Vec<String>> {
    names.iter().map(|name| quote(name)).collect()
}

fn select_statement(table: &str, columns: &[&str]) -> BackendResult<String> {
    if columns.is_empty() {
        return Err(BackendError::query(table, "no columns selected"));
    }

    Ok(format!(
        "SELECT {} FROM {}",
        quote_all(columns)?.join(", "),
        quote(table)?
    ))
}

fn upsert_statement(
    dialect: SqlDialect,
    table: &str,
    columns: &[&str],
    key_columns: &[&str],
) -> BackendResult<String> {
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| dialect.placeholder(i)).collect();

    let updates = columns
        .iter()
        .filter(|column| !key_columns.contains(column) && **column != CREATED_AT)
        .map(|column| quote(column).map(|quoted| format!("{0} = excluded.{0}", quoted)))
        .collect::<BackendResult<Vec<_>>>()?;

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        quote(table)?,
        quote_all(columns)?.join(", "),
        placeholders.join(", "),
        quote_all(key_columns)?.join(", "),
        action
    ))
}

fn delete_statement(dialect: SqlDialect, table: &str, key_columns: &[&str]) -> BackendResult<String> {
    if key_columns.is_empty() {
        return Err(BackendError::query(table, "refusing to delete without a key"));
    }

    let conditions = key_columns
        .iter()
        .enumerate()
        .map(|(i, column)| quote(column).map(|quoted| format!("{} = {}", quoted, dialect.placeholder(i + 1))))
        .collect::<BackendResult<Vec<_>>>()?;

    Ok(format!("DELETE FROM {} WHERE {}", quote(table)?, conditions.join(" AND ")))
}

/// Strings bind as-is, null as NULL, anything else as its JSON text
fn bind_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_missing_table(error: &dyn DatabaseError) -> bool {
    error.code().as_deref() == Some("42P01") || error.message().contains("no such table")
}

fn map_error(table: &str, error: sqlx::Error) -> BackendError {
    match &error {
        sqlx::Error::Database(db) if is_missing_table(db.as_ref()) => {
            BackendError::MissingTable(table.to_string())
        }
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => BackendError::Unavailable(error.to_string()),
        _ => BackendError::query(table, error.to_string()),
    }
}
