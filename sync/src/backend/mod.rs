//! Storage backends behind one table-level interface
//!
//! Every component above this module talks to storage through
//! [`TableBackend`]. Two adapters exist: [`SqlBackend`] over a `sqlx` pool and
//! [`RestBackend`] over the REST table client. [`BackendHandle`] owns whichever
//! one was selected at startup.

mod handle;
mod rest;
mod sql;

use std::fmt;

use async_trait::async_trait;
use mirror_core::RestError;
use serde::{Deserialize, Serialize};

pub use handle::{select_backend, BackendConfig, BackendHandle, BackendState};
pub use rest::RestBackend;
pub use sql::{SqlBackend, SqlDialect};

/// A table row as column name to JSON value
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result type alias for backend operations
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Which driver a backend uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sql,
    Rest,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sql => f.write_str("sql"),
            BackendKind::Rest => f.write_str("rest"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Storage could not be reached
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Table '{0}' does not exist")]
    MissingTable(String),

    #[error("Query on '{table}' failed: {message}")]
    Query { table: String, message: String },

    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendKind,
        operation: &'static str,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("REST request on '{table}' failed: {source}")]
    Rest {
        table: String,
        #[source]
        source: RestError,
    },
}

impl BackendError {
    pub fn query(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn is_missing_table(&self) -> bool {
        matches!(self, Self::MissingTable(_))
    }
}

/// Uniform table-level surface over both storage drivers.
///
/// Rows are keyed by the caller-supplied key columns; the destination must
/// enforce uniqueness on them.
#[async_trait]
pub trait TableBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Read `columns` from every row of `table`
    async fn select(&self, table: &str, columns: &[&str]) -> BackendResult<Vec<Row>>;

    /// Insert `row`, or update the row whose `key_columns` match.
    ///
    /// `created_at` is only written on insert.
    async fn upsert_by_key(&self, table: &str, key_columns: &[&str], row: Row) -> BackendResult<()>;

    /// Delete rows matching every column of `key`, returning how many went
    async fn delete_by_key(&self, table: &str, key: &Row) -> BackendResult<u64>;

    /// Execute a raw statement, returning the affected row count
    async fn raw_execute(&self, statement: &str) -> BackendResult<u64>;

    async fn close(&self);
}

/// Accept only `[A-Za-z_][A-Za-z0-9_]*` table and column names
pub fn validate_identifier(name: &str) -> BackendResult<&str> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(name)
    } else {
        Err(BackendError::InvalidIdentifier(name.to_string()))
    }
}

/// Key column values as strings, in `key_columns` order
pub(crate) fn key_values<'a>(
    table: &str,
    key_columns: &[&'a str],
    row: &'a Row,
) -> BackendResult<Vec<(&'a str, &'a str)>> {
    key_columns
        .iter()
        .map(|column| {
            row.get(*column)
                .and_then(|v| v.as_str())
                .map(|value| (*column, value))
                .ok_or_else(|| {
                    BackendError::query(table, format!("key column '{}' missing or not a string", column))
                })
        })
        .collect()
}
