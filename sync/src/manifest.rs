//! Persisted record of what was last synced for each path

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::{BackendError, Row, TableBackend};
use crate::error::Result;
use crate::tables::MANIFEST_TABLE;

const COLUMNS: [&str; 4] = ["path", "hash", "table_name", "last_synced"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub path: String,
    pub hash: String,
    pub table_name: String,
    pub last_synced: DateTime<Utc>,
}

impl ManifestEntry {
    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("path".into(), Value::String(self.path.clone()));
        row.insert("hash".into(), Value::String(self.hash.clone()));
        row.insert("table_name".into(), Value::String(self.table_name.clone()));
        row.insert("last_synced".into(), Value::String(self.last_synced.to_rfc3339()));
        row
    }

    fn from_row(row: &Row) -> Option<Self> {
        let last_synced = text(row, "last_synced")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();

        Some(Self {
            path: text(row, "path")?.to_string(),
            hash: text(row, "hash")?.to_string(),
            table_name: text(row, "table_name")?.to_string(),
            last_synced,
        })
    }
}

fn text<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

/// Manifest reader and writer over the selected backend
#[derive(Clone)]
pub struct ManifestStore {
    backend: Arc<dyn TableBackend>,
}

impl ManifestStore {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self { backend }
    }

    /// Every entry. A missing manifest table reads as empty.
    pub async fn read_all(&self) -> Result<Vec<ManifestEntry>> {
        let rows = match self.backend.select(MANIFEST_TABLE, &COLUMNS).await {
            Ok(rows) => rows,
            Err(BackendError::MissingTable(_)) => {
                debug!("Manifest table missing, treating manifest as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            match ManifestEntry::from_row(row) {
                Some(entry) => entries.push(entry),
                None => warn!("Ignoring malformed manifest row: {:?}", row),
            }
        }

        Ok(entries)
    }

    /// Insert or replace the entry for `entry.path`
    pub async fn upsert(&self, entry: &ManifestEntry) -> Result<()> {
        self.backend
            .upsert_by_key(MANIFEST_TABLE, &["path"], entry.to_row())
            .await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        let mut key = Row::new();
        key.insert("path".into(), Value::String(path.to_string()));
        self.backend.delete_by_key(MANIFEST_TABLE, &key).await?;
        Ok(())
    }
}
