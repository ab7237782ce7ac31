//! Writes a change set to the destination tables and the manifest

use std::collections::HashSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, Row, TableBackend};
use crate::classifier::RowKey;
use crate::diff::{ChangeRecord, ChangeSet, ChangeStatus};
use crate::error::{Result, SyncError};
use crate::manifest::{ManifestEntry, ManifestStore};
use crate::scanner::{FileRecord, ScanOutcome};
use crate::tables::{ContentKind, DestinationTable};

/// Default number of records written at once
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// A change that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyFailure {
    pub path: String,
    pub status: ChangeStatus,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResult {
    pub applied: usize,
    pub failures: Vec<ApplyFailure>,
}

/// Build the destination row for a scanned file.
///
/// Fails when the bytes do not fit the table's content column or when a
/// collections path lacks its language or document type.
pub fn build_row(record: &FileRecord, now: DateTime<Utc>) -> Result<Row> {
    let table = record.table;
    let key = RowKey::from_path(table, &record.path).ok_or_else(|| {
        SyncError::content_error(
            &record.path,
            "expected collections/{language}/{doc_type}/{filename}",
        )
    })?;

    let content = match table.content_kind() {
        ContentKind::Json => serde_json::from_slice::<Value>(&record.content)
            .map_err(|e| SyncError::content_error(&record.path, format!("invalid JSON: {}", e)))?,
        ContentKind::Text => String::from_utf8(record.content.clone())
            .map(Value::String)
            .map_err(|e| SyncError::content_error(&record.path, format!("invalid UTF-8: {}", e)))?,
        ContentKind::Binary => Value::String(BASE64.encode(&record.content)),
    };

    let timestamp = Value::String(now.to_rfc3339());
    let mut row = key.to_row();
    row.insert("path".into(), Value::String(record.path.clone()));
    row.insert("content".into(), content);
    row.insert("hash".into(), Value::String(record.hash.clone()));
    row.insert("file_type".into(), Value::String(record.file_type.clone()));
    row.insert("synced_at".into(), timestamp.clone());
    row.insert("created_at".into(), timestamp.clone());
    row.insert("updated_at".into(), timestamp);

    Ok(row)
}

/// Applies changes record by record; one failure never stops the others
pub struct Applier {
    backend: Arc<dyn TableBackend>,
    manifest: ManifestStore,
    max_concurrency: usize,
}

impl Applier {
    pub fn new(backend: Arc<dyn TableBackend>, manifest: ManifestStore, max_concurrency: usize) -> Self {
        Self {
            backend,
            manifest,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Apply every change. Deletes finish before any write starts so a row
    /// key that moves between paths is never removed after being rewritten.
    pub async fn apply(&self, changes: &ChangeSet, scan: &ScanOutcome) -> ApplyResult {
        let (deletes, writes): (Vec<&ChangeRecord>, Vec<&ChangeRecord>) = changes
            .changes
            .iter()
            .partition(|c| c.status == ChangeStatus::Deleted);

        let mut result = ApplyResult::default();
        let removed = self.run_phase(deletes, scan, &mut result).await;

        let restores = displaced_files(&removed, &writes, scan);
        let writes: Vec<&ChangeRecord> = writes.into_iter().chain(restores.iter()).collect();
        self.run_phase(writes, scan, &mut result).await;

        result.failures.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            "Applied {} changes, {} failed",
            result.applied,
            result.failures.len()
        );
        result
    }

    /// Run one phase, returning the changes that removed a destination row
    async fn run_phase<'a>(
        &self,
        changes: Vec<&'a ChangeRecord>,
        scan: &ScanOutcome,
        result: &mut ApplyResult,
    ) -> Vec<&'a ChangeRecord> {
        let outcomes: Vec<_> = stream::iter(changes)
            .map(|change| async move { (change, self.apply_one(change, scan).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut removed = Vec::new();
        for (change, outcome) in outcomes {
            match outcome {
                Ok(rows_removed) => {
                    result.applied += 1;
                    if rows_removed > 0 {
                        removed.push(change);
                    }
                }
                Err(e) => {
                    warn!("Failed to apply {:?} {}: {}", change.status, change.path, e);
                    result.failures.push(ApplyFailure {
                        path: change.path.clone(),
                        status: change.status,
                        message: e.to_string(),
                    });
                }
            }
        }
        removed
    }

    async fn apply_one(&self, change: &ChangeRecord, scan: &ScanOutcome) -> Result<u64> {
        match change.status {
            ChangeStatus::Deleted => self.apply_delete(change).await,
            ChangeStatus::New | ChangeStatus::Modified => {
                let record = scan.files.get(&change.path).ok_or_else(|| {
                    SyncError::content_error(&change.path, "file is no longer part of the scan")
                })?;
                self.apply_write(record).await?;
                Ok(0)
            }
        }
    }

    async fn apply_write(&self, record: &FileRecord) -> Result<()> {
        let now = Utc::now();
        let row = build_row(record, now)?;

        self.backend
            .upsert_by_key(record.table.name(), record.table.key_columns(), row)
            .await?;

        self.manifest
            .upsert(&ManifestEntry {
                path: record.path.clone(),
                hash: record.hash.clone(),
                table_name: record.table.name().to_string(),
                last_synced: now,
            })
            .await?;

        debug!("Wrote {} to {}", record.path, record.table);
        Ok(())
    }

    /// Remove the row this path wrote. The `path` column is part of the
    /// predicate, so a row last written by another path with the same key
    /// survives.
    async fn apply_delete(&self, change: &ChangeRecord) -> Result<u64> {
        let table: DestinationTable = change.table.parse()?;

        let removed = match RowKey::from_path(table, &change.path) {
            Some(key) => {
                let mut predicate = key.to_row();
                predicate.insert("path".into(), Value::String(change.path.clone()));

                match self.backend.delete_by_key(table.name(), &predicate).await {
                    Ok(count) => {
                        debug!("Deleted {} row(s) for {} from {}", count, change.path, table);
                        count
                    }
                    Err(BackendError::MissingTable(_)) => {
                        debug!("Table {} missing, {} already gone", table, change.path);
                        0
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                debug!("No row key for {}, only clearing manifest", change.path);
                0
            }
        };

        self.manifest.delete(&change.path).await?;
        Ok(removed)
    }
}

/// Files still on disk whose row shared a key with a removed row and that
/// are not already being written
fn displaced_files(removed: &[&ChangeRecord], writes: &[&ChangeRecord], scan: &ScanOutcome) -> Vec<ChangeRecord> {
    let removed_keys: HashSet<(DestinationTable, RowKey)> = removed
        .iter()
        .filter_map(|change| {
            let table: DestinationTable = change.table.parse().ok()?;
            RowKey::from_path(table, &change.path).map(|key| (table, key))
        })
        .collect();
    if removed_keys.is_empty() {
        return Vec::new();
    }

    let pending: HashSet<&str> = writes.iter().map(|c| c.path.as_str()).collect();

    scan.files
        .values()
        .filter(|record| !pending.contains(record.path.as_str()))
        .filter(|record| {
            RowKey::from_path(record.table, &record.path)
                .map_or(false, |key| removed_keys.contains(&(record.table, key)))
        })
        .map(|record| {
            info!("Rewriting {}: its row was removed with another path", record.path);
            ChangeRecord {
                path: record.path.clone(),
                status: ChangeStatus::Modified,
                table: record.table.name().to_string(),
                hash: Some(record.hash.clone()),
                file_type: record.file_type.clone(),
            }
        })
        .collect()
}
