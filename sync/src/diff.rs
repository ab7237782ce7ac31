//! Reconciliation of a scan against the manifest

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::file_type;
use crate::manifest::ManifestEntry;
use crate::scanner::ScanOutcome;

/// What happened to a path since it was last synced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Deleted,
    New,
    Modified,
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Deleted => "deleted",
            Self::New => "new",
            Self::Modified => "modified",
        })
    }
}

/// One unit of work for the apply layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    pub path: String,
    pub status: ChangeStatus,
    /// Destination table; for deletes, the table recorded in the manifest
    pub table: String,
    /// Current digest, absent for deletes
    pub hash: Option<String>,
    pub file_type: String,
}

/// Counts per status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSummary {
    pub total: usize,
    pub new: usize,
    pub modified: usize,
    pub deleted: usize,
}

/// Change list in report order: deletes, then new files, then
/// modifications, each sorted by path. The applier schedules deletes
/// itself and does not rely on this order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<ChangeRecord>,
    pub summary: ChangeSummary,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn with_status(&self, status: ChangeStatus) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter().filter(move |c| c.status == status)
    }
}

/// Diff engine comparing scan digests with manifest digests
#[derive(Debug, Default)]
pub struct DiffEngine;

impl DiffEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute the change set for `scan` against `manifest`.
    ///
    /// Manifest paths that the scan could not read are left alone rather
    /// than reported as deleted.
    pub fn compute(&self, scan: &ScanOutcome, manifest: &[ManifestEntry]) -> ChangeSet {
        let known: HashMap<&str, &ManifestEntry> =
            manifest.iter().map(|entry| (entry.path.as_str(), entry)).collect();

        let mut changes = Vec::new();

        for entry in manifest {
            if scan.files.contains_key(&entry.path) {
                continue;
            }
            if scan.is_unreadable(&entry.path) {
                debug!("Keeping {}: present but unreadable", entry.path);
                continue;
            }

            changes.push(ChangeRecord {
                path: entry.path.clone(),
                status: ChangeStatus::Deleted,
                table: entry.table_name.clone(),
                hash: None,
                file_type: file_type(&entry.path),
            });
        }

        for (path, record) in &scan.files {
            let status = match known.get(path.as_str()) {
                None => ChangeStatus::New,
                Some(entry) if entry.hash != record.hash => ChangeStatus::Modified,
                Some(_) => continue,
            };

            changes.push(ChangeRecord {
                path: path.clone(),
                status,
                table: record.table.name().to_string(),
                hash: Some(record.hash.clone()),
                file_type: record.file_type.clone(),
            });
        }

        changes.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.path.cmp(&b.path)));
        // Duplicate manifest rows for one path collapse into one delete
        changes.dedup_by(|a, b| a.path == b.path);

        let summary = Self::summarize(&changes);
        debug!(
            "Diff: {} new, {} modified, {} deleted",
            summary.new, summary.modified, summary.deleted
        );

        ChangeSet { changes, summary }
    }

    fn summarize(changes: &[ChangeRecord]) -> ChangeSummary {
        let mut summary = ChangeSummary {
            total: changes.len(),
            ..Default::default()
        };

        for change in changes {
            match change.status {
                ChangeStatus::New => summary.new += 1,
                ChangeStatus::Modified => summary.modified += 1,
                ChangeStatus::Deleted => summary.deleted += 1,
            }
        }

        summary
    }
}
