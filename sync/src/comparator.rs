//! Read-only audit of a declared file listing against live table contents

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{BackendError, Row, TableBackend};
use crate::classifier::RowKey;
use crate::error::Result;
use crate::scanner::ScanOutcome;
use crate::tables::DestinationTable;

/// A file the caller expects to find in a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredFile {
    pub filename: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

/// A declared file found with the same hash, or not found at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparedFile {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    pub hash: String,
}

/// A declared file whose live hash differs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferentFile {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    pub declared_hash: String,
    pub live_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub declared: usize,
    pub similar: usize,
    pub different: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonReport {
    pub table: DestinationTable,
    pub similar: Vec<ComparedFile>,
    pub different: Vec<DifferentFile>,
    pub missing: Vec<ComparedFile>,
    pub summary: ComparisonSummary,
}

type Identity = (Option<String>, Option<String>, String);

fn declared_identity(table: DestinationTable, file: &DeclaredFile) -> Identity {
    if table.is_composite() {
        (
            Some(file.language.clone().unwrap_or_default()),
            Some(file.doc_type.clone().unwrap_or_default()),
            file.filename.clone(),
        )
    } else {
        (None, None, file.filename.clone())
    }
}

fn live_identity(table: DestinationTable, row: &Row) -> Option<Identity> {
    let text = |column: &str| row.get(column).and_then(Value::as_str).map(str::to_string);

    let filename = text("filename")?;
    if table.is_composite() {
        Some((
            Some(text("language").unwrap_or_default()),
            Some(text("doc_type").unwrap_or_default()),
            filename,
        ))
    } else {
        Some((None, None, filename))
    }
}

/// Classify each declared file against already-fetched live rows
pub fn compare_rows(table: DestinationTable, declared: &[DeclaredFile], live: &[Row]) -> ComparisonReport {
    let live_hashes: HashMap<Identity, String> = live
        .iter()
        .filter_map(|row| {
            let identity = live_identity(table, row)?;
            let hash = row.get("hash").and_then(Value::as_str).unwrap_or_default();
            Some((identity, hash.to_string()))
        })
        .collect();

    let mut report = ComparisonReport {
        table,
        similar: Vec::new(),
        different: Vec::new(),
        missing: Vec::new(),
        summary: ComparisonSummary {
            declared: declared.len(),
            ..Default::default()
        },
    };

    for file in declared {
        let (language, doc_type, filename) = declared_identity(table, file);
        let identity = (language.clone(), doc_type.clone(), filename.clone());

        match live_hashes.get(&identity) {
            Some(live_hash) if *live_hash == file.hash => report.similar.push(ComparedFile {
                filename,
                language,
                doc_type,
                hash: file.hash.clone(),
            }),
            Some(live_hash) => report.different.push(DifferentFile {
                filename,
                language,
                doc_type,
                declared_hash: file.hash.clone(),
                live_hash: live_hash.clone(),
            }),
            None => report.missing.push(ComparedFile {
                filename,
                language,
                doc_type,
                hash: file.hash.clone(),
            }),
        }
    }

    report.summary.similar = report.similar.len();
    report.summary.different = report.different.len();
    report.summary.missing = report.missing.len();
    report
}

/// Declared listing for `table` built from a scan of the content tree
pub fn declared_from_scan(scan: &ScanOutcome, table: DestinationTable) -> Vec<DeclaredFile> {
    scan.files
        .values()
        .filter(|record| record.table == table)
        .filter_map(|record| {
            let key = RowKey::from_path(table, &record.path)?;
            let (language, doc_type) = match &key {
                RowKey::Collection(c) => (Some(c.language.clone()), Some(c.doc_type.clone())),
                RowKey::Filename(_) => (None, None),
            };

            Some(DeclaredFile {
                filename: key.filename().to_string(),
                hash: record.hash.clone(),
                language,
                doc_type,
            })
        })
        .collect()
}

/// Compares declared files with what a table currently holds
pub struct ComparisonReporter {
    backend: Arc<dyn TableBackend>,
}

impl ComparisonReporter {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self { backend }
    }

    /// Read the table's identity and hash columns and classify `declared`.
    /// A table that does not exist holds nothing, so everything is missing.
    pub async fn compare(&self, table: DestinationTable, declared: &[DeclaredFile]) -> Result<ComparisonReport> {
        let mut columns = table.key_columns().to_vec();
        columns.push("hash");

        let live = match self.backend.select(table.name(), &columns).await {
            Ok(rows) => rows,
            Err(BackendError::MissingTable(_)) => {
                warn!("Table {} does not exist, comparing against an empty table", table);
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let report = compare_rows(table, declared, &live);
        info!(
            "Compared {} declared files against {}: {} similar, {} different, {} missing",
            report.summary.declared,
            table,
            report.summary.similar,
            report.summary.different,
            report.summary.missing
        );

        Ok(report)
    }
}
