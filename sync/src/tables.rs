//! Destination table catalogue and schema

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Name of the manifest table
pub const MANIFEST_TABLE: &str = "sync_manifest";

/// Column shared by every table that is only written on insert
pub const CREATED_AT: &str = "created_at";

/// How a destination table stores file bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Bytes parsed as JSON
    Json,
    /// Bytes decoded as UTF-8
    Text,
    /// Bytes stored as base64 text
    Binary,
}

/// One of the category-specific tables that receive synced content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationTable {
    Collections,
    ConfigFiles,
    DataFiles,
    Images,
    Resumes,
    JavascriptFiles,
    StaticFiles,
}

impl DestinationTable {
    /// Every table, in classification priority order
    pub const ALL: [DestinationTable; 7] = [
        DestinationTable::Collections,
        DestinationTable::ConfigFiles,
        DestinationTable::DataFiles,
        DestinationTable::Images,
        DestinationTable::Resumes,
        DestinationTable::JavascriptFiles,
        DestinationTable::StaticFiles,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Collections => "collections",
            Self::ConfigFiles => "config_files",
            Self::DataFiles => "data_files",
            Self::Images => "images",
            Self::Resumes => "resumes",
            Self::JavascriptFiles => "javascript_files",
            Self::StaticFiles => "static_files",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.name() == name)
    }

    /// Directory names that route a file into this table
    pub fn segments(&self) -> &'static [&'static str] {
        match self {
            Self::Collections => &["collections"],
            Self::ConfigFiles => &["config"],
            Self::DataFiles => &["data"],
            Self::Images => &["image", "images"],
            Self::Resumes => &["resume", "resumes"],
            Self::JavascriptFiles => &["js"],
            Self::StaticFiles => &["files"],
        }
    }

    pub fn content_kind(&self) -> ContentKind {
        match self {
            Self::Collections | Self::ConfigFiles | Self::DataFiles => ContentKind::Json,
            Self::JavascriptFiles | Self::StaticFiles => ContentKind::Text,
            Self::Images | Self::Resumes => ContentKind::Binary,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Self::Collections)
    }

    /// Columns forming the row identity
    pub fn key_columns(&self) -> &'static [&'static str] {
        if self.is_composite() {
            &["language", "doc_type", "filename"]
        } else {
            &["filename"]
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` statement, portable across SQLite and PostgreSQL
    pub fn create_table_sql(&self) -> String {
        let mut columns = Vec::new();
        if self.is_composite() {
            columns.push("language TEXT NOT NULL".to_string());
            columns.push("doc_type TEXT NOT NULL".to_string());
        }
        columns.extend(
            [
                "filename TEXT NOT NULL",
                "path TEXT NOT NULL",
                "content TEXT",
                "hash TEXT NOT NULL",
                "file_type TEXT NOT NULL",
                "synced_at TEXT NOT NULL",
                "created_at TEXT NOT NULL",
                "updated_at TEXT NOT NULL",
            ]
            .iter()
            .map(|c| c.to_string()),
        );
        columns.push(format!("UNIQUE ({})", self.key_columns().join(", ")));

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name(),
            columns.join(",\n    ")
        )
    }
}

impl fmt::Display for DestinationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DestinationTable {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| SyncError::UnknownTable(s.to_string()))
    }
}

pub fn manifest_table_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    path TEXT PRIMARY KEY,\n    hash TEXT NOT NULL,\n    table_name TEXT NOT NULL,\n    last_synced TEXT NOT NULL\n)",
        MANIFEST_TABLE
    )
}

/// Every DDL statement needed on a fresh database, manifest first
pub fn schema_statements() -> Vec<String> {
    std::iter::once(manifest_table_sql())
        .chain(DestinationTable::ALL.iter().map(|t| t.create_table_sql()))
        .collect()
}
