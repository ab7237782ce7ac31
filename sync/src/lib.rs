//! Content Mirror Engine
//!
//! Mirrors a tree of content files into relational tables and keeps the two
//! in sync:
//! - Path-convention classification into destination tables
//! - Tree scanning with content digests
//! - Manifest-based reconciliation into new / modified / deleted changes
//! - Per-file isolated application over a SQL or REST backend
//! - Read-only comparison of declared files against live tables

pub mod apply;
pub mod backend;
pub mod classifier;
pub mod comparator;
pub mod diff;
pub mod error;
pub mod filter;
pub mod manifest;
pub mod scanner;
pub mod sync_engine;
pub mod tables;

// Re-export main types and functions
pub use apply::{build_row, Applier, ApplyFailure, ApplyResult};
pub use backend::{
    select_backend, BackendConfig, BackendError, BackendHandle, BackendKind, BackendState, RestBackend, Row,
    SqlBackend, TableBackend,
};
pub use classifier::{classify, parse_collection_path, Classification, CollectionKey, RowKey};
pub use comparator::{declared_from_scan, ComparisonReport, ComparisonReporter, ComparisonSummary, DeclaredFile};
pub use diff::{ChangeRecord, ChangeSet, ChangeStatus, DiffEngine};
pub use error::{Result, SyncError};
pub use filter::{FilterOptions, ScanFilter};
pub use manifest::{ManifestEntry, ManifestStore};
pub use scanner::{FileRecord, HashAlgorithm, ScanOptions, ScanOutcome, TreeScanner};
pub use sync_engine::{PullReport, ScanReport, SyncEngine, SyncOptions};
pub use tables::{DestinationTable, MANIFEST_TABLE};

/// Scan a content tree without touching storage
pub async fn scan_tree(root: impl AsRef<std::path::Path>, options: ScanOptions) -> Result<ScanOutcome> {
    let scanner = TreeScanner::new(options)?;
    scanner.scan(root).await
}

// Test modules
#[cfg(test)]
mod testing;
