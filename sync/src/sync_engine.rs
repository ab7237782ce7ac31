//! Main sync engine that orchestrates scan, diff, apply and compare

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::apply::{Applier, ApplyFailure, DEFAULT_MAX_CONCURRENCY};
use crate::backend::{BackendError, BackendHandle, TableBackend};
use crate::comparator::{declared_from_scan, ComparisonReport, ComparisonReporter, DeclaredFile};
use crate::diff::{ChangeRecord, ChangeSet, DiffEngine};
use crate::error::{Result, SyncError};
use crate::manifest::ManifestStore;
use crate::scanner::{ScanOptions, ScanOutcome, TreeScanner};
use crate::tables::{schema_statements, DestinationTable};

/// Options for sync operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Root of the content tree
    pub root: PathBuf,
    pub scan: ScanOptions,
    /// Maximum number of records applied at once
    pub max_concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            scan: ScanOptions::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Change plan for the current tree, without side effects
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub files_scanned: usize,
    pub new_files: usize,
    pub modified_files: usize,
    pub deleted_files: usize,
    pub unreadable_files: Vec<String>,
    pub changes: Vec<ChangeRecord>,
}

impl ScanReport {
    fn new(scan: &ScanOutcome, changes: &ChangeSet) -> Self {
        Self {
            files_scanned: scan.len(),
            new_files: changes.summary.new,
            modified_files: changes.summary.modified,
            deleted_files: changes.summary.deleted,
            unreadable_files: scan.unreadable.iter().cloned().collect(),
            changes: changes.changes.clone(),
        }
    }
}

/// Outcome of one pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullReport {
    #[serde(flatten)]
    pub scan: ScanReport,
    pub applied: usize,
    pub failures: Vec<ApplyFailure>,
    pub duration_ms: u64,
}

/// Main sync engine
pub struct SyncEngine {
    options: SyncOptions,
    scanner: TreeScanner,
    diff_engine: DiffEngine,
    backend: Arc<dyn TableBackend>,
    manifest: ManifestStore,
    applier: Applier,
    reporter: ComparisonReporter,
    pull_guard: Mutex<()>,
}

impl SyncEngine {
    pub fn new(options: SyncOptions, backend: Arc<dyn TableBackend>) -> Result<Self> {
        if options.max_concurrency == 0 {
            return Err(SyncError::Config("max_concurrency must be at least 1".to_string()));
        }

        let scanner = TreeScanner::new(options.scan.clone())?;
        let manifest = ManifestStore::new(backend.clone());
        let applier = Applier::new(backend.clone(), manifest.clone(), options.max_concurrency);
        let reporter = ComparisonReporter::new(backend.clone());

        Ok(Self {
            options,
            scanner,
            diff_engine: DiffEngine::new(),
            backend,
            manifest,
            applier,
            reporter,
            pull_guard: Mutex::new(()),
        })
    }

    /// Build an engine on the handle's backend, connecting it if needed
    pub async fn from_handle(options: SyncOptions, handle: &BackendHandle) -> Result<Self> {
        let backend = handle.connect().await?;
        Self::new(options, backend)
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn TableBackend> {
        &self.backend
    }

    /// Create the manifest and destination tables if absent.
    ///
    /// Returns `false` when the backend cannot run DDL.
    pub async fn ensure_schema(&self) -> Result<bool> {
        for statement in schema_statements() {
            match self.backend.raw_execute(&statement).await {
                Ok(_) => {}
                Err(BackendError::Unsupported { backend, .. }) => {
                    debug!("Skipping schema creation on the {} backend", backend);
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("Schema ready");
        Ok(true)
    }

    async fn plan(&self) -> Result<(ScanOutcome, ChangeSet)> {
        let scan = self.scanner.scan(&self.options.root).await?;
        let manifest = self.manifest.read_all().await?;
        let changes = self.diff_engine.compute(&scan, &manifest);
        Ok((scan, changes))
    }

    /// Compute the change plan without writing anything
    pub async fn scan(&self) -> Result<ScanReport> {
        let (scan, changes) = self.plan().await?;
        info!(
            "Scan found {} files: {} new, {} modified, {} deleted",
            scan.len(),
            changes.summary.new,
            changes.summary.modified,
            changes.summary.deleted
        );
        Ok(ScanReport::new(&scan, &changes))
    }

    /// Scan, then apply every change. Per-file failures are reported in the
    /// result, not returned as errors.
    pub async fn pull(&self) -> Result<PullReport> {
        let _guard = self.pull_guard.try_lock().map_err(|_| SyncError::SyncInProgress)?;
        let started = Instant::now();

        let (scan, changes) = self.plan().await?;
        info!("Pulling {} changes from {}", changes.len(), self.options.root.display());

        let applied = self.applier.apply(&changes, &scan).await;

        let report = PullReport {
            scan: ScanReport::new(&scan, &changes),
            applied: applied.applied,
            failures: applied.failures,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "Pull finished in {}ms: {} applied, {} failed",
            report.duration_ms,
            report.applied,
            report.failures.len()
        );
        Ok(report)
    }

    /// Audit `declared` against the live contents of `table`
    pub async fn compare(&self, table: DestinationTable, declared: &[DeclaredFile]) -> Result<ComparisonReport> {
        self.reporter.compare(table, declared).await
    }

    /// Audit the current tree against the live contents of `table`
    pub async fn compare_tree(&self, table: DestinationTable) -> Result<ComparisonReport> {
        let scan = self.scanner.scan(&self.options.root).await?;
        let declared = declared_from_scan(&scan, table);
        self.compare(table, &declared).await
    }
}
