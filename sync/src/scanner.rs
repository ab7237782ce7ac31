//! Content tree scanning using walkdir and tokio::fs

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::classifier::{classify, split_segments};
use crate::error::{Result, SyncError};
use crate::filter::{FilterOptions, ScanFilter};
use crate::tables::DestinationTable;

/// Hash algorithms supported for content digests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256 hash
    #[default]
    Sha256,
    /// Blake3 hash (faster)
    Blake3,
}

/// Options for tree scanning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    pub filter: FilterOptions,
    pub hash_algorithm: HashAlgorithm,
    /// Follow symbolic links
    pub follow_links: bool,
}

/// A qualifying file read during one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Relative path from the scan root, `/`-separated
    pub path: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    /// Hex digest of `content`
    pub hash: String,
    pub table: DestinationTable,
    pub file_type: String,
    pub size: u64,
}

/// Everything one scan pass observed
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub files: BTreeMap<String, FileRecord>,
    /// Qualifying paths (files or directories) that could not be read
    pub unreadable: BTreeSet<String>,
}

impl ScanOutcome {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// True when `path` or one of its parent directories could not be read
    pub fn is_unreadable(&self, path: &str) -> bool {
        self.unreadable.iter().any(|blocked| {
            path == blocked
                || (path.starts_with(blocked.as_str())
                    && path.as_bytes().get(blocked.len()) == Some(&b'/'))
        })
    }
}

/// Walks a content tree and digests every classified file
pub struct TreeScanner {
    options: ScanOptions,
    filter: ScanFilter,
}

impl TreeScanner {
    pub fn new(options: ScanOptions) -> Result<Self> {
        let filter = ScanFilter::new(options.filter.clone())?;
        Ok(Self { options, filter })
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Scan `root`. A root that does not exist yields an empty outcome.
    pub async fn scan<P: AsRef<Path>>(&self, root: P) -> Result<ScanOutcome> {
        let root = root.as_ref();
        let mut outcome = ScanOutcome::default();

        if !fs::try_exists(root).await.unwrap_or(false) {
            warn!("Scan root {} does not exist, treating as empty", root.display());
            return Ok(outcome);
        }

        if !root.is_dir() {
            return Err(SyncError::path_error(root, "Path is not a directory"));
        }

        for (relative, absolute) in self.walk(root, &mut outcome.unreadable) {
            let classification = classify(&relative);
            let Some(table) = classification.table else {
                debug!("Skipping unclassified file {}", relative);
                continue;
            };

            let content = match fs::read(&absolute).await {
                Ok(content) => content,
                Err(e) => {
                    warn!("Skipping unreadable file {}: {}", relative, e);
                    outcome.unreadable.insert(relative);
                    continue;
                }
            };

            let hash = compute_hash(self.options.hash_algorithm, &content);
            debug!("Scanned {} -> {} ({})", relative, table, hash);

            let record = FileRecord {
                path: relative.clone(),
                size: content.len() as u64,
                content,
                hash,
                table,
                file_type: classification.file_type,
            };
            outcome.files.insert(relative, record);
        }

        info!(
            "Scanned {}: {} files, {} unreadable",
            root.display(),
            outcome.files.len(),
            outcome.unreadable.len()
        );

        Ok(outcome)
    }

    /// Collect admitted files as (relative, absolute) pairs, recording
    /// entries the walk itself could not read.
    fn walk(&self, root: &Path, unreadable: &mut BTreeSet<String>) -> Vec<(String, PathBuf)> {
        let walker = WalkDir::new(root)
            .follow_links(self.options.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry.file_type().is_dir()
                    || entry
                        .file_name()
                        .to_str()
                        .map(|name| !self.filter.is_ignored_dir(name))
                        .unwrap_or(true)
            });

        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Walk error: {}", e);
                    if let Some(relative) = e.path().and_then(|p| relative_posix(root, p)) {
                        unreadable.insert(relative);
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let Some(relative) = relative_posix(root, entry.path()) else {
                warn!("Skipping non UTF-8 path {}", entry.path().display());
                continue;
            };

            if self.filter.should_include(Path::new(&relative)) {
                files.push((relative, entry.into_path()));
            }
        }

        files
    }
}

/// Relative path with `/` separators, or `None` for the root or non UTF-8 names
fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?.to_str()?;
    let joined = split_segments(relative).join("/");
    (!joined.is_empty()).then_some(joined)
}

/// Lowercase hex digest of `bytes`
pub fn compute_hash(algorithm: HashAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha256 => {
            use sha2::{Digest, Sha256};
            format!("{:x}", Sha256::digest(bytes))
        }
        HashAlgorithm::Blake3 => blake3::hash(bytes).to_hex().to_string(),
    }
}
