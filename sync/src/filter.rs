//! Scan admission rules using globset

use std::collections::BTreeSet;
use std::path::Path;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Which files and directories a scan admits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    /// Directory names pruned wherever they appear
    pub ignored_dirs: Vec<String>,
    /// Extensions admitted, without the dot (case-insensitive, empty admits all)
    pub allowed_extensions: Vec<String>,
    /// Glob patterns matched against the relative path
    pub exclude_patterns: Vec<String>,
    /// Include hidden files (starting with .)
    pub include_hidden: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            ignored_dirs: ["node_modules", ".git", ".next", "dist", "build"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_extensions: [
                "json", "txt", "md", "js", "png", "jpg", "jpeg", "gif", "svg", "webp", "pdf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            exclude_patterns: Vec::new(),
            include_hidden: true,
        }
    }
}

/// Compiled form of [`FilterOptions`]
#[derive(Debug, Clone)]
pub struct ScanFilter {
    ignored_dirs: BTreeSet<String>,
    allowed_extensions: BTreeSet<String>,
    exclude_set: Option<GlobSet>,
    options: FilterOptions,
}

impl ScanFilter {
    pub fn new(options: FilterOptions) -> Result<Self> {
        let exclude_set = if options.exclude_patterns.is_empty() {
            None
        } else {
            Some(Self::build_globset(&options.exclude_patterns)?)
        };

        let allowed_extensions = options
            .allowed_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_lowercase())
            .collect();

        Ok(Self {
            ignored_dirs: options.ignored_dirs.iter().cloned().collect(),
            allowed_extensions,
            exclude_set,
            options,
        })
    }

    /// True when a directory with this name must not be descended into
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        self.ignored_dirs.contains(name) || (!self.options.include_hidden && is_hidden_name(name))
    }

    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }

        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.allowed_extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Check a file's relative path against every rule
    pub fn should_include(&self, relative_path: &Path) -> bool {
        if !self.options.include_hidden && is_hidden(relative_path) {
            return false;
        }

        if !self.is_allowed_extension(relative_path) {
            return false;
        }

        if let Some(exclude_set) = &self.exclude_set {
            if exclude_set.is_match(relative_path) {
                return false;
            }
        }

        true
    }

    pub fn options(&self) -> &FilterOptions {
        &self.options
    }

    fn build_globset(patterns: &[String]) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in patterns {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map_err(|e| {
                    SyncError::FilterPattern(format!("Failed to compile glob '{}': {}", pattern, e))
                })?;

            builder.add(glob);
        }

        builder
            .build()
            .map_err(|e| SyncError::FilterPattern(format!("Failed to build globset: {}", e)))
    }
}

fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

fn is_hidden(path: &Path) -> bool {
    path.components().any(|component| {
        component
            .as_os_str()
            .to_str()
            .map(is_hidden_name)
            .unwrap_or(false)
    })
}
