//! Error types for the mirror engine

use std::path::PathBuf;

use crate::backend::BackendError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type for engine operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Path-related errors
    #[error("Path error at '{path}': {message}")]
    Path { path: PathBuf, message: String },

    /// Storage backend errors
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A file's bytes do not fit its destination column
    #[error("Content error for '{path}': {message}")]
    Content { path: String, message: String },

    /// Table name outside the destination catalogue
    #[error("Unknown destination table: {0}")]
    UnknownTable(String),

    /// Filter pattern errors
    #[error("Filter pattern error: {0}")]
    FilterPattern(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Another pull is running on this engine
    #[error("A sync is already in progress")]
    SyncInProgress,
}

impl SyncError {
    /// Create a new path error
    pub fn path_error(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new content error
    pub fn content_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Content {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True when the storage backend could not be reached
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Unavailable(_)))
    }
}
