//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Cache store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("already transporting {0}, wait a moment and retry")]
    WriteInProgress(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("cache path must be a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteInProgress(_))
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
