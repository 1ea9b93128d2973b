//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
