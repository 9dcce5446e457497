//! Error handling for the bucket archive toolbox.

use std::io;
use std::path::Path;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;

/// Specialized error type for bucket archive operations
#[derive(Debug, thiserror::Error)]
pub enum BucketError {
    /// Error opening, reading or writing a file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Error reading or writing Parquet data
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    /// Error manipulating Arrow record batches
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// Error reading or writing bucket metadata
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// A filename did not match any of the configured patterns
    #[error("Pattern error: {0}")]
    Pattern(String),

    /// Invalid partitioning configuration or partition lookup
    #[error("Partitioning error: {0}")]
    Partitioning(String),

    /// Inconsistent source/destination state during consolidation
    #[error("Merge error: {0}")]
    Merge(String),

    /// Any other error, with context attached
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for BucketError {
    fn from(error: serde_json::Error) -> Self {
        Self::Metadata(error.to_string())
    }
}

impl BucketError {
    /// Attach a file path to an IO error message
    #[must_use]
    pub fn io_with_path(error: io::Error, path: &Path) -> Self {
        Self::Io(io::Error::new(
            error.kind(),
            format!("{} ({})", error, path.display()),
        ))
    }
}

/// Result type for bucket archive operations
pub type Result<T> = std::result::Result<T, BucketError>;
