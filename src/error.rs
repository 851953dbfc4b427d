//! Error types for partsink.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for partsink operations.
pub type Result<T> = std::result::Result<T, PartsinkError>;

/// Main error type for partsink operations.
///
/// Storage failures are `Io`, `IoWithPath` and `NotFound`; see
/// [`PartsinkError::is_storage_failure`].
#[derive(Error, Debug)]
pub enum PartsinkError {
    #[error("Malformed segment {path:?} at line {line}: {content:?}")]
    MalformedSegment {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error(
        "Can not push historical data that predates the partition for '{id}' category '{category}': {timestamp} < {partition_start}"
    )]
    HistoricalDataRejected {
        id: String,
        category: String,
        timestamp: i64,
        partition_start: i64,
    },

    #[error(
        "Can not push data that is out of order within the current partition for '{id}' category '{category}': {timestamp} < {last}"
    )]
    OutOfOrderWithinPartition {
        id: String,
        category: String,
        timestamp: i64,
        last: i64,
    },

    #[error("Resource not found: {path:?}")]
    NotFound { path: PathBuf },

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("IO error at path {path:?}: {source}")]
    IoWithPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PartsinkError {
    /// Attaches a path to a raw IO error.
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PartsinkError::IoWithPath {
            path: path.into(),
            source,
        }
    }

    /// Returns true for failures that originate in the underlying store.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            PartsinkError::Io(_) | PartsinkError::IoWithPath { .. } | PartsinkError::NotFound { .. }
        )
    }
}
