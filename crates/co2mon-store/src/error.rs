//! Error types for co2mon-store.

use std::path::PathBuf;

use crate::models::Consolidation;

/// Result type for co2mon-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in co2mon-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create the store directory.
    #[error("Failed to create store directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A store already exists at the location.
    #[error("Store already exists at {0}")]
    AlreadyExists(PathBuf),

    /// No store exists at the location.
    #[error("Store not found at {0}")]
    NotFound(PathBuf),

    /// The file is a database but not a retention store.
    #[error("Not a retention store (missing metadata)")]
    NotInitialized,

    /// The store was written by a newer schema.
    #[error("Unsupported schema version {0}")]
    UnsupportedVersion(i32),

    /// The schedule cannot be used to create a store.
    #[error("Invalid retention schedule: {0}")]
    InvalidSchedule(String),

    /// Append timestamp not after the previous append.
    #[error("Timestamp {attempted} is not after the last update {last}")]
    NonMonotonic { last: i64, attempted: i64 },

    /// Append carries the wrong number of values.
    #[error("Expected {expected} values, got {actual}")]
    ValueCount { expected: usize, actual: usize },

    /// No archive uses the requested consolidation function.
    #[error("No {0} archive in this store")]
    NoArchive(Consolidation),

    /// Persisted consolidation state is inconsistent.
    #[error("Corrupt store state: {0}")]
    CorruptState(String),

    /// Invalid timestamp.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
