// error.rs — Error types for exemption aggregation.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExemptionError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize or deserialize a record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The named record does not exist.
    #[error("exemption record not found: {0}")]
    NotFound(String),

    /// A record with this name already exists.
    #[error("exemption record already exists: {0}")]
    AlreadyExists(String),

    /// The record name cannot be used as a store key.
    #[error("invalid exemption record name: {0:?}")]
    InvalidName(String),

    /// The resource liveness lookup failed.
    #[error("resource lookup failed: {0}")]
    Lookup(String),
}
