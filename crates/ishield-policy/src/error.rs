// error.rs — Error types for the admission decision engine.
//
// A PolicyError means the engine could not evaluate a request at all. It is
// never used to express a deny: denials are ordinary DecisionResults.

use std::path::PathBuf;

use ishield_mapnode::MapNodeError;
use thiserror::Error;

/// Errors that can occur while handling an admission request.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The request body could not be parsed.
    #[error("failed to parse the requested {which}: {source}")]
    MalformedObject {
        which: &'static str,
        source: MapNodeError,
    },

    /// The request body parsed but is not an object.
    #[error("the requested {which} is not an object (found {found})")]
    NotAnObject {
        which: &'static str,
        found: &'static str,
    },

    /// The request carries no object to evaluate.
    #[error("admission request has no object")]
    MissingObject,

    /// A configuration file could not be loaded or parsed.
    #[error("invalid configuration at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to serialize or deserialize a record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The deny-event store rejected an operation.
    #[error("event store error: {0}")]
    Store(String),
}
