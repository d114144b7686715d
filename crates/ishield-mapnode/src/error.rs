// error.rs — Error types for document parsing.

use thiserror::Error;

/// Errors that can occur while building a [`crate::Node`] tree.
#[derive(Debug, Error)]
pub enum MapNodeError {
    /// The input bytes are not a well-formed document.
    #[error("failed to parse document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The input was empty or the literal `null`, so there is nothing to
    /// compare against.
    #[error("document is empty")]
    Empty,

    /// A number could not be represented (NaN or infinity).
    #[error("unsupported number value: {0}")]
    InvalidNumber(String),
}
