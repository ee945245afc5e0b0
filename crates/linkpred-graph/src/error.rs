//! Error types for link-graph operations.
//!
//! All graph lookups fail fast with typed errors; nothing in this crate
//! unwraps on user-supplied identifiers.

use thiserror::Error;

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Error type for entity dictionary, link graph and mask construction.
#[derive(Error, Debug)]
pub enum GraphError {
    /// Entity id is not present in the entity dictionary.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Entity index is outside the dictionary.
    #[error("Entity index {index} out of range (size: {size})")]
    IndexOutOfRange { index: usize, size: usize },

    /// Entity appears twice while building the dictionary.
    #[error("Duplicate entity: {0}")]
    DuplicateEntity(String),

    /// Invalid parameter supplied to a graph operation.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for GraphError {
    fn from(e: serde_json::Error) -> Self {
        GraphError::Parse(e.to_string())
    }
}
