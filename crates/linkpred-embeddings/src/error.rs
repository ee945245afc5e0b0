//! Error type for all embedding, logit and rerank failures.
//!
//! # Error Categories
//!
//! | Category | Variants | Recovery Strategy |
//! |----------|----------|-------------------|
//! | Precondition | BatchSizeMismatch, InductiveRerank, MissingInput | Fix caller |
//! | Validation | InvalidDimension, DimensionMismatch, EmptyInput | Fix input data |
//! | Configuration | ConfigError | Fix configuration |
//! | Backend | TensorError | Inspect message, usually a shape bug |
//! | Collaborators | Graph, IoError | Fix data files |
//!
//! Nothing here is transient: every error is a programmer or configuration
//! error surfaced immediately, and no partial result accompanies it.

use linkpred_graph::GraphError;
use thiserror::Error;

/// Error type for the embedding pipeline.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    // === Precondition Violations ===
    /// Cross-batch cache was fed a batch of the wrong size.
    #[error("Batch size mismatch: cache expects {expected}, got {actual}")]
    BatchSizeMismatch { expected: usize, actual: usize },

    /// Graph reranking requested for an inductive task.
    #[error("Inductive task {task} can not use graph rerank (neighbor_weight = {neighbor_weight})")]
    InductiveRerank { task: String, neighbor_weight: f64 },

    /// A batch input required by the enabled features was not supplied.
    #[error("Missing batch input: {field}")]
    MissingInput { field: &'static str },

    // === Validation Errors ===
    /// Tensor width or rank does not match the configured dimension.
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    /// Two inputs that must agree in size do not.
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Empty batch provided.
    #[error("Empty input not allowed")]
    EmptyInput,

    // === Configuration Errors ===
    /// Configuration invalid or unparsable.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    // === Backend Errors ===
    /// Tensor operation failed in the candle backend.
    #[error("Tensor error: {message}")]
    TensorError { message: String },

    // === Collaborator Errors ===
    /// Entity dictionary or link graph lookup failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// File I/O error (config files).
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;
