//! Triple examples consumed by the link graph, masks and reranker.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::GraphResult;

/// Prefix used for the relation text of an inverted triple.
pub const INVERSE_RELATION_PREFIX: &str = "inverse ";

/// A single (head, relation, tail) training or evaluation example.
///
/// Entity ids are opaque strings (`/m/0abc`, `Q42`, `00260881`, ...).
/// `head` / `tail` optionally carry the surface names used to build the
/// encoder text; the graph side only ever looks at the ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Example {
    pub head_id: String,
    #[serde(default)]
    pub head: String,
    pub relation: String,
    pub tail_id: String,
    #[serde(default)]
    pub tail: String,
}

impl Example {
    /// Create an example from ids only.
    pub fn new(
        head_id: impl Into<String>,
        relation: impl Into<String>,
        tail_id: impl Into<String>,
    ) -> Self {
        Self {
            head_id: head_id.into(),
            head: String::new(),
            relation: relation.into(),
            tail_id: tail_id.into(),
            tail: String::new(),
        }
    }

    /// Builder: set entity surface names.
    #[must_use]
    pub fn with_names(mut self, head: impl Into<String>, tail: impl Into<String>) -> Self {
        self.head = head.into();
        self.tail = tail.into();
        self
    }

    /// The inverted triple `(tail, "inverse " + relation, head)`.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            head_id: self.tail_id.clone(),
            head: self.tail.clone(),
            relation: format!("{}{}", INVERSE_RELATION_PREFIX, self.relation),
            tail_id: self.head_id.clone(),
            tail: self.head.clone(),
        }
    }
}

/// Load examples from a JSON array file.
///
/// # Errors
/// - `GraphError::Io` if the file cannot be read
/// - `GraphError::Parse` if the contents are not a JSON array of examples
pub fn load_examples(path: impl AsRef<Path>) -> GraphResult<Vec<Example>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let examples: Vec<Example> = serde_json::from_str(&contents)?;
    log::debug!("Loaded {} examples from {}", examples.len(), path.display());
    Ok(examples)
}
