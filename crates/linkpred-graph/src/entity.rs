//! Entity dictionary: stable mapping between entity ids and score columns.

use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};
use crate::types::Example;

/// Ordered set of entity ids.
///
/// The position of an entity in the dictionary is its column in every
/// inference score matrix, so the order must not change after scoring.
#[derive(Debug, Clone, Default)]
pub struct EntityDict {
    ids: Vec<String>,
    index: HashMap<String, usize>,
}

impl EntityDict {
    /// Build from an explicit, ordered id list.
    ///
    /// # Errors
    /// - `GraphError::DuplicateEntity` if an id appears twice
    pub fn from_ids<I, S>(ids: I) -> GraphResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dict = Self::default();
        for id in ids {
            let id = id.into();
            if dict.index.contains_key(&id) {
                return Err(GraphError::DuplicateEntity(id));
            }
            dict.index.insert(id.clone(), dict.ids.len());
            dict.ids.push(id);
        }
        Ok(dict)
    }

    /// Build from examples, in first-seen order (heads before tails).
    pub fn from_examples(examples: &[Example]) -> Self {
        let mut dict = Self::default();
        for ex in examples {
            dict.insert_if_absent(&ex.head_id);
            dict.insert_if_absent(&ex.tail_id);
        }
        dict
    }

    fn insert_if_absent(&mut self, id: &str) {
        if !self.index.contains_key(id) {
            self.index.insert(id.to_string(), self.ids.len());
            self.ids.push(id.to_string());
        }
    }

    /// Column index of an entity.
    ///
    /// # Errors
    /// - `GraphError::UnknownEntity` if the id is not in the dictionary
    pub fn entity_to_idx(&self, entity_id: &str) -> GraphResult<usize> {
        self.index
            .get(entity_id)
            .copied()
            .ok_or_else(|| GraphError::UnknownEntity(entity_id.to_string()))
    }

    /// Entity id at a column index.
    pub fn idx_to_entity(&self, idx: usize) -> GraphResult<&str> {
        self.ids
            .get(idx)
            .map(String::as_str)
            .ok_or(GraphError::IndexOutOfRange {
                index: idx,
                size: self.ids.len(),
            })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterate entity ids in column order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_examples_first_seen_order() {
        let examples = vec![Example::new("b", "r", "a"), Example::new("a", "r", "c")];
        let dict = EntityDict::from_examples(&examples);
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.entity_to_idx("b").unwrap(), 0);
        assert_eq!(dict.entity_to_idx("a").unwrap(), 1);
        assert_eq!(dict.entity_to_idx("c").unwrap(), 2);
        assert_eq!(dict.idx_to_entity(2).unwrap(), "c");
    }

    #[test]
    fn test_unknown_entity_fails() {
        let dict = EntityDict::from_ids(["x"]).unwrap();
        assert!(matches!(
            dict.entity_to_idx("y"),
            Err(GraphError::UnknownEntity(id)) if id == "y"
        ));
        assert!(matches!(
            dict.idx_to_entity(5),
            Err(GraphError::IndexOutOfRange { index: 5, size: 1 })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = EntityDict::from_ids(["x", "y", "x"]);
        assert!(matches!(result, Err(GraphError::DuplicateEntity(_))));
    }
}
