//! Known true facts, indexed by (head, relation).

use std::collections::{HashMap, HashSet};

use crate::types::Example;

/// `(head_id, relation) → {tail_id}` for every known true triple.
///
/// Used to keep other correct answers out of the negative set during
/// training and out of the ranking during filtered evaluation.
#[derive(Debug, Clone, Default)]
pub struct TripletDict {
    facts: HashMap<(String, String), HashSet<String>>,
    num_triples: usize,
}

impl TripletDict {
    /// Index examples as given.
    pub fn from_examples(examples: &[Example]) -> Self {
        let mut dict = Self::default();
        for ex in examples {
            dict.insert(ex);
        }
        dict
    }

    /// Index examples together with their inverted triples.
    ///
    /// Training data for tail prediction is augmented with
    /// `(tail, "inverse " + relation, head)`, so the filter must know those
    /// facts too.
    pub fn from_examples_with_inverse(examples: &[Example]) -> Self {
        let mut dict = Self::default();
        for ex in examples {
            dict.insert(ex);
            dict.insert(&ex.inverted());
        }
        dict
    }

    /// Add one triple.
    pub fn insert(&mut self, ex: &Example) {
        let inserted = self
            .facts
            .entry((ex.head_id.clone(), ex.relation.clone()))
            .or_default()
            .insert(ex.tail_id.clone());
        if inserted {
            self.num_triples += 1;
        }
    }

    /// Known tails for `(head_id, relation)`; empty when none are known.
    pub fn get_neighbors(&self, head_id: &str, relation: &str) -> Option<&HashSet<String>> {
        self.facts.get(&(head_id.to_string(), relation.to_string()))
    }

    /// Whether `(head_id, relation, tail_id)` is a known fact.
    pub fn contains(&self, head_id: &str, relation: &str, tail_id: &str) -> bool {
        self.get_neighbors(head_id, relation)
            .is_some_and(|tails| tails.contains(tail_id))
    }

    /// Number of distinct triples.
    #[inline]
    pub fn len(&self) -> usize {
        self.num_triples
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.num_triples == 0
    }
}
