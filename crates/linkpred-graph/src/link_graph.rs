//! Undirected link graph with level-by-level n-hop neighborhood lookup.
//!
//! The graph is built once from training triples. Every triple contributes
//! an undirected edge between head and tail; relations are ignored.
//!
//! # Performance
//!
//! Uses VecDeque for O(1) frontier operations and HashSet for O(1)
//! visited lookup. A lookup that would visit more than `max_nodes`
//! entities is abandoned and returns an empty set, so a hub entity in a
//! dense graph cannot stall reranking.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::entity::EntityDict;
use crate::error::{GraphError, GraphResult};
use crate::types::Example;

fn default_max_nodes() -> usize {
    100_000
}

/// Link graph limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkGraphConfig {
    /// Abandon an n-hop lookup once more than this many entities are seen.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

impl Default for LinkGraphConfig {
    fn default() -> Self {
        Self {
            max_nodes: default_max_nodes(),
        }
    }
}

impl LinkGraphConfig {
    /// # Errors
    /// - `GraphError::InvalidParameter` if `max_nodes` is 0
    pub fn validate(&self) -> GraphResult<()> {
        if self.max_nodes == 0 {
            return Err(GraphError::InvalidParameter(
                "max_nodes must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Neighborhood lookup used by the reranker.
pub trait LinkGraph {
    /// Dictionary indices of every entity within `n_hop` edges of
    /// `entity_id`, the entity itself included.
    ///
    /// Sets for different `n_hop` may overlap; callers must not assume
    /// they are disjoint.
    fn n_hop_entity_indices(
        &self,
        entity_id: &str,
        entity_dict: &EntityDict,
        n_hop: usize,
    ) -> GraphResult<HashSet<usize>>;
}

/// Adjacency-list link graph held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLinkGraph {
    adjacency: HashMap<String, BTreeSet<String>>,
    config: LinkGraphConfig,
}

impl InMemoryLinkGraph {
    /// Build an undirected graph from training examples.
    pub fn from_examples(examples: &[Example], config: LinkGraphConfig) -> Self {
        let mut adjacency: HashMap<String, BTreeSet<String>> = HashMap::new();
        for ex in examples {
            adjacency
                .entry(ex.head_id.clone())
                .or_default()
                .insert(ex.tail_id.clone());
            adjacency
                .entry(ex.tail_id.clone())
                .or_default()
                .insert(ex.head_id.clone());
        }

        log::debug!(
            "Link graph built: {} entities from {} examples",
            adjacency.len(),
            examples.len()
        );

        Self { adjacency, config }
    }

    #[inline]
    pub fn num_entities(&self) -> usize {
        self.adjacency.len()
    }

    #[inline]
    pub fn config(&self) -> &LinkGraphConfig {
        &self.config
    }

    /// Direct neighbors of an entity in sorted order, truncated to
    /// `max_to_keep`. Unknown entities have no neighbors.
    pub fn neighbor_ids(&self, entity_id: &str, max_to_keep: usize) -> Vec<&str> {
        self.adjacency
            .get(entity_id)
            .map(|set| set.iter().take(max_to_keep).map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Entity ids within `n_hop` edges, seed included.
    ///
    /// Returns an empty set when the visited set exceeds `max_nodes`.
    pub fn n_hop_entity_ids(&self, entity_id: &str, n_hop: usize) -> HashSet<&str> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut frontier: VecDeque<&str> = VecDeque::new();

        let Some((seed, _)) = self.adjacency.get_key_value(entity_id) else {
            return seen;
        };
        seen.insert(seed.as_str());
        frontier.push_back(seed.as_str());

        for _ in 0..n_hop {
            let level_len = frontier.len();
            for _ in 0..level_len {
                let Some(current) = frontier.pop_front() else {
                    break;
                };
                let Some(neighbors) = self.adjacency.get(current) else {
                    continue;
                };
                for node in neighbors {
                    if seen.insert(node.as_str()) {
                        frontier.push_back(node.as_str());
                        if seen.len() > self.config.max_nodes {
                            log::debug!(
                                "n-hop lookup for {} abandoned at {} nodes (limit: {})",
                                entity_id,
                                seen.len(),
                                self.config.max_nodes
                            );
                            return HashSet::new();
                        }
                    }
                }
            }
        }

        seen
    }
}

impl LinkGraph for InMemoryLinkGraph {
    fn n_hop_entity_indices(
        &self,
        entity_id: &str,
        entity_dict: &EntityDict,
        n_hop: usize,
    ) -> GraphResult<HashSet<usize>> {
        if !self.adjacency.contains_key(entity_id) {
            // Entity never seen in training: its neighborhood is itself.
            return Ok(HashSet::from([entity_dict.entity_to_idx(entity_id)?]));
        }
        self.n_hop_entity_ids(entity_id, n_hop)
            .into_iter()
            .map(|id| entity_dict.entity_to_idx(id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Chain a - b - c - d - e.
    fn chain() -> (InMemoryLinkGraph, EntityDict) {
        let examples = vec![
            Example::new("a", "r", "b"),
            Example::new("b", "r", "c"),
            Example::new("c", "r", "d"),
            Example::new("d", "r", "e"),
        ];
        let dict = EntityDict::from_examples(&examples);
        (
            InMemoryLinkGraph::from_examples(&examples, LinkGraphConfig::default()),
            dict,
        )
    }

    fn idx(dict: &EntityDict, ids: &[&str]) -> HashSet<usize> {
        ids.iter().map(|id| dict.entity_to_idx(id).unwrap()).collect()
    }

    #[test]
    fn test_n_hop_levels_are_cumulative() {
        let (graph, dict) = chain();
        assert_eq!(graph.n_hop_entity_indices("a", &dict, 0).unwrap(), idx(&dict, &["a"]));
        assert_eq!(
            graph.n_hop_entity_indices("a", &dict, 1).unwrap(),
            idx(&dict, &["a", "b"])
        );
        assert_eq!(
            graph.n_hop_entity_indices("a", &dict, 3).unwrap(),
            idx(&dict, &["a", "b", "c", "d"])
        );
        assert_eq!(
            graph.n_hop_entity_indices("c", &dict, 1).unwrap(),
            idx(&dict, &["b", "c", "d"])
        );
    }

    #[test]
    fn test_edges_are_undirected() {
        let (graph, dict) = chain();
        let from_e = graph.n_hop_entity_indices("e", &dict, 2).unwrap();
        assert_eq!(from_e, idx(&dict, &["c", "d", "e"]));
    }

    #[test]
    fn test_max_nodes_abandons_lookup() {
        let examples = vec![
            Example::new("hub", "r", "x1"),
            Example::new("hub", "r", "x2"),
            Example::new("hub", "r", "x3"),
        ];
        let dict = EntityDict::from_examples(&examples);
        let graph = InMemoryLinkGraph::from_examples(
            &examples,
            LinkGraphConfig { max_nodes: 2 },
        );
        assert!(graph.n_hop_entity_indices("hub", &dict, 1).unwrap().is_empty());
    }

    #[test]
    fn test_neighbor_ids_sorted_and_truncated() {
        let examples = vec![
            Example::new("hub", "r", "z"),
            Example::new("hub", "r", "m"),
            Example::new("a", "r", "hub"),
        ];
        let graph = InMemoryLinkGraph::from_examples(&examples, LinkGraphConfig::default());
        assert_eq!(graph.neighbor_ids("hub", 10), vec!["a", "m", "z"]);
        assert_eq!(graph.neighbor_ids("hub", 2), vec!["a", "m"]);
        assert!(graph.neighbor_ids("missing", 10).is_empty());
    }

    #[test]
    fn test_isolated_entity_is_its_own_neighborhood() {
        let (graph, _) = chain();
        let dict = EntityDict::from_ids(["a", "b", "c", "d", "e", "lonely"]).unwrap();
        let set = graph.n_hop_entity_indices("lonely", &dict, 3).unwrap();
        assert_eq!(set, idx(&dict, &["lonely"]));
    }

    #[test]
    fn test_unknown_entity_in_dict_is_error() {
        let (graph, _) = chain();
        let dict = EntityDict::from_ids(["a"]).unwrap();
        assert!(graph.n_hop_entity_indices("a", &dict, 1).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(LinkGraphConfig::default().validate().is_ok());
        let bad = LinkGraphConfig { max_nodes: 0 };
        assert!(bad.validate().is_err());
    }
}
