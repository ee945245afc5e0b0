//! Graph-proximity reranking of inference scores.
//!
//! For each query row, every candidate within 1, 2 and 3 hops of the query's
//! head entity gets a small bonus per hop query. The n-hop sets returned by
//! the link graph may overlap (the in-memory graph's sets are cumulative),
//! so an entity in several sets collects several bonuses. Under
//! [`RerankPolicy::HopBonusWithPenalty`] direct neighbors other than the head
//! itself are then penalized.

use candle_core::Tensor;
use linkpred_graph::{EntityDict, Example, GraphError, LinkGraph};

use crate::config::{ModelConfig, RerankPolicy, Task, NEGLIGIBLE_NEIGHBOR_WEIGHT};
use crate::error::{EmbeddingError, EmbeddingResult};

/// Added once per hop query that contains the candidate.
pub const HOP_BONUS: f32 = 0.0015;

/// Added to direct neighbors (except the head) under the penalty policy.
pub const DIRECT_NEIGHBOR_PENALTY: f32 = -0.005;

/// Hop distances queried, `1..=MAX_HOPS`.
pub const MAX_HOPS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reranker {
    neighbor_weight: f64,
    task: Task,
}

impl Reranker {
    pub fn new(neighbor_weight: f64, task: Task) -> Self {
        Self { neighbor_weight, task }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(config.neighbor_weight, config.task)
    }

    pub fn is_enabled(&self) -> bool {
        self.neighbor_weight >= NEGLIGIBLE_NEIGHBOR_WEIGHT
    }

    pub fn policy(&self) -> RerankPolicy {
        self.task.rerank_policy()
    }

    /// Adjust `scores` `[queries, entities]` in place.
    ///
    /// Columns are entity indices in `entity_dict`. Row `i` is adjusted
    /// using the head of `examples[i]`.
    ///
    /// # Errors
    /// - `InductiveRerank` if the task is inductive and reranking is enabled
    /// - `DimensionMismatch` if `examples` and score rows differ
    /// - `Graph` if a head entity is unknown or an index falls outside the score columns
    ///
    /// With reranking disabled, `scores` is not touched at all.
    pub fn rerank_by_graph(
        &self,
        scores: &mut Tensor,
        examples: &[Example],
        entity_dict: &EntityDict,
        link_graph: &dyn LinkGraph,
    ) -> EmbeddingResult<()> {
        if self.task.is_inductive() && self.is_enabled() {
            return Err(EmbeddingError::InductiveRerank {
                task: self.task.to_string(),
                neighbor_weight: self.neighbor_weight,
            });
        }
        if !self.is_enabled() {
            return Ok(());
        }

        let (rows, cols) = scores.dims2().map_err(map_candle)?;
        if examples.len() != rows {
            return Err(EmbeddingError::DimensionMismatch {
                expected: rows,
                got: examples.len(),
            });
        }

        let mut delta = vec![0.0f32; rows * cols];
        for (row, example) in examples.iter().enumerate() {
            let row_delta = &mut delta[row * cols..(row + 1) * cols];

            for n_hop in 1..=MAX_HOPS {
                let indices = link_graph.n_hop_entity_indices(&example.head_id, entity_dict, n_hop)?;
                for idx in indices {
                    *column(row_delta, idx)? += HOP_BONUS;
                }
            }

            if self.policy() == RerankPolicy::HopBonusWithPenalty {
                let head_idx = entity_dict.entity_to_idx(&example.head_id)?;
                let direct = link_graph.n_hop_entity_indices(&example.head_id, entity_dict, 1)?;
                for idx in direct.into_iter().filter(|&idx| idx != head_idx) {
                    *column(row_delta, idx)? += DIRECT_NEIGHBOR_PENALTY;
                }
            }
        }

        let delta = Tensor::from_vec(delta, (rows, cols), scores.device())
            .and_then(|t| t.to_dtype(scores.dtype()))
            .map_err(map_candle)?;
        *scores = (&*scores + delta).map_err(map_candle)?;

        tracing::debug!(
            rows,
            cols,
            policy = ?self.policy(),
            "Reranked scores by graph proximity"
        );
        Ok(())
    }
}

fn column(row: &mut [f32], idx: usize) -> EmbeddingResult<&mut f32> {
    let size = row.len();
    row.get_mut(idx)
        .ok_or(EmbeddingError::Graph(GraphError::IndexOutOfRange { index: idx, size }))
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Rerank error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use candle_core::{DType, Device};
    use linkpred_graph::{GraphResult, InMemoryLinkGraph, LinkGraphConfig};

    /// Link graph with hand-picked n-hop sets.
    struct FixtureGraph {
        hops: HashMap<usize, HashSet<usize>>,
    }

    impl LinkGraph for FixtureGraph {
        fn n_hop_entity_indices(
            &self,
            _entity_id: &str,
            _entity_dict: &EntityDict,
            n_hop: usize,
        ) -> GraphResult<HashSet<usize>> {
            Ok(self.hops.get(&n_hop).cloned().unwrap_or_default())
        }
    }

    fn two_entities() -> (EntityDict, Vec<Example>) {
        let train = vec![Example::new("A", "r", "B")];
        (EntityDict::from_examples(&train), train)
    }

    fn scores(device: &Device) -> Tensor {
        Tensor::new(&[[0.1f32, 0.2]], device).unwrap()
    }

    fn delta(before: &Tensor, after: &Tensor) -> Vec<f32> {
        (after - before).unwrap().flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_disabled_is_bit_identical() {
        let device = Device::Cpu;
        let (dict, train) = two_entities();
        let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
        let original = Tensor::randn(0.0f32, 1.0, (1, 2), &device).unwrap();
        let mut scores = original.copy().unwrap();

        for weight in [0.0, 5e-7] {
            Reranker::new(weight, Task::Fb15k237)
                .rerank_by_graph(&mut scores, &train, &dict, &graph)
                .unwrap();
        }
        let before: Vec<u32> = original
            .flatten_all().unwrap().to_vec1::<f32>().unwrap()
            .iter().map(|v| v.to_bits()).collect();
        let after: Vec<u32> = scores
            .flatten_all().unwrap().to_vec1::<f32>().unwrap()
            .iter().map(|v| v.to_bits()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_overlapping_hops_add_up() {
        let device = Device::Cpu;
        let (dict, train) = two_entities();
        let graph = FixtureGraph {
            hops: HashMap::from([
                (1, HashSet::from([1])),
                (2, HashSet::from([1])),
                (3, HashSet::new()),
            ]),
        };
        let before = scores(&device);
        let mut after = before.copy().unwrap();
        Reranker::new(0.05, Task::Wn18rr)
            .rerank_by_graph(&mut after, &train, &dict, &graph)
            .unwrap();
        let d = delta(&before, &after);
        assert!(d[0].abs() < 1e-7);
        assert!((d[1] - 0.003).abs() < 1e-6);
    }

    #[test]
    fn test_in_memory_graph_cumulative_bonus() {
        let device = Device::Cpu;
        let (dict, train) = two_entities();
        let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
        let before = scores(&device);
        let mut after = before.copy().unwrap();
        Reranker::new(0.05, Task::Wn18rr)
            .rerank_by_graph(&mut after, &train, &dict, &graph)
            .unwrap();
        // A and B are in the 1-, 2- and 3-hop sets of A
        for d in delta(&before, &after) {
            assert!((d - 3.0 * HOP_BONUS).abs() < 1e-6);
        }
    }

    #[test]
    fn test_penalty_policy_spares_head() {
        let device = Device::Cpu;
        let (dict, train) = two_entities();
        let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
        let before = scores(&device);
        let mut after = before.copy().unwrap();
        Reranker::new(0.05, Task::Fb15k237)
            .rerank_by_graph(&mut after, &train, &dict, &graph)
            .unwrap();
        let d = delta(&before, &after);
        assert!((d[0] - 3.0 * HOP_BONUS).abs() < 1e-6);
        assert!((d[1] - (3.0 * HOP_BONUS + DIRECT_NEIGHBOR_PENALTY)).abs() < 1e-6);
    }

    #[test]
    fn test_inductive_task_fails_before_touching_scores() {
        let device = Device::Cpu;
        let (dict, train) = two_entities();
        let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
        let mut s = scores(&device);
        let result = Reranker::new(0.05, Task::Wiki5mInd).rerank_by_graph(&mut s, &train, &dict, &graph);
        assert!(matches!(result, Err(EmbeddingError::InductiveRerank { .. })));

        Reranker::new(0.0, Task::Wiki5mInd)
            .rerank_by_graph(&mut s, &train, &dict, &graph)
            .unwrap();
    }

    #[test]
    fn test_row_count_and_index_checks() {
        let device = Device::Cpu;
        let (dict, train) = two_entities();
        let graph = InMemoryLinkGraph::from_examples(&train, LinkGraphConfig::default());
        let mut two_rows = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        let result = Reranker::new(0.05, Task::Wn18rr).rerank_by_graph(&mut two_rows, &train, &dict, &graph);
        assert!(matches!(result, Err(EmbeddingError::DimensionMismatch { .. })));

        let mut one_col = Tensor::zeros((1, 1), DType::F32, &device).unwrap();
        let result = Reranker::new(0.05, Task::Wn18rr).rerank_by_graph(&mut one_col, &train, &dict, &graph);
        assert!(matches!(
            result,
            Err(EmbeddingError::Graph(GraphError::IndexOutOfRange { index: 1, size: 1 }))
        ));
    }
}
