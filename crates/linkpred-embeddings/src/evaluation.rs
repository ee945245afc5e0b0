//! Filtered ranking metrics for link prediction.
//!
//! For every query the score of each *other* known correct tail is
//! replaced by the mask sentinel before the target is ranked, so a model is
//! not punished for ranking another true answer first.

use candle_core::{DType, Tensor};
use linkpred_graph::{EntityDict, Example, TripletDict};
use serde::Serialize;

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::logits::MASK_FILL_VALUE;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankingMetrics {
    pub mean_rank: f64,
    pub mrr: f64,
    pub hits_at_1: f64,
    pub hits_at_3: f64,
    pub hits_at_10: f64,
    pub count: usize,
}

impl RankingMetrics {
    /// Aggregate 1-based ranks.
    pub fn from_ranks(ranks: &[usize]) -> Self {
        if ranks.is_empty() {
            return Self::default();
        }
        let n = ranks.len() as f64;
        let hits = |k: usize| ranks.iter().filter(|&&r| r <= k).count() as f64 / n;
        Self {
            mean_rank: ranks.iter().sum::<usize>() as f64 / n,
            mrr: ranks.iter().map(|&r| 1.0 / r as f64).sum::<f64>() / n,
            hits_at_1: hits(1),
            hits_at_3: hits(3),
            hits_at_10: hits(10),
            count: ranks.len(),
        }
    }
}

/// Filtered rank of each example's tail.
///
/// `scores` is `[queries, entities]` with columns indexed by `entity_dict`.
/// The rank is 1 plus the number of candidates scoring strictly higher than
/// the target after filtering.
pub fn compute_ranks(
    scores: &Tensor,
    examples: &[Example],
    entity_dict: &EntityDict,
    triplets: &TripletDict,
) -> EmbeddingResult<Vec<usize>> {
    let rows: Vec<Vec<f32>> = scores
        .to_dtype(DType::F32)
        .and_then(|t| t.to_vec2())
        .map_err(map_candle)?;
    if rows.len() != examples.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: rows.len(),
            got: examples.len(),
        });
    }

    let mut ranks = Vec::with_capacity(rows.len());
    for (mut row, example) in rows.into_iter().zip(examples) {
        let target = entity_dict.entity_to_idx(&example.tail_id)?;
        let target_score = *row.get(target).ok_or(EmbeddingError::InvalidDimension {
            expected: row.len(),
            actual: target,
        })?;

        if let Some(known) = triplets.get_neighbors(&example.head_id, &example.relation) {
            for tail_id in known.iter().filter(|t| **t != example.tail_id) {
                let idx = entity_dict.entity_to_idx(tail_id)?;
                if let Some(score) = row.get_mut(idx) {
                    *score = MASK_FILL_VALUE as f32;
                }
            }
        }

        let higher = row.iter().filter(|&&s| s > target_score).count();
        ranks.push(higher + 1);
    }
    Ok(ranks)
}

/// Filtered MR, MRR and Hits@{1,3,10} over a batch of queries.
pub fn compute_ranking_metrics(
    scores: &Tensor,
    examples: &[Example],
    entity_dict: &EntityDict,
    triplets: &TripletDict,
) -> EmbeddingResult<RankingMetrics> {
    if examples.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }
    let ranks = compute_ranks(scores, examples, entity_dict, triplets)?;
    let metrics = RankingMetrics::from_ranks(&ranks);
    tracing::debug!(
        count = metrics.count,
        mrr = metrics.mrr,
        hits_at_1 = metrics.hits_at_1,
        "Computed ranking metrics"
    );
    Ok(metrics)
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Evaluation error: {}", e),
    }
}
