//! Contrastive training loss.
//!
//! InfoNCE in both directions over the assembled logits:
//!
//! ```text
//! L = CE(logits, labels) + CE(logits[:, :B]ᵀ, labels)
//! ```
//!
//! The first term ranks every candidate column (in-batch, cached and
//! self-negative) for each query. The second ranks the in-batch queries for
//! each tail. Masked positions hold the mask sentinel and contribute no
//! probability mass.

use candle_core::Tensor;

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::logits::LogitOutput;

/// Per-component loss values for logging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossComponents {
    /// Query → tail cross-entropy.
    pub query_to_tail: f32,
    /// Tail → query cross-entropy, 0 when disabled.
    pub tail_to_query: f32,
    pub total: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct ContrastiveLoss {
    symmetric: bool,
}

impl Default for ContrastiveLoss {
    fn default() -> Self {
        Self { symmetric: true }
    }
}

impl ContrastiveLoss {
    /// `symmetric = false` drops the tail → query term.
    pub fn new(symmetric: bool) -> Self {
        Self { symmetric }
    }

    /// Scalar loss plus its components.
    ///
    /// Uses `candle_nn::loss::cross_entropy` so the result stays
    /// differentiable with respect to the logits.
    pub fn compute(&self, output: &LogitOutput) -> EmbeddingResult<(Tensor, LossComponents)> {
        let (batch, cols) = output.logits.dims2().map_err(map_candle)?;
        if batch == 0 {
            return Err(EmbeddingError::EmptyInput);
        }
        if cols < batch {
            return Err(EmbeddingError::InvalidDimension {
                expected: batch,
                actual: cols,
            });
        }

        let forward = candle_nn::loss::cross_entropy(&output.logits, &output.labels)
            .map_err(map_candle)?;
        let forward_value: f32 = forward.to_scalar().map_err(map_candle)?;

        if !self.symmetric {
            let components = LossComponents {
                query_to_tail: forward_value,
                tail_to_query: 0.0,
                total: forward_value,
            };
            return Ok((forward, components));
        }

        let transposed = output
            .logits
            .narrow(1, 0, batch)
            .and_then(|t| t.t())
            .and_then(|t| t.contiguous())
            .map_err(map_candle)?;
        let backward = candle_nn::loss::cross_entropy(&transposed, &output.labels)
            .map_err(map_candle)?;
        let backward_value: f32 = backward.to_scalar().map_err(map_candle)?;

        let total = (forward + backward).map_err(map_candle)?;
        let components = LossComponents {
            query_to_tail: forward_value,
            tail_to_query: backward_value,
            total: forward_value + backward_value,
        };
        Ok((total, components))
    }
}

/// Fraction of rows whose label column is among the `k` highest logits.
///
/// A row counts as a hit when fewer than `k` columns score strictly higher
/// than the label column.
pub fn topk_accuracy(logits: &Tensor, labels: &Tensor, k: usize) -> EmbeddingResult<f32> {
    let rows: Vec<Vec<f32>> = logits
        .to_dtype(candle_core::DType::F32)
        .and_then(|t| t.to_vec2())
        .map_err(map_candle)?;
    let labels: Vec<u32> = labels.to_vec1().map_err(map_candle)?;
    if rows.len() != labels.len() {
        return Err(EmbeddingError::DimensionMismatch {
            expected: rows.len(),
            got: labels.len(),
        });
    }
    if rows.is_empty() {
        return Err(EmbeddingError::EmptyInput);
    }

    let mut hits = 0usize;
    for (row, &label) in rows.iter().zip(&labels) {
        let target = *row.get(label as usize).ok_or(EmbeddingError::InvalidDimension {
            expected: row.len(),
            actual: label as usize,
        })?;
        let higher = row.iter().filter(|&&v| v > target).count();
        if higher < k {
            hits += 1;
        }
    }
    Ok(hits as f32 / rows.len() as f32)
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Loss computation error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn output(logits: Tensor) -> LogitOutput {
        let device = logits.device().clone();
        let batch = logits.dim(0).unwrap();
        LogitOutput {
            labels: Tensor::arange(0u32, batch as u32, &device).unwrap(),
            inv_t: Tensor::new(1.0f32, &device).unwrap(),
            hr_vector: Tensor::zeros((batch, 1), candle_core::DType::F32, &device).unwrap(),
            tail_vector: Tensor::zeros((batch, 1), candle_core::DType::F32, &device).unwrap(),
            logits,
        }
    }

    #[test]
    fn test_uniform_logits_give_log_n() {
        let device = Device::Cpu;
        let out = output(Tensor::zeros((4, 4), candle_core::DType::F32, &device).unwrap());
        let (loss, parts) = ContrastiveLoss::default().compute(&out).unwrap();
        let expected = 2.0 * (4.0f32).ln();
        assert!((parts.total - expected).abs() < 1e-5);
        let value: f32 = loss.to_scalar().unwrap();
        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn test_confident_diagonal_is_near_zero() {
        let device = Device::Cpu;
        let logits = Tensor::new(&[[20.0f32, 0.0, 0.0], [0.0, 20.0, -10000.0]], &device).unwrap();
        let (_, parts) = ContrastiveLoss::default().compute(&output(logits)).unwrap();
        assert!(parts.query_to_tail < 1e-6);
        assert!(parts.tail_to_query < 1e-6);
    }

    #[test]
    fn test_one_directional() {
        let device = Device::Cpu;
        let out = output(Tensor::zeros((2, 5), candle_core::DType::F32, &device).unwrap());
        let (_, parts) = ContrastiveLoss::new(false).compute(&out).unwrap();
        assert_eq!(parts.tail_to_query, 0.0);
        assert!((parts.total - (5.0f32).ln()).abs() < 1e-5);
    }

    #[test]
    fn test_topk_accuracy() {
        let device = Device::Cpu;
        let logits = Tensor::new(
            &[[0.9f32, 0.1, 0.5], [0.8, 0.2, 0.3], [0.1, 0.2, 0.3]],
            &device,
        )
        .unwrap();
        let labels = Tensor::new(&[0u32, 1, 2], &device).unwrap();
        assert!((topk_accuracy(&logits, &labels, 1).unwrap() - 2.0 / 3.0).abs() < 1e-6);
        assert!((topk_accuracy(&logits, &labels, 3).unwrap() - 1.0).abs() < 1e-6);
    }
}
