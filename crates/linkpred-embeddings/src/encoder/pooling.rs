//! Reduce per-token hidden states to one L2-normalized vector per row.

use candle_core::Tensor;

use crate::config::PoolingStrategy;
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::layers::l2_normalize;

/// Padded positions are replaced with this before max pooling.
const MAX_POOL_FILL: f64 = -1e4;

/// Mean pooling denominator floor, for rows with no unmasked tokens.
const MEAN_POOL_MIN_COUNT: f64 = 1e-4;

/// Pool `hidden` `[B, L, H]` under `attention_mask` `[B, L]` into `[B, H]`.
///
/// - `Cls`: first token, mask ignored
/// - `Max`: element-wise max over unmasked tokens
/// - `Mean`: average over unmasked tokens
///
/// Every strategy finishes with L2 normalization.
pub fn pool_hidden_states(
    strategy: PoolingStrategy,
    hidden: &Tensor,
    attention_mask: &Tensor,
) -> EmbeddingResult<Tensor> {
    let (batch, seq_len, _hidden) = hidden.dims3().map_err(map_candle)?;
    let (mask_batch, mask_len) = attention_mask.dims2().map_err(map_candle)?;
    if mask_batch != batch {
        return Err(EmbeddingError::DimensionMismatch {
            expected: batch,
            got: mask_batch,
        });
    }
    if mask_len != seq_len {
        return Err(EmbeddingError::DimensionMismatch {
            expected: seq_len,
            got: mask_len,
        });
    }
    if seq_len == 0 {
        return Err(EmbeddingError::EmptyInput);
    }

    let pooled = match strategy {
        PoolingStrategy::Cls => hidden
            .narrow(1, 0, 1)
            .and_then(|t| t.squeeze(1))
            .map_err(map_candle)?,
        PoolingStrategy::Max => {
            let keep = attention_mask
                .ne(0u32)
                .and_then(|m| m.unsqueeze(2))
                .and_then(|m| m.broadcast_as(hidden.shape()))
                .map_err(map_candle)?;
            let fill = Tensor::full(MAX_POOL_FILL, hidden.shape(), hidden.device())
                .and_then(|t| t.to_dtype(hidden.dtype()))
                .map_err(map_candle)?;
            keep.where_cond(hidden, &fill)
                .and_then(|t| t.max(1))
                .map_err(map_candle)?
        }
        PoolingStrategy::Mean => {
            let weights = attention_mask
                .to_dtype(hidden.dtype())
                .and_then(|m| m.unsqueeze(2))
                .map_err(map_candle)?;
            let summed = hidden
                .broadcast_mul(&weights)
                .and_then(|t| t.sum(1))
                .map_err(map_candle)?;
            let counts = weights
                .sum(1)
                .and_then(|t| t.maximum(MEAN_POOL_MIN_COUNT))
                .map_err(map_candle)?;
            summed.broadcast_div(&counts).map_err(map_candle)?
        }
    };

    l2_normalize(&pooled)
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Pooling error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, IndexOp};

    fn hidden(device: &Device) -> Tensor {
        // batch 1, 3 tokens, hidden 2; last token is padding
        Tensor::new(&[[[3.0f32, 0.0], [0.0, 4.0], [100.0, 100.0]]], device).unwrap()
    }

    fn mask(device: &Device) -> Tensor {
        Tensor::new(&[[1u32, 1, 0]], device).unwrap()
    }

    fn row(t: &Tensor) -> Vec<f32> {
        t.i(0).unwrap().to_vec1().unwrap()
    }

    #[test]
    fn test_cls_takes_first_token_normalized() {
        let device = Device::Cpu;
        let out = pool_hidden_states(PoolingStrategy::Cls, &hidden(&device), &mask(&device)).unwrap();
        assert_eq!(out.dims(), &[1, 2]);
        assert_eq!(row(&out), vec![1.0, 0.0]);
    }

    #[test]
    fn test_max_ignores_padding() {
        let device = Device::Cpu;
        let out = pool_hidden_states(PoolingStrategy::Max, &hidden(&device), &mask(&device)).unwrap();
        let v = row(&out);
        // max over unmasked = [3, 4] -> [0.6, 0.8]
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_mean_ignores_padding() {
        let device = Device::Cpu;
        let out = pool_hidden_states(PoolingStrategy::Mean, &hidden(&device), &mask(&device)).unwrap();
        let v = row(&out);
        // mean over unmasked = [1.5, 2] -> [0.6, 0.8]
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_mean_all_masked_row_is_finite() {
        let device = Device::Cpu;
        let all_masked = Tensor::zeros((1, 3), DType::U32, &device).unwrap();
        let out = pool_hidden_states(PoolingStrategy::Mean, &hidden(&device), &all_masked).unwrap();
        assert!(row(&out).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let device = Device::Cpu;
        let bad = Tensor::new(&[[1u32, 1]], &device).unwrap();
        let result = pool_hidden_states(PoolingStrategy::Mean, &hidden(&device), &bad);
        assert!(matches!(result, Err(EmbeddingError::DimensionMismatch { .. })));
    }
}
