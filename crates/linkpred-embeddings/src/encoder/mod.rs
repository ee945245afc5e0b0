//! Text encoder seam and token batches.
//!
//! The pretrained transformer backbone is external: anything that maps
//! `(token_ids, attention_mask, segment_ids)` to per-token hidden states
//! implements [`TextEncoder`]. [`LookupEncoder`] is the in-crate
//! implementation used when no pretrained backbone is wired in.

mod lookup;
mod pooling;

pub use lookup::{LookupEncoder, LookupEncoderConfig};
pub use pooling::pool_hidden_states;

use candle_core::{DType, Device, Tensor, Var};

use crate::error::{EmbeddingError, EmbeddingResult};

/// Per-token text encoder.
pub trait TextEncoder: Send + Sync {
    /// Encode a token batch.
    ///
    /// All three inputs are `[batch, seq_len]`. Returns `[batch, seq_len, hidden_size]`.
    fn encode(
        &self,
        token_ids: &Tensor,
        attention_mask: &Tensor,
        segment_ids: &Tensor,
    ) -> EmbeddingResult<Tensor>;

    fn hidden_size(&self) -> usize;

    /// Independent copy with the same parameter values.
    ///
    /// Training one copy must leave the other untouched.
    fn fork(&self) -> EmbeddingResult<Box<dyn TextEncoder>>;

    /// Get trainable variables for optimizer registration.
    fn trainable_vars(&self) -> Vec<&Var>;
}

/// Token ids, attention mask and segment ids for one text span.
#[derive(Debug, Clone)]
pub struct TokenBatch {
    /// [batch, seq_len] u32
    pub token_ids: Tensor,
    /// [batch, seq_len], nonzero for real tokens
    pub attention_mask: Tensor,
    /// [batch, seq_len] u32
    pub segment_ids: Tensor,
}

impl TokenBatch {
    pub fn new(token_ids: Tensor, attention_mask: Tensor, segment_ids: Tensor) -> EmbeddingResult<Self> {
        let (batch, seq_len) = token_ids.dims2().map_err(map_candle)?;
        for t in [&attention_mask, &segment_ids] {
            let (b, l) = t.dims2().map_err(map_candle)?;
            if b != batch {
                return Err(EmbeddingError::DimensionMismatch { expected: batch, got: b });
            }
            if l != seq_len {
                return Err(EmbeddingError::DimensionMismatch { expected: seq_len, got: l });
            }
        }
        Ok(Self {
            token_ids,
            attention_mask,
            segment_ids,
        })
    }

    /// Build a right-padded batch from unpadded id sequences.
    ///
    /// Padding uses token id 0 and mask 0. All segment ids are 0.
    pub fn from_sequences(sequences: &[Vec<u32>], device: &Device) -> EmbeddingResult<Self> {
        if sequences.is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        let seq_len = sequences.iter().map(Vec::len).max().unwrap_or(0).max(1);
        let batch = sequences.len();

        let mut ids = vec![0u32; batch * seq_len];
        let mut mask = vec![0u32; batch * seq_len];
        for (row, seq) in sequences.iter().enumerate() {
            for (col, &id) in seq.iter().enumerate() {
                ids[row * seq_len + col] = id;
                mask[row * seq_len + col] = 1;
            }
        }

        Ok(Self {
            token_ids: Tensor::from_vec(ids, (batch, seq_len), device).map_err(map_candle)?,
            attention_mask: Tensor::from_vec(mask, (batch, seq_len), device).map_err(map_candle)?,
            segment_ids: Tensor::zeros((batch, seq_len), DType::U32, device).map_err(map_candle)?,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.token_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn seq_len(&self) -> usize {
        self.token_ids.dims().get(1).copied().unwrap_or(0)
    }
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Token batch error: {}", e),
    }
}
