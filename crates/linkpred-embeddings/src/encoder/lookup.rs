//! Embedding-table text encoder.
//!
//! `hidden = LayerNorm(word[token] + segment[type] + position[pos])`, the
//! embedding stage of a BERT encoder without the transformer stack. Good
//! enough to train small graphs from scratch and to drive the pipeline in
//! tests.

use candle_core::{DType, Device, Tensor, Var};

use super::TextEncoder;
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::layers::{layer_norm, LAYER_NORM_EPS};

/// Table sizes for [`LookupEncoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupEncoderConfig {
    pub vocab_size: usize,
    pub type_vocab_size: usize,
    pub max_position: usize,
    pub hidden_size: usize,
}

impl Default for LookupEncoderConfig {
    fn default() -> Self {
        Self {
            vocab_size: 30522,
            type_vocab_size: 2,
            max_position: 512,
            hidden_size: 768,
        }
    }
}

impl LookupEncoderConfig {
    pub fn num_params(&self) -> usize {
        (self.vocab_size + self.type_vocab_size + self.max_position + 2) * self.hidden_size
    }
}

pub struct LookupEncoder {
    /// [vocab_size, hidden]
    word_embeddings: Var,
    /// [type_vocab_size, hidden]
    segment_embeddings: Var,
    /// [max_position, hidden]
    position_embeddings: Var,
    ln_gamma: Var,
    ln_beta: Var,
    config: LookupEncoderConfig,
}

impl LookupEncoder {
    /// Random-normal tables (std 0.02), identity LayerNorm.
    pub fn new(config: LookupEncoderConfig, device: &Device) -> EmbeddingResult<Self> {
        if config.vocab_size == 0
            || config.type_vocab_size == 0
            || config.max_position == 0
            || config.hidden_size == 0
        {
            return Err(EmbeddingError::ConfigError {
                message: format!("lookup encoder sizes must be > 0, got {:?}", config),
            });
        }
        let h = config.hidden_size;
        let table = |rows: usize| -> EmbeddingResult<Var> {
            let t = Tensor::randn(0.0f32, 0.02, (rows, h), device).map_err(map_candle)?;
            Var::from_tensor(&t).map_err(map_candle)
        };

        let word_embeddings = table(config.vocab_size)?;
        let segment_embeddings = table(config.type_vocab_size)?;
        let position_embeddings = table(config.max_position)?;
        let ln_gamma = Var::from_tensor(&Tensor::ones(h, DType::F32, device).map_err(map_candle)?)
            .map_err(map_candle)?;
        let ln_beta = Var::from_tensor(&Tensor::zeros(h, DType::F32, device).map_err(map_candle)?)
            .map_err(map_candle)?;

        tracing::info!(
            vocab_size = config.vocab_size,
            hidden_size = h,
            params = config.num_params(),
            "Created lookup text encoder"
        );

        Ok(Self {
            word_embeddings,
            segment_embeddings,
            position_embeddings,
            ln_gamma,
            ln_beta,
            config,
        })
    }

    pub fn config(&self) -> &LookupEncoderConfig {
        &self.config
    }

    /// Gather rows of `table` for every id in `ids` `[B, L]`, giving `[B, L, H]`.
    fn gather(table: &Tensor, ids: &Tensor, batch: usize, seq_len: usize) -> EmbeddingResult<Tensor> {
        let hidden = table.dim(1).map_err(map_candle)?;
        let flat = ids
            .to_dtype(DType::U32)
            .and_then(|t| t.flatten_all())
            .map_err(map_candle)?;
        table
            .index_select(&flat, 0)
            .and_then(|t| t.reshape((batch, seq_len, hidden)))
            .map_err(map_candle)
    }
}

impl TextEncoder for LookupEncoder {
    fn encode(
        &self,
        token_ids: &Tensor,
        _attention_mask: &Tensor,
        segment_ids: &Tensor,
    ) -> EmbeddingResult<Tensor> {
        let (batch, seq_len) = token_ids.dims2().map_err(map_candle)?;
        if seq_len > self.config.max_position {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.config.max_position,
                actual: seq_len,
            });
        }

        let words = Self::gather(self.word_embeddings.as_tensor(), token_ids, batch, seq_len)?;
        let segments = Self::gather(self.segment_embeddings.as_tensor(), segment_ids, batch, seq_len)?;
        let positions = self
            .position_embeddings
            .as_tensor()
            .narrow(0, 0, seq_len)
            .map_err(map_candle)?;

        let summed = (words + segments)
            .and_then(|t| t.broadcast_add(&positions))
            .map_err(map_candle)?;

        layer_norm(
            &summed,
            self.ln_gamma.as_tensor(),
            self.ln_beta.as_tensor(),
            LAYER_NORM_EPS,
        )
    }

    fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    fn fork(&self) -> EmbeddingResult<Box<dyn TextEncoder>> {
        let copy = |v: &Var| -> EmbeddingResult<Var> {
            let t = v.as_tensor().copy().map_err(map_candle)?;
            Var::from_tensor(&t).map_err(map_candle)
        };
        Ok(Box::new(Self {
            word_embeddings: copy(&self.word_embeddings)?,
            segment_embeddings: copy(&self.segment_embeddings)?,
            position_embeddings: copy(&self.position_embeddings)?,
            ln_gamma: copy(&self.ln_gamma)?,
            ln_beta: copy(&self.ln_beta)?,
            config: self.config,
        }))
    }

    fn trainable_vars(&self) -> Vec<&Var> {
        vec![
            &self.word_embeddings,
            &self.segment_embeddings,
            &self.position_embeddings,
            &self.ln_gamma,
            &self.ln_beta,
        ]
    }
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Lookup encoder error: {}", e),
    }
}
