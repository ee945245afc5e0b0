//! Dual encoding pipeline.
//!
//! ```text
//! tokens ─▶ TextEncoder ─▶ pool ─┬──────────────────────▶ fusion ─▶ vector
//!                                └─▶ deformable attention ─┘
//! ```
//!
//! Head-relation text runs through `hr_encoder`. Tail and head-only text
//! run through `tail_encoder`, forked from `hr_encoder` at construction so
//! both start from the same weights and then train independently. The
//! attention and fusion modules are shared by both sides.

use candle_core::{Device, Tensor, Var};

use crate::attention::DeformableSelfAttention;
use crate::config::{ModelConfig, PoolingStrategy};
use crate::encoder::{pool_hidden_states, TextEncoder, TokenBatch};
use crate::error::EmbeddingResult;
use crate::fusion::AdaptiveFusion;

/// Which encoder a span goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderSide {
    HeadRelation,
    /// Tail entities and head-only spans.
    Entity,
}

pub struct DualEncoder {
    hr_encoder: Box<dyn TextEncoder>,
    tail_encoder: Box<dyn TextEncoder>,
    attention: DeformableSelfAttention,
    fusion: AdaptiveFusion,
    pooling: PoolingStrategy,
}

impl DualEncoder {
    pub fn new(
        hr_encoder: Box<dyn TextEncoder>,
        config: &ModelConfig,
        device: &Device,
    ) -> EmbeddingResult<Self> {
        let hidden = hr_encoder.hidden_size();
        let tail_encoder = hr_encoder.fork()?;
        let attention = DeformableSelfAttention::new(
            hidden,
            config.head_num,
            config.deformable_points,
            config.sampling_mode,
            device,
        )?;
        let fusion = AdaptiveFusion::new(hidden, device)?;

        Ok(Self {
            hr_encoder,
            tail_encoder,
            attention,
            fusion,
            pooling: config.pooling,
        })
    }

    /// Encode one span into `[B, hidden]`.
    pub fn encode(&self, side: EncoderSide, batch: &TokenBatch) -> EmbeddingResult<Tensor> {
        let encoder = match side {
            EncoderSide::HeadRelation => self.hr_encoder.as_ref(),
            EncoderSide::Entity => self.tail_encoder.as_ref(),
        };
        let hidden = encoder.encode(&batch.token_ids, &batch.attention_mask, &batch.segment_ids)?;
        let pooled = pool_hidden_states(self.pooling, &hidden, &batch.attention_mask)?;
        let attended = self.attention.forward(&pooled)?;
        self.fusion.forward(&pooled, &attended)
    }

    pub fn hidden_size(&self) -> usize {
        self.hr_encoder.hidden_size()
    }

    pub fn pooling(&self) -> PoolingStrategy {
        self.pooling
    }

    pub fn attention(&self) -> &DeformableSelfAttention {
        &self.attention
    }

    pub fn fusion(&self) -> &AdaptiveFusion {
        &self.fusion
    }

    pub fn trainable_vars(&self) -> Vec<&Var> {
        let mut vars = self.hr_encoder.trainable_vars();
        vars.extend(self.tail_encoder.trainable_vars());
        vars.extend(self.attention.trainable_vars());
        vars.extend(self.fusion.trainable_vars());
        vars
    }
}
