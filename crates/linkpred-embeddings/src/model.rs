//! Link prediction bi-encoder.
//!
//! [`LinkPredictionModel`] ties the dual encoding pipeline to the logit
//! assembler and carries the train/eval flag that decides whether the
//! margin, cached negatives and self-negatives apply.

use candle_core::{Device, Tensor, Var};

use crate::config::ModelConfig;
use crate::encoder::{TextEncoder, TokenBatch};
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::logits::{BatchContext, LogitAssembler, LogitOutput, NegativeCache, Temperature};
use crate::pipeline::{DualEncoder, EncoderSide};

/// Vectors for one batch, each `[B, hidden]`.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    pub hr_vector: Tensor,
    pub tail_vector: Tensor,
    /// Present when head-only tokens were supplied.
    pub head_vector: Option<Tensor>,
}

/// Entity vectors `[B, hidden]`, detached from any autograd graph.
#[derive(Debug, Clone)]
pub struct EntityEmbeddings {
    pub ent_vectors: Tensor,
}

/// What to encode.
#[derive(Debug, Clone, Copy)]
pub enum EncoderRequest<'a> {
    Full {
        hr: &'a TokenBatch,
        tail: &'a TokenBatch,
        head: Option<&'a TokenBatch>,
    },
    /// Tail-side only, for building the entity index at inference.
    EntityOnly { tail: &'a TokenBatch },
}

#[derive(Debug, Clone)]
pub enum EncoderResponse {
    Full(ForwardOutput),
    Entities(EntityEmbeddings),
}

pub struct LinkPredictionModel {
    encoder: DualEncoder,
    assembler: LogitAssembler,
    config: ModelConfig,
    training: bool,
}

impl LinkPredictionModel {
    /// Build the model around `encoder`. The tail encoder is forked from it.
    ///
    /// Starts in training mode.
    ///
    /// # Errors
    /// - `ConfigError` / `InductiveRerank` if `config` fails validation
    pub fn new(
        config: ModelConfig,
        encoder: Box<dyn TextEncoder>,
        device: &Device,
    ) -> EmbeddingResult<Self> {
        config.validate()?;
        let hidden = encoder.hidden_size();
        let encoder = DualEncoder::new(encoder, &config, device)?;
        let assembler = LogitAssembler::new(&config, hidden, device)?;

        let model = Self {
            encoder,
            assembler,
            config,
            training: true,
        };
        tracing::info!(
            hidden_size = hidden,
            heads = model.config.head_num,
            points = model.config.deformable_points,
            pooling = %model.config.pooling,
            pre_batch = model.config.pre_batch,
            trainable_params = model.num_params(),
            "Created link prediction model"
        );
        Ok(model)
    }

    /// Encode head-relation, tail and optional head-only spans.
    pub fn forward(
        &self,
        hr: &TokenBatch,
        tail: &TokenBatch,
        head: Option<&TokenBatch>,
    ) -> EmbeddingResult<ForwardOutput> {
        if hr.batch_size() != tail.batch_size() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: hr.batch_size(),
                got: tail.batch_size(),
            });
        }
        let hr_vector = self.encoder.encode(EncoderSide::HeadRelation, hr)?;
        let tail_vector = self.encoder.encode(EncoderSide::Entity, tail)?;
        let head_vector = head
            .map(|h| self.encoder.encode(EncoderSide::Entity, h))
            .transpose()?;

        Ok(ForwardOutput {
            hr_vector,
            tail_vector,
            head_vector,
        })
    }

    /// Tail-side vectors only, detached from the autograd graph.
    ///
    /// The encoder still runs on the trainable `Var`s and candle records the
    /// op graph while it does, so peak memory matches a training forward
    /// pass. Only the returned tensor is cut loose; nothing built from it
    /// reaches the parameters on `backward`. Encode large entity sets in
    /// chunks.
    pub fn predict_ent_embedding(&self, tail: &TokenBatch) -> EmbeddingResult<EntityEmbeddings> {
        let ent_vectors = self.encoder.encode(EncoderSide::Entity, tail)?.detach();
        Ok(EntityEmbeddings { ent_vectors })
    }

    pub fn run(&self, request: EncoderRequest<'_>) -> EmbeddingResult<EncoderResponse> {
        match request {
            EncoderRequest::Full { hr, tail, head } => {
                self.forward(hr, tail, head).map(EncoderResponse::Full)
            }
            EncoderRequest::EntityOnly { tail } => {
                self.predict_ent_embedding(tail).map(EncoderResponse::Entities)
            }
        }
    }

    /// Score matrix, labels and detached vectors for `output`.
    ///
    /// In training mode this also refreshes the negative cache.
    pub fn compute_logits(
        &mut self,
        output: &ForwardOutput,
        ctx: &BatchContext<'_>,
    ) -> EmbeddingResult<LogitOutput> {
        self.assembler.compute_logits(
            &output.hr_vector,
            &output.tail_vector,
            output.head_vector.as_ref(),
            ctx,
            self.training,
        )
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn hidden_size(&self) -> usize {
        self.encoder.hidden_size()
    }

    pub fn temperature(&self) -> &Temperature {
        self.assembler.temperature()
    }

    pub fn negative_cache(&self) -> Option<&NegativeCache> {
        self.assembler.cache()
    }

    /// Get trainable variables for optimizer registration.
    pub fn trainable_vars(&self) -> Vec<&Var> {
        let mut vars = self.encoder.trainable_vars();
        if let Some(var) = self.assembler.temperature().var() {
            vars.push(var);
        }
        vars
    }

    pub fn num_params(&self) -> usize {
        self.trainable_vars()
            .iter()
            .map(|v| v.as_tensor().elem_count())
            .sum()
    }
}
