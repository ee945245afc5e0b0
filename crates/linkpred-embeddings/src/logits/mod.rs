//! Contrastive logit assembly.
//!
//! Builds the `[B, B + cache + self_neg]` score matrix for a batch:
//!
//! 1. `labels[i] = i`
//! 2. `logits = hr · tailᵀ`
//! 3. training: subtract the additive margin on the diagonal
//! 4. scale by `exp(log_inv_t)`
//! 5. triplet mask: invalid negatives set to [`MASK_FILL_VALUE`]
//! 6. training with cache: append `[B, capacity]` cached-negative columns
//! 7. training with self-negatives: append one `hr · head` column

mod cache;
mod temperature;

pub use cache::NegativeCache;
pub use temperature::Temperature;

use candle_core::{DType, Device, Tensor};
use linkpred_graph::{Example, NegativeMaskBuilder, TripletMask};

use crate::config::ModelConfig;
use crate::error::{EmbeddingError, EmbeddingResult};

/// Logit written at masked positions.
///
/// Small enough in magnitude to be exact in f16 (max 65504) and bf16, large
/// enough that `exp(x - max)` underflows to 0 after softmax.
pub const MASK_FILL_VALUE: f64 = -1e4;

/// Per-batch inputs beyond the vectors themselves.
#[derive(Clone, Copy, Default)]
pub struct BatchContext<'a> {
    /// Source examples, one per row. Required by the negative cache.
    pub examples: &'a [Example],
    /// `[B, B]`, `true` = valid negative or positive.
    pub triplet_mask: Option<&'a TripletMask>,
    /// `[B]`, `false` where the head is itself a correct tail.
    pub self_negative_mask: Option<&'a [bool]>,
    /// Masks cached negatives once the cache is warm.
    pub mask_builder: Option<&'a dyn NegativeMaskBuilder>,
}

impl<'a> BatchContext<'a> {
    pub fn new(examples: &'a [Example]) -> Self {
        Self {
            examples,
            ..Default::default()
        }
    }

    pub fn with_triplet_mask(mut self, mask: &'a TripletMask) -> Self {
        self.triplet_mask = Some(mask);
        self
    }

    pub fn with_self_negative_mask(mut self, mask: &'a [bool]) -> Self {
        self.self_negative_mask = Some(mask);
        self
    }

    pub fn with_mask_builder(mut self, builder: &'a dyn NegativeMaskBuilder) -> Self {
        self.mask_builder = Some(builder);
        self
    }
}

/// Result of [`LogitAssembler::compute_logits`].
#[derive(Debug, Clone)]
pub struct LogitOutput {
    /// [B, B + cache_cols + self_neg_col]
    pub logits: Tensor,
    /// [B] u32, `labels[i] = i`
    pub labels: Tensor,
    /// Scalar `exp(log_inv_t)`, detached.
    pub inv_t: Tensor,
    /// Detached.
    pub hr_vector: Tensor,
    /// Detached.
    pub tail_vector: Tensor,
}

/// Owns the temperature and the negative cache.
pub struct LogitAssembler {
    temperature: Temperature,
    additive_margin: f64,
    use_self_negative: bool,
    cache: Option<NegativeCache>,
}

impl LogitAssembler {
    /// The cache is created only when `config.pre_batch > 0`.
    pub fn new(config: &ModelConfig, hidden_size: usize, device: &Device) -> EmbeddingResult<Self> {
        let temperature = Temperature::new(config.t, config.finetune_t, device)?;
        let cache = if config.uses_cache() {
            Some(NegativeCache::new(
                config.batch_size,
                config.pre_batch,
                hidden_size,
                config.pre_batch_weight,
                device,
            )?)
        } else {
            None
        };
        Ok(Self {
            temperature,
            additive_margin: config.additive_margin,
            use_self_negative: config.use_self_negative,
            cache,
        })
    }

    pub fn temperature(&self) -> &Temperature {
        &self.temperature
    }

    pub fn cache(&self) -> Option<&NegativeCache> {
        self.cache.as_ref()
    }

    /// Assemble logits for one batch.
    ///
    /// `head` is only read when training with self-negatives.
    ///
    /// # Errors
    /// - `DimensionMismatch` if `hr` and `tail` shapes differ or a mask has the wrong size
    /// - `MissingInput` if self-negatives are enabled and `head` or the self-negative mask is absent
    /// - anything [`NegativeCache::compute_and_refresh`] returns
    pub fn compute_logits(
        &mut self,
        hr: &Tensor,
        tail: &Tensor,
        head: Option<&Tensor>,
        ctx: &BatchContext<'_>,
        training: bool,
    ) -> EmbeddingResult<LogitOutput> {
        let (batch, hidden) = hr.dims2().map_err(map_candle)?;
        if tail.dims() != hr.dims() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: batch * hidden,
                got: tail.elem_count(),
            });
        }
        let device = hr.device();
        let labels = Tensor::arange(0u32, batch as u32, device).map_err(map_candle)?;

        let mut logits = hr
            .matmul(&tail.t().map_err(map_candle)?)
            .map_err(map_candle)?;
        if training && self.additive_margin != 0.0 {
            let margin = Tensor::eye(batch, logits.dtype(), device)
                .and_then(|t| t.affine(self.additive_margin, 0.0))
                .map_err(map_candle)?;
            logits = (logits - margin).map_err(map_candle)?;
        }

        let inv_t = self
            .temperature
            .inv_t()?
            .to_dtype(logits.dtype())
            .map_err(map_candle)?;
        logits = logits.broadcast_mul(&inv_t).map_err(map_candle)?;

        if let Some(mask) = ctx.triplet_mask {
            if mask.rows() != batch || mask.cols() != batch {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: batch * batch,
                    got: mask.rows() * mask.cols(),
                });
            }
            logits = apply_mask(&logits, &mask_to_tensor(mask, device)?)?;
        }

        // Validated before the cache is written; a rejected call must not advance it.
        let self_negative = if training && self.use_self_negative {
            let head = head.ok_or(EmbeddingError::MissingInput { field: "head_vector" })?;
            let keep = ctx.self_negative_mask.ok_or(EmbeddingError::MissingInput {
                field: "self_negative_mask",
            })?;
            if keep.len() != batch {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: batch,
                    got: keep.len(),
                });
            }
            if head.dims() != hr.dims() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: batch * hidden,
                    got: head.elem_count(),
                });
            }
            Some((head, keep))
        } else {
            None
        };

        if training {
            if let Some(cache) = self.cache.as_mut() {
                let cached = cache.compute_and_refresh(hr, tail, ctx.examples, &inv_t, ctx.mask_builder)?;
                logits = Tensor::cat(&[&logits, &cached], 1).map_err(map_candle)?;
            }
        }

        if let Some((head, keep)) = self_negative {
            let self_neg = (hr * head)
                .and_then(|t| t.sum_keepdim(1))
                .and_then(|t| t.broadcast_mul(&inv_t))
                .map_err(map_candle)?;
            let keep = bools_to_tensor(keep, (batch, 1), device)?;
            let self_neg = apply_mask(&self_neg, &keep)?;
            logits = Tensor::cat(&[&logits, &self_neg], 1).map_err(map_candle)?;
        }

        Ok(LogitOutput {
            logits,
            labels,
            inv_t: inv_t.detach(),
            hr_vector: hr.detach(),
            tail_vector: tail.detach(),
        })
    }
}

/// `[rows, cols]` u8 tensor, 1 = keep.
pub fn mask_to_tensor(mask: &TripletMask, device: &Device) -> EmbeddingResult<Tensor> {
    bools_to_tensor(mask.as_slice(), (mask.rows(), mask.cols()), device)
}

fn bools_to_tensor(values: &[bool], shape: (usize, usize), device: &Device) -> EmbeddingResult<Tensor> {
    let data: Vec<u8> = values.iter().map(|&keep| u8::from(keep)).collect();
    Tensor::from_vec(data, shape, device).map_err(map_candle)
}

/// Replace positions where `keep == 0` with [`MASK_FILL_VALUE`].
pub fn apply_mask(logits: &Tensor, keep: &Tensor) -> EmbeddingResult<Tensor> {
    let fill = Tensor::full(MASK_FILL_VALUE, logits.shape(), logits.device())
        .and_then(|t| t.to_dtype(logits.dtype()))
        .map_err(map_candle)?;
    keep.to_dtype(DType::U8)
        .and_then(|k| k.where_cond(logits, &fill))
        .map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Logit assembly error: {}", e),
    }
}
