//! Deformable self-attention over a token sequence.
//!
//! For every query position each head predicts `num_points` sampling
//! locations and `num_points` attention logits. The input sequence is read
//! as a lattice of `N` rows by one column: coordinate 0 of a location is a
//! row (sequence position), coordinate 1 a column. Sampled features are
//! weighted by the softmaxed logits, summed over points, summed over heads
//! and projected back to `embed_dim`.
//!
//! ```text
//! x [B, N, C] ──offset_fc──▶ loc  [B, N, H, P, 2]
//!             ──attention_fc▶ w   [B, N, H, P] ──softmax(P)
//! sample(x, loc) [B, N, H, P, C] · w ──Σ P, Σ H──▶ [B, N, C] ──output_fc──▶
//! ```
//!
//! Sampling is a single batched `index_select` per lattice corner. Every
//! coordinate is clamped into the lattice (border padding), so a rank-2
//! input, a sequence of length one, always reads row 0.

use candle_core::{DType, Device, Tensor, Var, D};

use crate::config::SamplingMode;
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::layers::TrainableLinear;

/// Lattice width. The sequence is laid out as one column.
const LATTICE_COLS: usize = 1;

pub struct DeformableSelfAttention {
    offset_fc: TrainableLinear,
    attention_fc: TrainableLinear,
    output_fc: TrainableLinear,
    embed_dim: usize,
    num_heads: usize,
    num_points: usize,
    sampling_mode: SamplingMode,
}

impl DeformableSelfAttention {
    /// # Errors
    /// - `EmbeddingError::ConfigError` if `num_heads` or `num_points` is 0
    /// - `EmbeddingError::InvalidDimension` if `embed_dim` is 0
    pub fn new(
        embed_dim: usize,
        num_heads: usize,
        num_points: usize,
        sampling_mode: SamplingMode,
        device: &Device,
    ) -> EmbeddingResult<Self> {
        if num_heads == 0 || num_points == 0 {
            return Err(EmbeddingError::ConfigError {
                message: format!(
                    "deformable attention needs num_heads > 0 and num_points > 0, got {} and {}",
                    num_heads, num_points
                ),
            });
        }
        let offset_fc = TrainableLinear::new(embed_dim, num_heads * num_points * 2, device)?;
        let attention_fc = TrainableLinear::new(embed_dim, num_heads * num_points, device)?;
        let output_fc = TrainableLinear::new(embed_dim, embed_dim, device)?;

        Ok(Self {
            offset_fc,
            attention_fc,
            output_fc,
            embed_dim,
            num_heads,
            num_points,
            sampling_mode,
        })
    }

    /// `[B, C]` → `[B, C]`, or `[B, N, C]` → `[B, N, C]`.
    pub fn forward(&self, x: &Tensor) -> EmbeddingResult<Tensor> {
        let squeeze_output = match x.rank() {
            2 => true,
            3 => false,
            rank => {
                return Err(EmbeddingError::InvalidDimension {
                    expected: 3,
                    actual: rank,
                })
            }
        };
        let width = x.dim(D::Minus1).map_err(map_candle)?;
        if width != self.embed_dim {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.embed_dim,
                actual: width,
            });
        }

        let x = if squeeze_output {
            x.unsqueeze(1).map_err(map_candle)?
        } else {
            x.clone()
        };
        let (batch, seq_len, _) = x.dims3().map_err(map_candle)?;
        let (heads, points) = (self.num_heads, self.num_points);

        let locations = self
            .offset_fc
            .forward(&x)?
            .reshape((batch, seq_len, heads, points, 2))
            .map_err(map_candle)?;
        let logits = self
            .attention_fc
            .forward(&x)?
            .reshape((batch, seq_len, heads, points))
            .map_err(map_candle)?;
        let weights = candle_nn::ops::softmax(&logits, D::Minus1).map_err(map_candle)?;

        let sampled = self.sample(&x, &locations, &weights)?;
        let output = self.output_fc.forward(&sampled)?;

        if squeeze_output {
            output.squeeze(1).map_err(map_candle)
        } else {
            Ok(output)
        }
    }

    /// Weighted lattice reads, summed over points and heads: `[B, N, C]`.
    fn sample(&self, x: &Tensor, locations: &Tensor, weights: &Tensor) -> EmbeddingResult<Tensor> {
        let (batch, rows, channels) = x.dims3().map_err(map_candle)?;
        let device = x.device();

        let row = clamp_coordinate(locations, 0, rows)?;
        let col = clamp_coordinate(locations, 1, LATTICE_COLS)?;

        // First flattened row of each batch item, broadcast over [B, N, H, P].
        let batch_base = Tensor::arange(0u32, batch as u32, device)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.affine((rows * LATTICE_COLS) as f64, 0.0))
            .and_then(|t| t.reshape((batch, 1, 1, 1)))
            .map_err(map_candle)?;
        let x_flat = x.reshape((batch * rows, channels)).map_err(map_candle)?;

        let row0 = row.detach().floor().map_err(map_candle)?;
        let col0 = col.detach().floor().map_err(map_candle)?;

        let corners: Vec<(Tensor, Tensor, Tensor)> = match self.sampling_mode {
            SamplingMode::Floor => {
                let ones = row0.ones_like().map_err(map_candle)?;
                vec![(row0, col0, ones)]
            }
            SamplingMode::Bilinear => {
                let row1 = upper_neighbor(&row0, rows)?;
                let col1 = upper_neighbor(&col0, LATTICE_COLS)?;
                let fr = (&row - &row0).map_err(map_candle)?;
                let fc = (&col - &col0).map_err(map_candle)?;
                let gr = one_minus(&fr)?;
                let gc = one_minus(&fc)?;
                vec![
                    (row0.clone(), col0.clone(), (&gr * &gc).map_err(map_candle)?),
                    (row0, col1.clone(), (&gr * &fc).map_err(map_candle)?),
                    (row1.clone(), col0, (&fr * &gc).map_err(map_candle)?),
                    (row1, col1, (&fr * &fc).map_err(map_candle)?),
                ]
            }
        };

        let (h, p) = (self.num_heads, self.num_points);
        let mut accumulated: Option<Tensor> = None;
        for (r, c, corner_weight) in corners {
            // Flat row indices are formed in f32 whatever the activation dtype.
            let index = r
                .to_dtype(DType::F32)
                .and_then(|t| t.affine(LATTICE_COLS as f64, 0.0))
                .and_then(|t| t + c.to_dtype(DType::F32)?)
                .and_then(|t| t.broadcast_add(&batch_base))
                .and_then(|t| t.flatten_all())
                .and_then(|t| t.to_dtype(DType::U32))
                .map_err(map_candle)?;
            let features = x_flat
                .index_select(&index, 0)
                .and_then(|t| t.reshape((batch, rows, h, p, channels)))
                .map_err(map_candle)?;
            let scale = (corner_weight * weights)
                .and_then(|t| t.unsqueeze(D::Minus1))
                .map_err(map_candle)?;
            let weighted = features.broadcast_mul(&scale).map_err(map_candle)?;
            accumulated = Some(match accumulated {
                Some(acc) => (acc + weighted).map_err(map_candle)?,
                None => weighted,
            });
        }

        let accumulated = accumulated.ok_or(EmbeddingError::EmptyInput)?;
        // Σ points, then Σ heads.
        accumulated
            .sum(3)
            .and_then(|t| t.sum(2))
            .map_err(map_candle)
    }

    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn sampling_mode(&self) -> SamplingMode {
        self.sampling_mode
    }

    pub fn trainable_vars(&self) -> Vec<&Var> {
        let mut vars = self.offset_fc.trainable_vars();
        vars.extend(self.attention_fc.trainable_vars());
        vars.extend(self.output_fc.trainable_vars());
        vars
    }

    pub fn num_params(&self) -> usize {
        self.offset_fc.num_params() + self.attention_fc.num_params() + self.output_fc.num_params()
    }
}

/// Coordinate `axis` of `locations` `[.., 2]`, clamped into `[0, extent - 1]`.
fn clamp_coordinate(locations: &Tensor, axis: usize, extent: usize) -> EmbeddingResult<Tensor> {
    let max = extent.saturating_sub(1) as f64;
    locations
        .narrow(D::Minus1, axis, 1)
        .and_then(|t| t.squeeze(D::Minus1))
        .and_then(|t| t.clamp(0.0f64, max))
        .map_err(map_candle)
}

fn upper_neighbor(lower: &Tensor, extent: usize) -> EmbeddingResult<Tensor> {
    let max = extent.saturating_sub(1) as f64;
    lower
        .affine(1.0, 1.0)
        .and_then(|t| t.minimum(max))
        .map_err(map_candle)
}

fn one_minus(t: &Tensor) -> EmbeddingResult<Tensor> {
    t.affine(-1.0, 1.0).map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Deformable attention error: {}", e),
    }
}
