//! Adaptive fusion gate.
//!
//! `gate = σ(W [base ; attn] + b)`, `fused = gate ⊙ base + (1 - gate) ⊙ attn`.
//! Because the gate is in `[0, 1]` per dimension the fused vector lies
//! element-wise between its two inputs.

use candle_core::{Device, Tensor, Var, D};

use crate::error::{EmbeddingError, EmbeddingResult};
use crate::layers::{sigmoid, TrainableLinear};

pub struct AdaptiveFusion {
    /// [2 * dim] → [dim]
    gate: TrainableLinear,
    dim: usize,
}

impl AdaptiveFusion {
    pub fn new(dim: usize, device: &Device) -> EmbeddingResult<Self> {
        Ok(Self {
            gate: TrainableLinear::new(2 * dim, dim, device)?,
            dim,
        })
    }

    /// Per-dimension gate in `[0, 1]` for `base` and `attn`, both `[.., dim]`.
    pub fn gate(&self, base: &Tensor, attn: &Tensor) -> EmbeddingResult<Tensor> {
        if base.dims() != attn.dims() {
            let expected = base.elem_count();
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                got: attn.elem_count(),
            });
        }
        let width = base.dim(D::Minus1).map_err(map_candle)?;
        if width != self.dim {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.dim,
                actual: width,
            });
        }
        let combined = Tensor::cat(&[base, attn], D::Minus1).map_err(map_candle)?;
        sigmoid(&self.gate.forward(&combined)?)
    }

    pub fn forward(&self, base: &Tensor, attn: &Tensor) -> EmbeddingResult<Tensor> {
        let gate = self.gate(base, attn)?;
        let from_base = (&gate * base).map_err(map_candle)?;
        let from_attn = gate
            .affine(-1.0, 1.0)
            .and_then(|g| g * attn)
            .map_err(map_candle)?;
        (from_base + from_attn).map_err(map_candle)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn trainable_vars(&self) -> Vec<&Var> {
        self.gate.trainable_vars()
    }

    pub fn num_params(&self) -> usize {
        self.gate.num_params()
    }
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Fusion error: {}", e),
    }
}
