use candle_core::{Device, Tensor, Var};

use crate::error::{EmbeddingError, EmbeddingResult};

/// Log inverse temperature, `log(1 / t)`.
///
/// Stored as a rank-0 f32 tensor. When learnable it is a `Var` and shows up
/// in the model's trainable variables.
pub enum Temperature {
    Learnable(Var),
    Fixed(Tensor),
}

impl Temperature {
    pub fn new(t: f64, learnable: bool, device: &Device) -> EmbeddingResult<Self> {
        if t <= 0.0 || !t.is_finite() {
            return Err(EmbeddingError::ConfigError {
                message: format!("temperature must be a positive finite number, got {}", t),
            });
        }
        let log_inv_t = Tensor::new((1.0 / t).ln() as f32, device).map_err(map_candle)?;
        if learnable {
            Ok(Self::Learnable(Var::from_tensor(&log_inv_t).map_err(map_candle)?))
        } else {
            Ok(Self::Fixed(log_inv_t))
        }
    }

    pub fn log_inv_t(&self) -> &Tensor {
        match self {
            Self::Learnable(var) => var.as_tensor(),
            Self::Fixed(tensor) => tensor,
        }
    }

    /// `exp(log_inv_t)`, part of the autograd graph when learnable.
    pub fn inv_t(&self) -> EmbeddingResult<Tensor> {
        self.log_inv_t().exp().map_err(map_candle)
    }

    /// Current `exp(log_inv_t)` as a number.
    pub fn value(&self) -> EmbeddingResult<f64> {
        let v: f32 = self.inv_t()?.to_scalar().map_err(map_candle)?;
        Ok(v as f64)
    }

    pub fn var(&self) -> Option<&Var> {
        match self {
            Self::Learnable(var) => Some(var),
            Self::Fixed(_) => None,
        }
    }
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Temperature error: {}", e),
    }
}
