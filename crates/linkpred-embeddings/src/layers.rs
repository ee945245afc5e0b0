//! Trainable building blocks shared by the encoder, attention and fusion
//! modules, plus the element-wise ops they need.
//!
//! Weights are `candle_core::Var`s so the host optimizer can collect them
//! with `trainable_vars()`. All ops are composed from differentiable
//! primitives so gradients reach every parameter.

use candle_core::{DType, Device, Tensor, Var, D};

use crate::error::{EmbeddingError, EmbeddingResult};

/// Epsilon for L2 normalization, applied as a floor on the norm.
pub const L2_EPS: f64 = 1e-12;

/// Epsilon for layer normalization.
pub const LAYER_NORM_EPS: f64 = 1e-12;

/// Fully connected layer `y = x Wᵀ + b`.
///
/// Accepts `[.., in_features]` input of any rank ≥ 1.
#[derive(Debug)]
pub struct TrainableLinear {
    /// Weight matrix: [out_features, in_features]
    weight: Var,
    /// Bias vector: [out_features]
    bias: Var,
    in_features: usize,
    out_features: usize,
}

impl TrainableLinear {
    /// Create a layer with Xavier-scaled normal weights and zero bias.
    ///
    /// # Errors
    /// - `EmbeddingError::InvalidDimension` if either dimension is 0
    pub fn new(in_features: usize, out_features: usize, device: &Device) -> EmbeddingResult<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(EmbeddingError::InvalidDimension {
                expected: 1,
                actual: 0,
            });
        }

        let limit = (6.0 / (in_features + out_features) as f64).sqrt();
        let weight = Tensor::randn(
            0.0f32,
            (limit * 0.5) as f32,
            (out_features, in_features),
            device,
        )
        .map_err(map_candle)?;
        let bias = Tensor::zeros(out_features, DType::F32, device).map_err(map_candle)?;

        Self::from_tensors(weight, bias)
    }

    /// Wrap existing weights. `weight` must be `[out, in]` and `bias` `[out]`.
    pub fn from_tensors(weight: Tensor, bias: Tensor) -> EmbeddingResult<Self> {
        let (out_features, in_features) = weight.dims2().map_err(map_candle)?;
        let bias_len = bias.dims1().map_err(map_candle)?;
        if bias_len != out_features {
            return Err(EmbeddingError::DimensionMismatch {
                expected: out_features,
                got: bias_len,
            });
        }
        Ok(Self {
            weight: Var::from_tensor(&weight).map_err(map_candle)?,
            bias: Var::from_tensor(&bias).map_err(map_candle)?,
            in_features,
            out_features,
        })
    }

    pub fn forward(&self, x: &Tensor) -> EmbeddingResult<Tensor> {
        let width = x.dim(D::Minus1).map_err(map_candle)?;
        if width != self.in_features {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.in_features,
                actual: width,
            });
        }
        let wt = self.weight.as_tensor().t().map_err(map_candle)?;
        x.broadcast_matmul(&wt)
            .map_err(map_candle)?
            .broadcast_add(self.bias.as_tensor())
            .map_err(map_candle)
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor {
        self.weight.as_tensor()
    }

    pub fn bias(&self) -> &Tensor {
        self.bias.as_tensor()
    }

    /// Get trainable variables for optimizer registration.
    pub fn trainable_vars(&self) -> Vec<&Var> {
        vec![&self.weight, &self.bias]
    }

    pub fn num_params(&self) -> usize {
        self.out_features * self.in_features + self.out_features
    }
}

/// Logistic sigmoid built from differentiable primitives.
pub fn sigmoid(x: &Tensor) -> EmbeddingResult<Tensor> {
    x.neg()
        .and_then(|t| t.exp())
        .and_then(|t| t.affine(1.0, 1.0))
        .and_then(|t| t.recip())
        .map_err(map_candle)
}

/// Divide each row by its L2 norm along the last dimension.
pub fn l2_normalize(x: &Tensor) -> EmbeddingResult<Tensor> {
    let norm = x
        .sqr()
        .and_then(|t| t.sum_keepdim(D::Minus1))
        .and_then(|t| t.sqrt())
        .and_then(|t| t.maximum(L2_EPS))
        .map_err(map_candle)?;
    x.broadcast_div(&norm).map_err(map_candle)
}

/// Layer normalization over the last dimension with affine parameters.
pub fn layer_norm(x: &Tensor, gamma: &Tensor, beta: &Tensor, eps: f64) -> EmbeddingResult<Tensor> {
    let mean = x.mean_keepdim(D::Minus1).map_err(map_candle)?;
    let centered = x.broadcast_sub(&mean).map_err(map_candle)?;
    let var = centered
        .sqr()
        .and_then(|t| t.mean_keepdim(D::Minus1))
        .map_err(map_candle)?;
    let std = var
        .affine(1.0, eps)
        .and_then(|t| t.sqrt())
        .map_err(map_candle)?;
    centered
        .broadcast_div(&std)
        .and_then(|t| t.broadcast_mul(gamma))
        .and_then(|t| t.broadcast_add(beta))
        .map_err(map_candle)
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Layer error: {}", e),
    }
}
