//! Model configuration.
//!
//! Loaded from TOML, optionally overridden from the environment with the
//! `LINKPRED_` prefix, and validated before any tensor is allocated.
//!
//! ```toml
//! t = 0.05
//! finetune_t = true
//! batch_size = 256
//! pre_batch = 2
//! additive_margin = 0.02
//! use_self_negative = true
//! pooling = "mean"
//! sampling_mode = "bilinear"
//! task = "fb15k237"
//! neighbor_weight = 0.05
//! ```

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, EmbeddingResult};

/// Neighbor weights below this value disable graph reranking.
pub const NEGLIGIBLE_NEIGHBOR_WEIGHT: f64 = 1e-6;

// ============================================================================
// ENUMS
// ============================================================================

/// How per-token hidden states are reduced to one vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingStrategy {
    /// First token.
    #[default]
    Cls,
    /// Element-wise max over unmasked tokens.
    Max,
    /// Mean over unmasked tokens.
    Mean,
}

impl PoolingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cls => "cls",
            Self::Max => "max",
            Self::Mean => "mean",
        }
    }
}

impl FromStr for PoolingStrategy {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cls" => Ok(Self::Cls),
            "max" => Ok(Self::Max),
            "mean" => Ok(Self::Mean),
            other => Err(EmbeddingError::ConfigError {
                message: format!("Unknown pooling mode: '{}'. Valid: cls, max, mean", other),
            }),
        }
    }
}

impl fmt::Display for PoolingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature read at a fractional sampling location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    /// Interpolate the four surrounding lattice points. Offsets receive gradients.
    #[default]
    Bilinear,
    /// Read the lattice point at the rounded-down coordinate. Offsets receive no gradient.
    Floor,
}

impl FromStr for SamplingMode {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bilinear" => Ok(Self::Bilinear),
            "floor" => Ok(Self::Floor),
            other => Err(EmbeddingError::ConfigError {
                message: format!("Unknown sampling mode: '{}'. Valid: bilinear, floor", other),
            }),
        }
    }
}

/// Benchmark the model is trained and evaluated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    #[default]
    Wn18rr,
    Fb15k237,
    #[serde(rename = "wiki5m_trans")]
    Wiki5mTrans,
    #[serde(rename = "wiki5m_ind")]
    Wiki5mInd,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wn18rr => "wn18rr",
            Self::Fb15k237 => "fb15k237",
            Self::Wiki5mTrans => "wiki5m_trans",
            Self::Wiki5mInd => "wiki5m_ind",
        }
    }

    /// Inductive tasks evaluate on entities unseen in training, so the
    /// training link graph says nothing about them.
    pub fn is_inductive(&self) -> bool {
        matches!(self, Self::Wiki5mInd)
    }

    /// Score adjustment applied by the graph reranker for this task.
    pub fn rerank_policy(&self) -> RerankPolicy {
        match self {
            Self::Fb15k237 => RerankPolicy::HopBonusWithPenalty,
            Self::Wn18rr | Self::Wiki5mTrans | Self::Wiki5mInd => RerankPolicy::HopBonus,
        }
    }
}

impl FromStr for Task {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "wn18rr" => Ok(Self::Wn18rr),
            "fb15k237" => Ok(Self::Fb15k237),
            "wiki5m_trans" => Ok(Self::Wiki5mTrans),
            "wiki5m_ind" => Ok(Self::Wiki5mInd),
            other => Err(EmbeddingError::ConfigError {
                message: format!(
                    "Unknown task: '{}'. Valid: wn18rr, fb15k237, wiki5m_trans, wiki5m_ind",
                    other
                ),
            }),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Graph-proximity score adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerankPolicy {
    /// Bonus for every entity within 1, 2 and 3 hops of the head.
    HopBonus,
    /// Hop bonus plus a penalty on direct neighbors other than the head itself.
    HopBonusWithPenalty,
}

// ============================================================================
// MODEL CONFIG
// ============================================================================

fn default_t() -> f64 {
    0.05
}

fn default_finetune_t() -> bool {
    true
}

fn default_batch_size() -> usize {
    1024
}

fn default_pre_batch_weight() -> f64 {
    0.5
}

fn default_additive_margin() -> f64 {
    0.02
}

fn default_head_num() -> usize {
    8
}

fn default_deformable_points() -> usize {
    4
}

/// Configuration for the bi-encoder, its logits and the reranker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Initial softmax temperature. Logits are scaled by `1 / t`.
    #[serde(default = "default_t")]
    pub t: f64,

    /// Learn the temperature.
    #[serde(default = "default_finetune_t")]
    pub finetune_t: bool,

    /// Training batch size. Sizes the cross-batch negative cache.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of previous batches kept as negatives. 0 disables the cache.
    #[serde(default)]
    pub pre_batch: usize,

    /// Down-weighting of cached negative logits.
    #[serde(default = "default_pre_batch_weight")]
    pub pre_batch_weight: f64,

    /// Margin subtracted from positive logits while training.
    #[serde(default = "default_additive_margin", alias = "p_weight")]
    pub additive_margin: f64,

    /// Append the head entity as an extra negative column while training.
    #[serde(default)]
    pub use_self_negative: bool,

    /// Deformable attention heads.
    #[serde(default = "default_head_num")]
    pub head_num: usize,

    /// Sampling points per head.
    #[serde(default = "default_deformable_points")]
    pub deformable_points: usize,

    #[serde(default)]
    pub sampling_mode: SamplingMode,

    #[serde(default)]
    pub pooling: PoolingStrategy,

    /// Graph rerank gate. Below 1e-6 reranking is skipped.
    #[serde(default)]
    pub neighbor_weight: f64,

    #[serde(default)]
    pub task: Task,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            t: default_t(),
            finetune_t: default_finetune_t(),
            batch_size: default_batch_size(),
            pre_batch: 0,
            pre_batch_weight: default_pre_batch_weight(),
            additive_margin: default_additive_margin(),
            use_self_negative: false,
            head_num: default_head_num(),
            deformable_points: default_deformable_points(),
            sampling_mode: SamplingMode::default(),
            pooling: PoolingStrategy::default(),
            neighbor_weight: 0.0,
            task: Task::default(),
        }
    }
}

impl ModelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// - `EmbeddingError::IoError` if the file cannot be read
    /// - `EmbeddingError::ConfigError` if TOML parsing fails
    pub fn from_file(path: impl AsRef<Path>) -> EmbeddingResult<Self> {
        let path = path.as_ref();

        let contents = std::fs::read_to_string(path)?;

        toml::from_str(&contents).map_err(|e| EmbeddingError::ConfigError {
            message: format!("Failed to parse TOML in '{}': {}", path.display(), e),
        })
    }

    /// Create configuration from TOML string.
    pub fn from_toml_str(toml: &str) -> EmbeddingResult<Self> {
        toml::from_str(toml).map_err(|e| EmbeddingError::ConfigError {
            message: format!("Failed to parse TOML: {}", e),
        })
    }

    pub fn to_toml_string(&self) -> EmbeddingResult<String> {
        toml::to_string_pretty(self).map_err(|e| EmbeddingError::ConfigError {
            message: format!("Failed to serialize to TOML: {}", e),
        })
    }

    /// Validate all configuration values, returning the first error found.
    pub fn validate(&self) -> EmbeddingResult<()> {
        if self.t <= 0.0 || !self.t.is_finite() {
            return Err(EmbeddingError::ConfigError {
                message: format!("t must be a positive finite number, got {}", self.t),
            });
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "batch_size must be > 0".to_string(),
            });
        }
        if self.head_num == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "head_num must be > 0".to_string(),
            });
        }
        if self.deformable_points == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "deformable_points must be > 0".to_string(),
            });
        }
        if self.pre_batch_weight < 0.0 || self.pre_batch_weight.is_nan() {
            return Err(EmbeddingError::ConfigError {
                message: format!("pre_batch_weight must be >= 0, got {}", self.pre_batch_weight),
            });
        }
        if self.neighbor_weight < 0.0 || self.neighbor_weight.is_nan() {
            return Err(EmbeddingError::ConfigError {
                message: format!("neighbor_weight must be >= 0, got {}", self.neighbor_weight),
            });
        }
        if self.additive_margin.is_nan() {
            return Err(EmbeddingError::ConfigError {
                message: "additive_margin must not be NaN".to_string(),
            });
        }
        if self.task.is_inductive() && self.neighbor_weight >= NEGLIGIBLE_NEIGHBOR_WEIGHT {
            return Err(EmbeddingError::InductiveRerank {
                task: self.task.to_string(),
                neighbor_weight: self.neighbor_weight,
            });
        }
        if self.pre_batch > 0 && self.pre_batch_weight == 0.0 {
            tracing::warn!(
                pre_batch = self.pre_batch,
                "pre_batch_weight is 0: cached negatives contribute constant logits"
            );
        }
        Ok(())
    }

    /// Apply environment variable overrides. Prefix: `LINKPRED_`
    ///
    /// | Variable | Field | Type |
    /// |----------|-------|------|
    /// | `LINKPRED_T` | `t` | f64 |
    /// | `LINKPRED_FINETUNE_T` | `finetune_t` | bool |
    /// | `LINKPRED_BATCH_SIZE` | `batch_size` | usize |
    /// | `LINKPRED_PRE_BATCH` | `pre_batch` | usize |
    /// | `LINKPRED_PRE_BATCH_WEIGHT` | `pre_batch_weight` | f64 |
    /// | `LINKPRED_ADDITIVE_MARGIN` | `additive_margin` | f64 |
    /// | `LINKPRED_USE_SELF_NEGATIVE` | `use_self_negative` | bool |
    /// | `LINKPRED_HEAD_NUM` | `head_num` | usize |
    /// | `LINKPRED_DEFORMABLE_POINTS` | `deformable_points` | usize |
    /// | `LINKPRED_SAMPLING_MODE` | `sampling_mode` | bilinear/floor |
    /// | `LINKPRED_POOLING` | `pooling` | cls/max/mean |
    /// | `LINKPRED_NEIGHBOR_WEIGHT` | `neighbor_weight` | f64 |
    /// | `LINKPRED_TASK` | `task` | task name |
    ///
    /// Unparsable numbers and booleans are ignored.
    ///
    /// # Errors
    /// - `EmbeddingError::ConfigError` if a pooling, sampling mode or task name is unknown
    pub fn with_env_overrides(mut self) -> EmbeddingResult<Self> {
        if let Some(v) = env_parse::<f64>("LINKPRED_T") {
            self.t = v;
        }
        if let Some(v) = env_parse::<bool>("LINKPRED_FINETUNE_T") {
            self.finetune_t = v;
        }
        if let Some(v) = env_parse::<usize>("LINKPRED_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse::<usize>("LINKPRED_PRE_BATCH") {
            self.pre_batch = v;
        }
        if let Some(v) = env_parse::<f64>("LINKPRED_PRE_BATCH_WEIGHT") {
            self.pre_batch_weight = v;
        }
        if let Some(v) = env_parse::<f64>("LINKPRED_ADDITIVE_MARGIN") {
            self.additive_margin = v;
        }
        if let Some(v) = env_parse::<bool>("LINKPRED_USE_SELF_NEGATIVE") {
            self.use_self_negative = v;
        }
        if let Some(v) = env_parse::<usize>("LINKPRED_HEAD_NUM") {
            self.head_num = v;
        }
        if let Some(v) = env_parse::<usize>("LINKPRED_DEFORMABLE_POINTS") {
            self.deformable_points = v;
        }
        if let Some(v) = env_named::<SamplingMode>("LINKPRED_SAMPLING_MODE")? {
            self.sampling_mode = v;
        }
        if let Some(v) = env_named::<PoolingStrategy>("LINKPRED_POOLING")? {
            self.pooling = v;
        }
        if let Some(v) = env_parse::<f64>("LINKPRED_NEIGHBOR_WEIGHT") {
            self.neighbor_weight = v;
        }
        if let Some(v) = env_named::<Task>("LINKPRED_TASK")? {
            self.task = v;
        }
        Ok(self)
    }

    /// Number of cached negative vectors: `max(1, pre_batch) * batch_size`.
    pub fn cache_capacity(&self) -> usize {
        self.pre_batch.max(1) * self.batch_size
    }

    /// Whether the cross-batch negative cache contributes logits.
    pub fn uses_cache(&self) -> bool {
        self.pre_batch > 0
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_named<T: FromStr<Err = EmbeddingError>>(key: &str) -> EmbeddingResult<Option<T>> {
    match env::var(key) {
        Ok(v) => v.parse().map(Some),
        Err(_) => Ok(None),
    }
}
