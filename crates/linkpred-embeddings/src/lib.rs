//! Bi-encoder embeddings for knowledge-graph link prediction.
//!
//! Head-relation text and entity text are encoded by two text encoders
//! that start from the same weights. Each pooled encoding is refined by
//! deformable self-attention and fused with itself through a learned gate.
//! Training scores queries against in-batch tails, a rolling cache of
//! earlier tails and optionally the query's own head, all under a learnable
//! temperature. At inference, scores can be reranked by graph proximity to
//! the query head.
//!
//! # Architecture
//!
//! - **config**: `ModelConfig`, pooling / sampling / task enums
//! - **encoder**: `TextEncoder` seam, `LookupEncoder`, `TokenBatch`, pooling
//! - **layers**: `TrainableLinear`, sigmoid, L2 and layer normalization
//! - **attention**: `DeformableSelfAttention`
//! - **fusion**: `AdaptiveFusion`
//! - **pipeline**: `DualEncoder` (encoder → pool → attention → fusion)
//! - **model**: `LinkPredictionModel`, forward / entity-only / logits
//! - **logits**: `LogitAssembler`, `NegativeCache`, `Temperature`
//! - **loss**: bidirectional InfoNCE, top-k accuracy
//! - **rerank**: `Reranker`
//! - **evaluation**: filtered MR / MRR / Hits@k
//!
//! # Example
//!
//! ```
//! use candle_core::Device;
//! use linkpred_embeddings::{
//!     BatchContext, LinkPredictionModel, LookupEncoder, LookupEncoderConfig, ModelConfig,
//!     TokenBatch,
//! };
//! use linkpred_graph::Example;
//!
//! let device = Device::Cpu;
//! let encoder = LookupEncoder::new(
//!     LookupEncoderConfig { vocab_size: 32, type_vocab_size: 2, max_position: 8, hidden_size: 4 },
//!     &device,
//! )?;
//! let config = ModelConfig { batch_size: 2, head_num: 2, deformable_points: 2, ..Default::default() };
//! let mut model = LinkPredictionModel::new(config, Box::new(encoder), &device)?;
//!
//! let hr = TokenBatch::from_sequences(&[vec![1, 2], vec![3, 4]], &device)?;
//! let tail = TokenBatch::from_sequences(&[vec![5], vec![6]], &device)?;
//! let examples = vec![Example::new("a", "r", "b"), Example::new("c", "r", "d")];
//!
//! let output = model.forward(&hr, &tail, None)?;
//! let logits = model.compute_logits(&output, &BatchContext::new(&examples))?;
//! assert_eq!(logits.logits.dims(), &[2, 2]);
//! # Ok::<(), linkpred_embeddings::EmbeddingError>(())
//! ```

pub mod attention;
pub mod config;
pub mod encoder;
pub mod error;
pub mod evaluation;
pub mod fusion;
pub mod layers;
pub mod logits;
pub mod loss;
pub mod model;
pub mod pipeline;
pub mod rerank;

pub use attention::DeformableSelfAttention;
pub use config::{ModelConfig, PoolingStrategy, RerankPolicy, SamplingMode, Task};
pub use encoder::{pool_hidden_states, LookupEncoder, LookupEncoderConfig, TextEncoder, TokenBatch};
pub use error::{EmbeddingError, EmbeddingResult};
pub use evaluation::{compute_ranking_metrics, compute_ranks, RankingMetrics};
pub use fusion::AdaptiveFusion;
pub use layers::TrainableLinear;
pub use logits::{
    BatchContext, LogitAssembler, LogitOutput, NegativeCache, Temperature, MASK_FILL_VALUE,
};
pub use loss::{topk_accuracy, ContrastiveLoss, LossComponents};
pub use model::{
    EncoderRequest, EncoderResponse, EntityEmbeddings, ForwardOutput, LinkPredictionModel,
};
pub use pipeline::{DualEncoder, EncoderSide};
pub use rerank::Reranker;
