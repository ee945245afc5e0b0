//! Cross-batch negative cache.
//!
//! A ring buffer of the tail vectors (and their examples) seen in the last
//! `max(1, rounds)` training batches. Each training step scores the current
//! queries against every cached vector and then overwrites the oldest
//! `batch_size` slots with the current tails.
//!
//! # Single writer
//!
//! `compute_and_refresh` reads the whole buffer before writing, so the
//! negatives for step `k` come from steps `< k`. It takes `&mut self`; a host
//! that replicates the model across devices must keep one cache per process,
//! not one per replica.
//!
//! # Wraparound
//!
//! Capacity is `rounds * batch_size` and every write is exactly
//! `batch_size` rows starting at a multiple of `batch_size`, so a write
//! window never crosses the end of the buffer. Batches of any other size
//! are rejected with `BatchSizeMismatch`.

use candle_core::{DType, Device, Tensor};
use linkpred_graph::{Example, NegativeMaskBuilder};

use super::{apply_mask, mask_to_tensor};
use crate::error::{EmbeddingError, EmbeddingResult};
use crate::layers::l2_normalize;

pub struct NegativeCache {
    /// [capacity, hidden], never part of an autograd graph
    vectors: Tensor,
    examples: Vec<Option<Example>>,
    offset: usize,
    batch_size: usize,
    hidden_size: usize,
    weight: f64,
}

impl NegativeCache {
    /// Cache of `max(1, rounds) * batch_size` random unit vectors.
    ///
    /// `weight` down-scales the cached logits relative to in-batch ones.
    pub fn new(
        batch_size: usize,
        rounds: usize,
        hidden_size: usize,
        weight: f64,
        device: &Device,
    ) -> EmbeddingResult<Self> {
        if batch_size == 0 || hidden_size == 0 {
            return Err(EmbeddingError::ConfigError {
                message: format!(
                    "negative cache needs batch_size > 0 and hidden_size > 0, got {} and {}",
                    batch_size, hidden_size
                ),
            });
        }
        let capacity = rounds.max(1) * batch_size;
        let random = Tensor::randn(0.0f32, 1.0, (capacity, hidden_size), device).map_err(map_candle)?;
        let vectors = l2_normalize(&random)?;

        tracing::info!(
            capacity,
            batch_size,
            hidden_size,
            weight,
            "Created cross-batch negative cache"
        );

        Ok(Self {
            vectors,
            examples: vec![None; capacity],
            offset: 0,
            batch_size,
            hidden_size,
            weight,
        })
    }

    pub fn capacity(&self) -> usize {
        self.examples.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Next slot to be written.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Cached vectors `[capacity, hidden]`.
    pub fn vectors(&self) -> &Tensor {
        &self.vectors
    }

    pub fn examples(&self) -> &[Option<Example>] {
        &self.examples
    }

    /// Every slot has been written at least once.
    ///
    /// Writes start at slot 0 and move forward, so the last slot is the
    /// last to be populated.
    pub fn is_warm(&self) -> bool {
        matches!(self.examples.last(), Some(Some(_)))
    }

    /// Score `hr` against all cached vectors, then store `tail`.
    ///
    /// Returns `[batch_size, capacity]` logits scaled by `inv_t * weight`.
    /// Once warm, pairs that `mask_builder` marks as invalid negatives are
    /// set to the mask sentinel.
    ///
    /// # Errors
    /// - `BatchSizeMismatch` if `tail`, `hr` or `examples` do not hold exactly `batch_size` rows
    /// - `InvalidDimension` if `tail` width differs from the cache width
    /// - `MissingInput` if the cache is warm and no `mask_builder` is given
    pub fn compute_and_refresh(
        &mut self,
        hr: &Tensor,
        tail: &Tensor,
        examples: &[Example],
        inv_t: &Tensor,
        mask_builder: Option<&dyn NegativeMaskBuilder>,
    ) -> EmbeddingResult<Tensor> {
        let (tail_rows, tail_width) = tail.dims2().map_err(map_candle)?;
        let hr_rows = hr.dim(0).map_err(map_candle)?;
        for actual in [tail_rows, hr_rows, examples.len()] {
            if actual != self.batch_size {
                return Err(EmbeddingError::BatchSizeMismatch {
                    expected: self.batch_size,
                    actual,
                });
            }
        }
        if tail_width != self.hidden_size {
            return Err(EmbeddingError::InvalidDimension {
                expected: self.hidden_size,
                actual: tail_width,
            });
        }

        // Read before write: negatives come from earlier steps only.
        let cached = self.vectors.to_dtype(hr.dtype()).map_err(map_candle)?;
        let scale = inv_t
            .to_dtype(hr.dtype())
            .and_then(|t| t.affine(self.weight, 0.0))
            .map_err(map_candle)?;
        let mut logits = hr
            .matmul(&cached.t().map_err(map_candle)?)
            .and_then(|t| t.broadcast_mul(&scale))
            .map_err(map_candle)?;

        let warm = self.is_warm();
        if warm {
            let builder = mask_builder.ok_or(EmbeddingError::MissingInput {
                field: "negative mask builder",
            })?;
            let cached_examples: Vec<Example> = self.examples.iter().flatten().cloned().collect();
            let mask = builder.construct_mask(examples, &cached_examples);
            if mask.rows() != self.batch_size || mask.cols() != self.capacity() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.batch_size * self.capacity(),
                    got: mask.rows() * mask.cols(),
                });
            }
            let keep = mask_to_tensor(&mask, hr.device())?;
            logits = apply_mask(&logits, &keep)?;
        }

        self.write(tail, examples)?;

        tracing::debug!(
            offset = self.offset,
            capacity = self.capacity(),
            warm,
            "Refreshed negative cache"
        );

        Ok(logits)
    }

    /// Overwrite `[offset, offset + batch_size)` and advance the cursor.
    fn write(&mut self, tail: &Tensor, examples: &[Example]) -> EmbeddingResult<()> {
        let start = self.offset;
        let end = start + self.batch_size;
        let detached = tail
            .detach()
            .to_dtype(DType::F32)
            .map_err(map_candle)?;
        self.vectors = self
            .vectors
            .slice_assign(&[start..end, 0..self.hidden_size], &detached)
            .map_err(map_candle)?;
        for (slot, example) in self.examples[start..end].iter_mut().zip(examples) {
            *slot = Some(example.clone());
        }
        self.offset = end % self.capacity();
        Ok(())
    }
}

fn map_candle(e: candle_core::Error) -> EmbeddingError {
    EmbeddingError::TensorError {
        message: format!("Negative cache error: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkpred_graph::{TripletDict, TripletMasker};

    use crate::logits::MASK_FILL_VALUE;

    fn batch_examples(step: usize, batch_size: usize) -> Vec<Example> {
        (0..batch_size)
            .map(|i| Example::new(format!("h{}_{}", step, i), "r", format!("t{}_{}", step, i)))
            .collect()
    }

    /// Tail vectors whose first component identifies the step.
    fn step_tails(step: usize, batch_size: usize, hidden: usize, device: &Device) -> Tensor {
        let mut data = vec![0.0f32; batch_size * hidden];
        for row in 0..batch_size {
            data[row * hidden] = (step * 100 + row + 1) as f32;
        }
        Tensor::from_vec(data, (batch_size, hidden), device).unwrap()
    }

    fn one(device: &Device) -> Tensor {
        Tensor::new(1.0f32, device).unwrap()
    }

    #[test]
    fn test_capacity_and_cold_start() {
        let device = Device::Cpu;
        let cache = NegativeCache::new(4, 0, 8, 0.5, &device).unwrap();
        assert_eq!(cache.capacity(), 4);
        assert_eq!(cache.offset(), 0);
        assert!(!cache.is_warm());
        assert!(cache.examples().iter().all(Option::is_none));

        let norms: Vec<f32> = cache
            .vectors()
            .sqr()
            .unwrap()
            .sum(1)
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(norms.iter().all(|n| (n - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_full_cycle_fills_every_slot_once_and_cursor_returns() {
        let device = Device::Cpu;
        let (batch_size, rounds, hidden) = (2, 3, 4);
        let mut cache = NegativeCache::new(batch_size, rounds, hidden, 1.0, &device).unwrap();
        let triplets = TripletDict::default();
        let masker = TripletMasker::new(&triplets);
        let hr = Tensor::zeros((batch_size, hidden), DType::F32, &device).unwrap();

        let mut offsets = Vec::new();
        for step in 0..rounds {
            let tails = step_tails(step, batch_size, hidden, &device);
            cache
                .compute_and_refresh(&hr, &tails, &batch_examples(step, batch_size), &one(&device), Some(&masker))
                .unwrap();
            offsets.push(cache.offset());
        }
        assert_eq!(offsets, vec![2, 4, 0]);
        assert!(cache.is_warm());

        let first_components: Vec<f32> = cache
            .vectors()
            .narrow(1, 0, 1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(first_components, vec![1.0, 2.0, 101.0, 102.0, 201.0, 202.0]);

        let tails: Vec<String> = cache
            .examples()
            .iter()
            .map(|e| e.as_ref().unwrap().tail_id.clone())
            .collect();
        assert_eq!(tails, vec!["t0_0", "t0_1", "t1_0", "t1_1", "t2_0", "t2_1"]);
    }

    #[test]
    fn test_reads_happen_before_write() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(1, 1, 2, 1.0, &device).unwrap();
        let masker_dict = TripletDict::default();
        let masker = TripletMasker::new(&masker_dict);
        let hr = Tensor::new(&[[1.0f32, 0.0]], &device).unwrap();

        let first = Tensor::new(&[[3.0f32, 0.0]], &device).unwrap();
        cache
            .compute_and_refresh(&hr, &first, &batch_examples(0, 1), &one(&device), Some(&masker))
            .unwrap();

        let second = Tensor::new(&[[7.0f32, 0.0]], &device).unwrap();
        let logits: Vec<Vec<f32>> = cache
            .compute_and_refresh(&hr, &second, &batch_examples(1, 1), &one(&device), Some(&masker))
            .unwrap()
            .to_vec2()
            .unwrap();
        // sees step 0's tail, not its own
        assert_eq!(logits, vec![vec![3.0]]);
    }

    #[test]
    fn test_logits_scaled_by_inv_t_and_weight() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(1, 1, 2, 0.5, &device).unwrap();
        let masker_dict = TripletDict::default();
        let masker = TripletMasker::new(&masker_dict);
        let hr = Tensor::new(&[[1.0f32, 0.0]], &device).unwrap();
        let tail = Tensor::new(&[[2.0f32, 0.0]], &device).unwrap();
        let inv_t = Tensor::new(20.0f32, &device).unwrap();

        cache
            .compute_and_refresh(&hr, &tail, &batch_examples(0, 1), &inv_t, Some(&masker))
            .unwrap();
        let logits: Vec<Vec<f32>> = cache
            .compute_and_refresh(&hr, &tail, &batch_examples(1, 1), &inv_t, Some(&masker))
            .unwrap()
            .to_vec2()
            .unwrap();
        assert!((logits[0][0] - 20.0).abs() < 1e-5);
    }

    #[test]
    fn test_wrong_batch_size_always_rejected() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(4, 2, 3, 1.0, &device).unwrap();
        for wrong in [1usize, 3, 5, 8] {
            let hr = Tensor::zeros((wrong, 3), DType::F32, &device).unwrap();
            let tail = Tensor::zeros((wrong, 3), DType::F32, &device).unwrap();
            let result = cache.compute_and_refresh(&hr, &tail, &batch_examples(0, wrong), &one(&device), None);
            assert!(matches!(
                result,
                Err(EmbeddingError::BatchSizeMismatch { expected: 4, actual }) if actual == wrong
            ));
        }
        // rejected calls leave the cache untouched
        assert_eq!(cache.offset(), 0);
        assert!(cache.examples().iter().all(Option::is_none));
    }

    #[test]
    fn test_examples_length_must_match() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(2, 1, 3, 1.0, &device).unwrap();
        let hr = Tensor::zeros((2, 3), DType::F32, &device).unwrap();
        let result = cache.compute_and_refresh(&hr, &hr, &batch_examples(0, 1), &one(&device), None);
        assert!(matches!(
            result,
            Err(EmbeddingError::BatchSizeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn test_warm_cache_masks_known_facts() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(2, 1, 2, 1.0, &device).unwrap();
        let step0 = vec![Example::new("a", "r", "x"), Example::new("b", "r", "y")];
        let step1 = vec![Example::new("c", "r", "x"), Example::new("d", "r", "z")];
        let triplets = TripletDict::from_examples(&[step0.clone(), step1.clone()].concat());
        let masker = TripletMasker::new(&triplets);
        let hr = Tensor::ones((2, 2), DType::F32, &device).unwrap();
        let tails = Tensor::ones((2, 2), DType::F32, &device).unwrap();

        cache
            .compute_and_refresh(&hr, &tails, &step0, &one(&device), Some(&masker))
            .unwrap();
        assert!(cache.is_warm());

        let logits: Vec<Vec<f32>> = cache
            .compute_and_refresh(&hr, &tails, &step1, &one(&device), Some(&masker))
            .unwrap()
            .to_vec2()
            .unwrap();
        // c->x shares its tail with cached a->x
        assert_eq!(logits[0][0], MASK_FILL_VALUE as f32);
        assert_eq!(logits[0][1], 2.0);
        assert_eq!(logits[1], vec![2.0, 2.0]);
    }

    #[test]
    fn test_warm_cache_requires_mask_builder() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(1, 1, 2, 1.0, &device).unwrap();
        let hr = Tensor::ones((1, 2), DType::F32, &device).unwrap();
        cache
            .compute_and_refresh(&hr, &hr, &batch_examples(0, 1), &one(&device), None)
            .unwrap();
        let result = cache.compute_and_refresh(&hr, &hr, &batch_examples(1, 1), &one(&device), None);
        assert!(matches!(result, Err(EmbeddingError::MissingInput { .. })));
    }

    #[test]
    fn test_cached_vectors_are_detached() {
        let device = Device::Cpu;
        let mut cache = NegativeCache::new(1, 1, 2, 1.0, &device).unwrap();
        let var = candle_core::Var::new(&[[1.0f32, 2.0]], &device).unwrap();
        let hr = Tensor::ones((1, 2), DType::F32, &device).unwrap();
        cache
            .compute_and_refresh(&hr, var.as_tensor(), &batch_examples(0, 1), &one(&device), None)
            .unwrap();
        let grads = cache.vectors().sum_all().unwrap().backward().unwrap();
        assert!(grads.get(var.as_tensor()).is_none());
    }
}
