//! Exact single-vector and late-interaction scoring, plus the index-backed
//! top-k path.

pub mod maxsim;

use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use ndarray::Array2;

use crate::{
   batch::{PaddedBatch, batch_ranges, shared_dim},
   config::{PaddingMode, Precision, ScoringConfig, debug_scoring},
   error::{Result, ScoreError},
   index::{self, ApproximateIndex, IndexBackend},
   types::{Embedding, RankedHit, ScoreMatrix},
};

/// Scores query embeddings against passage embeddings on one compute device.
///
/// The device is resolved once at construction. The engine holds no mutable
/// state, so repeated calls with identical inputs give identical results.
pub struct ScoringEngine {
   config:  ScoringConfig,
   device:  Device,
   backend: Option<Arc<dyn IndexBackend>>,
}

impl ScoringEngine {
   /// Resolves the configured device and wires the configured index backend.
   ///
   /// The CPU backend has no `bf16` matmul; a `bf16` request there computes in
   /// `f32` instead.
   pub fn new(mut config: ScoringConfig) -> Result<Self> {
      config.validate()?;
      let device = config.device.resolve()?;
      if device.is_cpu() && config.precision == Precision::Bf16 {
         tracing::warn!("bf16 is not supported on the CPU backend, computing in f32");
         config.precision = Precision::F32;
      }
      let backend = index::backend_for(&config.index);
      Ok(Self { config, device, backend })
   }

   /// Engine on the CPU with default settings and no index backend.
   pub fn cpu() -> Result<Self> {
      Self::new(ScoringConfig::cpu())
   }

   /// Replaces the index backend, e.g. with an external implementation.
   pub fn with_backend(mut self, backend: Arc<dyn IndexBackend>) -> Self {
      self.backend = Some(backend);
      self
   }

   pub fn without_backend(mut self) -> Self {
      self.backend = None;
      self
   }

   pub const fn config(&self) -> &ScoringConfig {
      &self.config
   }

   pub const fn device(&self) -> &Device {
      &self.device
   }

   pub const fn has_index_backend(&self) -> bool {
      self.backend.is_some()
   }

   const fn dtype(&self) -> DType {
      self.config.precision.dtype()
   }

   /// Dot-product scores between single-vector queries and passages.
   ///
   /// Every embedding must have sequence length 1. Returns `(Nq, Np)`.
   pub fn score_single(&self, queries: &[Embedding], passages: &[Embedding]) -> Result<ScoreMatrix> {
      check_non_empty(queries, "queries")?;
      check_non_empty(passages, "passages")?;
      for (index, emb) in queries.iter().chain(passages).enumerate() {
         if emb.len() != 1 {
            return Err(ScoreError::NotSingleVector { index, len: emb.len() });
         }
      }
      let dim = shared_dim(&[queries, passages])?;

      let qs = self.stack_single(queries, dim)?;
      let ps = self.stack_single(passages, dim)?;

      let scores = qs.matmul(&ps.t()?.contiguous()?)?;
      let scores = scores.to_dtype(DType::F32)?.to_device(&Device::Cpu)?;
      let (rows, cols) = scores.dims2()?;
      assert_eq!(rows, queries.len(), "expected {} score rows, got {rows}", queries.len());

      Ok(Array2::from_shape_vec((rows, cols), scores.flatten_all()?.to_vec1::<f32>()?)?)
   }

   fn stack_single(&self, items: &[Embedding], dim: usize) -> Result<Tensor> {
      let data: Vec<f32> = items.iter().flat_map(|e| e.as_slice().iter().copied()).collect();
      let tensor = Tensor::from_vec(data, (items.len(), dim), &self.device)?;
      Ok(tensor.to_dtype(self.dtype())?)
   }

   /// Late-interaction (`MaxSim`) scores with the configured batch size.
   pub fn score_multi(&self, queries: &[Embedding], passages: &[Embedding]) -> Result<ScoreMatrix> {
      self.score_multi_with_batch_size(queries, passages, self.config.batch_size)
   }

   /// Late-interaction (`MaxSim`) scores between multi-vector queries and
   /// passages.
   ///
   /// Queries and passages are tiled into batches of at most `batch_size`
   /// items; only one query-batch x passage-batch block of token
   /// similarities exists on the device at a time. Each query batch's scores
   /// move to host memory as soon as its row block is complete.
   pub fn score_multi_with_batch_size(
      &self,
      queries: &[Embedding],
      passages: &[Embedding],
      batch_size: usize,
   ) -> Result<ScoreMatrix> {
      check_non_empty(queries, "queries")?;
      check_non_empty(passages, "passages")?;
      shared_dim(&[queries, passages])?;

      let dtype = self.dtype();
      let query_batches = batch_ranges(queries.len(), batch_size)?;
      let passage_batches = batch_ranges(passages.len(), batch_size)?;

      let mut scores = Vec::with_capacity(queries.len() * passages.len());
      let mut n_rows = 0;

      for q_range in query_batches {
         let q_batch = PaddedBatch::from_embeddings(&queries[q_range.clone()], &self.device, dtype)?;

         let mut blocks = Vec::new();
         for p_range in passage_batches.clone() {
            let p_batch =
               PaddedBatch::from_embeddings(&passages[p_range.clone()], &self.device, dtype)?;

            if debug_scoring() {
               tracing::debug!(
                  "maxsim block queries {:?} (len {}) x passages {:?} (len {})",
                  q_range,
                  q_batch.max_len(),
                  p_range,
                  p_batch.max_len()
               );
            }

            blocks.push(late_interaction(&q_batch, &p_batch, self.config.padding, dtype)?);
         }

         let row_block = Tensor::cat(&blocks, 1)?.to_dtype(DType::F32)?.to_device(&Device::Cpu)?;
         n_rows += row_block.dim(0)?;
         scores.extend(row_block.flatten_all()?.to_vec1::<f32>()?);
      }

      assert_eq!(n_rows, queries.len(), "expected {} score rows, got {n_rows}", queries.len());

      Ok(Array2::from_shape_vec((queries.len(), passages.len()), scores)?)
   }

   /// Builds an approximate index over `passages` with the configured backend.
   pub fn build_index(&self, passages: &[Embedding]) -> Result<Box<dyn ApproximateIndex>> {
      let Some(backend) = &self.backend else {
         tracing::warn!("approximate index requested but no backend is configured");
         return Err(ScoreError::BackendUnavailable(
            "no approximate index backend configured; fall back to exact scoring".to_string(),
         ));
      };

      check_non_empty(passages, "passages")?;
      let dim = shared_dim(&[passages])?;
      let documents: Vec<Array2<f32>> = passages.iter().map(|p| p.view().to_owned()).collect();

      tracing::info!(
         "building {} index over {} passages (dim {dim})",
         backend.name(),
         documents.len()
      );
      backend.build(documents)
   }

   /// Top-`k` passages per query from `index`, with the configured batch
   /// size.
   pub fn topk_via_index(
      &self,
      queries: &[Embedding],
      index: &dyn ApproximateIndex,
      k: usize,
   ) -> Result<Vec<Vec<RankedHit>>> {
      self.topk_via_index_with_batch_size(queries, index, k, self.config.batch_size)
   }

   /// Top-`k` passages per query. Queries are padded per batch, cast to `f32`
   /// and handed to the index; one ranked list per query, in query order.
   pub fn topk_via_index_with_batch_size(
      &self,
      queries: &[Embedding],
      index: &dyn ApproximateIndex,
      k: usize,
      batch_size: usize,
   ) -> Result<Vec<Vec<RankedHit>>> {
      check_non_empty(queries, "queries")?;
      if k == 0 {
         return Err(ScoreError::InvalidTopK);
      }
      let dim = shared_dim(&[queries])?;
      if dim != index.dim() {
         return Err(ScoreError::DimensionMismatch { expected: index.dim(), found: dim, index: 0 });
      }

      let mut results = Vec::with_capacity(queries.len());
      for q_range in batch_ranges(queries.len(), batch_size)? {
         let q_batch =
            PaddedBatch::from_embeddings(&queries[q_range.clone()], &self.device, DType::F32)?;
         let hits = index.search(&q_batch, k)?;
         if hits.len() != q_range.len() {
            return Err(ScoreError::IndexContract(format!(
               "{} ranked lists returned for {} queries",
               hits.len(),
               q_range.len()
            )));
         }
         if let Some(list) = hits.iter().find(|list| list.len() > k) {
            return Err(ScoreError::IndexContract(format!(
               "{} hits returned for k = {k}",
               list.len()
            )));
         }
         results.extend(hits);
      }

      Ok(results)
   }
}

fn check_non_empty(items: &[Embedding], what: &'static str) -> Result<()> {
   if items.is_empty() {
      return Err(ScoreError::EmptyInput { what });
   }
   Ok(())
}

/// `(bq, bp)` `MaxSim` block for one query batch and one passage batch.
///
/// All token pairs are scored with a single matmul over the flattened
/// `(b * L, D)` blocks, reshaped to `(bq, Lq, bp, Lp)`, reduced with max over
/// passage tokens and sum over query tokens.
fn late_interaction(
   queries: &PaddedBatch,
   passages: &PaddedBatch,
   padding: PaddingMode,
   dtype: DType,
) -> Result<Tensor> {
   let (bq, lq, dim) = (queries.batch_size(), queries.max_len(), queries.dim());
   let (bp, lp) = (passages.batch_size(), passages.max_len());

   let q_flat = queries.tensor().reshape((bq * lq, dim))?;
   let p_flat = passages.tensor().reshape((bp * lp, dim))?;
   let raw = q_flat.matmul(&p_flat.t()?.contiguous()?)?.reshape((bq, lq, bp, lp))?;

   let scores = match padding {
      PaddingMode::Unmasked => raw.max(3)?.sum(1)?,
      PaddingMode::Masked => {
         let bias = passages.padding_bias(dtype)?.reshape((1, 1, bp, lp))?;
         let maxes = raw.broadcast_add(&bias)?.max(3)?;
         let query_mask = queries.mask(dtype)?.reshape((bq, lq, 1))?;
         maxes.broadcast_mul(&query_mask)?.sum(1)?
      },
   };
   Ok(scores)
}
