//! Encoder-side preprocessing contract.
//!
//! Processors turn raw images and query strings into encoder inputs and know
//! the patch geometry of their encoder. They never compute embeddings; the
//! `score` convenience hands embeddings to a [`ScoringEngine`].

pub mod dynamic;
pub mod fixed;
pub mod image;

use std::path::Path;

use candle_core::{Device, Tensor};
pub use dynamic::DynamicResolutionProcessor;
pub use fixed::FixedResolutionProcessor;
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;

pub use self::image::RgbImage;
use crate::{
   error::{Result, ScoreError},
   score::ScoringEngine,
   types::{Embedding, EmbeddingArity, PatchGrid, ScoreMatrix},
};

pub const DEFAULT_QUERY_MAX_LENGTH: usize = 50;
pub const DEFAULT_N_AUGMENTATION: usize = 10;

/// Encoder inputs produced by a processor. Fields a call does not produce are
/// `None` / empty.
#[derive(Debug, Clone, Default)]
pub struct ProcessorBatch {
   /// `(batch, seq_len)` `u32` token ids, right-padded.
   pub input_ids:      Option<Tensor>,
   /// `(batch, seq_len)` `u32`, `1` for real tokens.
   pub attention_mask: Option<Tensor>,
   /// Image pixels; layout is processor specific.
   pub pixel_values:   Option<Tensor>,
   /// Patch grid of each processed image, in input order.
   pub image_grids:    Vec<PatchGrid>,
}

/// Implemented by each encoder family's processor.
pub trait VisualProcessor: Send + Sync {
   /// Whether the encoder emits one vector per item or one per token/patch.
   fn arity(&self) -> EmbeddingArity {
      EmbeddingArity::Multi
   }

   fn process_images(&self, images: &[RgbImage]) -> Result<ProcessorBatch>;

   /// Tokenizes queries. `suffix` replaces the processor's default suffix.
   fn process_queries(
      &self,
      queries: &[&str],
      max_length: usize,
      suffix: Option<&str>,
   ) -> Result<ProcessorBatch>;

   /// [`process_queries`](Self::process_queries) with
   /// [`DEFAULT_QUERY_MAX_LENGTH`] tokens and the default suffix.
   fn process_queries_default(&self, queries: &[&str]) -> Result<ProcessorBatch> {
      self.process_queries(queries, DEFAULT_QUERY_MAX_LENGTH, None)
   }

   /// Scores embeddings produced by this processor's encoder.
   fn score(
      &self,
      engine: &ScoringEngine,
      queries: &[Embedding],
      passages: &[Embedding],
   ) -> Result<ScoreMatrix> {
      match self.arity() {
         EmbeddingArity::Single => engine.score_single(queries, passages),
         EmbeddingArity::Multi => engine.score_multi(queries, passages),
      }
   }

   /// Patch grid for an image of `(height, width)` pixels.
   fn get_n_patches(&self, image_size: (u32, u32)) -> PatchGrid;
}

/// Query formatting and tokenization shared by the processors.
pub struct QueryTokenizer {
   tokenizer:          Tokenizer,
   prefix:             String,
   augmentation_token: String,
   n_augmentation:     usize,
   pad_id:             u32,
   device:             Device,
}

impl QueryTokenizer {
   /// `augmentation_token` doubles as the padding token.
   pub fn new(tokenizer: Tokenizer, prefix: &str, augmentation_token: &str) -> Self {
      let pad_id = tokenizer.token_to_id(augmentation_token).unwrap_or(0);
      Self {
         tokenizer,
         prefix: prefix.to_string(),
         augmentation_token: augmentation_token.to_string(),
         n_augmentation: DEFAULT_N_AUGMENTATION,
         pad_id,
         device: Device::Cpu,
      }
   }

   pub fn with_augmentation(mut self, n_augmentation: usize) -> Self {
      self.n_augmentation = n_augmentation;
      self
   }

   /// Device the produced tensors are placed on.
   pub fn with_device(mut self, device: Device) -> Self {
      self.device = device;
      self
   }

   pub fn from_file(path: &Path, prefix: &str, augmentation_token: &str) -> Result<Self> {
      let tokenizer = Tokenizer::from_file(path)
         .map_err(|e| ScoreError::Processor(format!("failed to load tokenizer: {e}")))?;
      Ok(Self::new(tokenizer, prefix, augmentation_token))
   }

   /// Fetches `tokenizer.json` of `repo_id` from the Hugging Face hub cache.
   pub fn from_hub(repo_id: &str, prefix: &str, augmentation_token: &str) -> Result<Self> {
      let api = Api::new()
         .map_err(|e| ScoreError::Processor(format!("failed to initialize hf_hub API: {e}")))?;
      let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));
      let path = repo.get("tokenizer.json").map_err(|e| {
         ScoreError::Processor(format!("failed to download tokenizer.json for {repo_id}: {e}"))
      })?;
      Self::from_file(&path, prefix, augmentation_token)
   }

   pub const fn device(&self) -> &Device {
      &self.device
   }

   fn default_suffix(&self) -> String {
      self.augmentation_token.repeat(self.n_augmentation)
   }

   /// `prefix + query + suffix`, tokenized, truncated to `max_length` and
   /// right-padded to the longest query.
   pub fn encode(
      &self,
      queries: &[&str],
      max_length: usize,
      suffix: Option<&str>,
   ) -> Result<ProcessorBatch> {
      if queries.is_empty() {
         return Err(ScoreError::EmptyInput { what: "queries" });
      }
      let suffix = suffix.map_or_else(|| self.default_suffix(), str::to_string);

      let encoded: Vec<Vec<u32>> = queries
         .iter()
         .map(|query| {
            let text = format!("{}{query}{suffix}", self.prefix);
            let encoding = self
               .tokenizer
               .encode(text.as_str(), true)
               .map_err(|e| ScoreError::Processor(format!("tokenization failed: {e}")))?;
            let mut ids = encoding.get_ids().to_vec();
            ids.truncate(max_length);
            Ok(ids)
         })
         .collect::<Result<_>>()?;

      let seq_len = encoded.iter().map(Vec::len).max().unwrap_or(0);
      let mut input_ids = Vec::with_capacity(queries.len() * seq_len);
      let mut attention_mask = Vec::with_capacity(queries.len() * seq_len);
      for ids in &encoded {
         input_ids.extend_from_slice(ids);
         input_ids.resize(input_ids.len() + seq_len - ids.len(), self.pad_id);
         attention_mask.resize(attention_mask.len() + ids.len(), 1u32);
         attention_mask.resize(attention_mask.len() + seq_len - ids.len(), 0u32);
      }

      let shape = (queries.len(), seq_len);
      Ok(ProcessorBatch {
         input_ids: Some(Tensor::from_vec(input_ids, shape, &self.device)?),
         attention_mask: Some(Tensor::from_vec(attention_mask, shape, &self.device)?),
         ..ProcessorBatch::default()
      })
   }
}
