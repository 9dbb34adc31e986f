use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};

/// Dense `(n_queries, n_passages)` score block, always `f32` in host memory.
pub type ScoreMatrix = Array2<f32>;

/// A sequence of `L >= 1` vectors sharing one dimensionality `D`.
///
/// Rows are tokens (or image patches), columns are embedding dimensions. A
/// single-vector embedding is the `L == 1` case.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
   tokens: Array2<f32>,
}

impl Embedding {
   /// Wraps a `(L, D)` matrix. Rejects `L == 0` and `D == 0`.
   pub fn new(tokens: Array2<f32>) -> Result<Self> {
      if tokens.nrows() == 0 {
         return Err(ScoreError::EmptyInput { what: "embedding tokens" });
      }
      if tokens.ncols() == 0 {
         return Err(ScoreError::Shape("embedding dimension must be positive".to_string()));
      }
      let tokens = if tokens.is_standard_layout() {
         tokens
      } else {
         tokens.as_standard_layout().into_owned()
      };
      Ok(Self { tokens })
   }

   /// Single-vector embedding (`L == 1`).
   pub fn single(vector: Vec<f32>) -> Result<Self> {
      let dim = vector.len();
      Self::new(Array1::from_vec(vector).into_shape_with_order((1, dim))?)
   }

   /// Builds from row-major token data with the given dimensionality.
   pub fn from_flat(data: Vec<f32>, dim: usize) -> Result<Self> {
      if dim == 0 || data.len() % dim != 0 {
         return Err(ScoreError::Shape(format!(
            "{} values cannot be split into rows of {dim}",
            data.len()
         )));
      }
      let rows = data.len() / dim;
      Self::new(Array2::from_shape_vec((rows, dim), data)?)
   }

   /// Builds from per-token vectors; all rows must have the same length.
   pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
      let Some(first) = rows.first() else {
         return Err(ScoreError::EmptyInput { what: "embedding tokens" });
      };
      let dim = first.len();
      let mut data = Vec::with_capacity(rows.len() * dim);
      for (index, row) in rows.iter().enumerate() {
         if row.len() != dim {
            return Err(ScoreError::DimensionMismatch { expected: dim, found: row.len(), index });
         }
         data.extend_from_slice(row);
      }
      Self::from_flat(data, dim)
   }

   /// Sequence length `L`.
   pub fn len(&self) -> usize {
      self.tokens.nrows()
   }

   /// Always false; kept for clippy's `len_without_is_empty`.
   pub fn is_empty(&self) -> bool {
      self.tokens.nrows() == 0
   }

   /// Dimensionality `D`.
   pub fn dim(&self) -> usize {
      self.tokens.ncols()
   }

   pub fn view(&self) -> ArrayView2<'_, f32> {
      self.tokens.view()
   }

   /// Contiguous row-major token data.
   pub fn as_slice(&self) -> &[f32] {
      // Standard layout is enforced in `new`.
      self.tokens.as_slice().unwrap_or_default()
   }

   pub fn into_inner(self) -> Array2<f32> {
      self.tokens
   }
}

impl TryFrom<Array2<f32>> for Embedding {
   type Error = ScoreError;

   fn try_from(tokens: Array2<f32>) -> Result<Self> {
      Self::new(tokens)
   }
}

/// One entry of a per-query ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedHit {
   /// Position of the passage in the set the index was built from.
   pub passage_id: usize,
   pub score:      f32,
}

/// Sorts hits by descending score, ties by ascending passage id, and keeps `k`.
pub fn rank_hits(hits: &mut Vec<RankedHit>, k: usize) {
   hits.sort_by(|a, b| {
      b.score
         .partial_cmp(&a.score)
         .unwrap_or(std::cmp::Ordering::Equal)
         .then_with(|| a.passage_id.cmp(&b.passage_id))
   });
   hits.truncate(k);
}

/// Patch-grid geometry of an image: how many patches along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchGrid {
   pub n_patches_x: usize,
   pub n_patches_y: usize,
}

impl PatchGrid {
   pub const fn new(n_patches_x: usize, n_patches_y: usize) -> Self {
      Self { n_patches_x, n_patches_y }
   }

   pub const fn total(&self) -> usize {
      self.n_patches_x * self.n_patches_y
   }
}

/// Whether an encoder emits one vector per item or one per token/patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingArity {
   Single,
   Multi,
}
