//! Padding and stacking of variable-length embeddings into rectangular
//! `(batch, max_len, dim)` tensors.

use std::ops::Range;

use candle_core::{DType, Device, Tensor};
use ndarray::Array2;

use crate::{
   error::{Result, ScoreError},
   types::Embedding,
};

/// Consecutive partitions of `0..len` with at most `batch_size` items each.
pub fn batch_ranges(
   len: usize,
   batch_size: usize,
) -> Result<impl Iterator<Item = Range<usize>> + Clone> {
   if batch_size == 0 {
      return Err(ScoreError::InvalidBatchSize(batch_size));
   }
   Ok((0..len).step_by(batch_size).map(move |start| start..(start + batch_size).min(len)))
}

/// Checks that every embedding across `sets` shares one dimensionality.
///
/// Returns that dimensionality. Indices in errors count across the sets in
/// order, so the second set's first item follows the first set's last.
pub fn shared_dim(sets: &[&[Embedding]]) -> Result<usize> {
   let mut expected = None;
   for (index, emb) in sets.iter().flat_map(|s| s.iter()).enumerate() {
      match expected {
         None => expected = Some(emb.dim()),
         Some(dim) if dim != emb.dim() => {
            return Err(ScoreError::DimensionMismatch { expected: dim, found: emb.dim(), index });
         },
         Some(_) => {},
      }
   }
   expected.ok_or(ScoreError::EmptyInput { what: "embeddings" })
}

/// A zero-padded `(batch, max_len, dim)` block plus the true length of each
/// row.
#[derive(Debug, Clone)]
pub struct PaddedBatch {
   tensor:  Tensor,
   lengths: Vec<usize>,
   max_len: usize,
   dim:     usize,
}

impl PaddedBatch {
   /// Pads `items` on the trailing side with zero vectors and places the block
   /// on `device` in `dtype`. Row order follows input order.
   pub fn from_embeddings(items: &[Embedding], device: &Device, dtype: DType) -> Result<Self> {
      let dim = shared_dim(&[items])?;
      let lengths: Vec<usize> = items.iter().map(Embedding::len).collect();
      let max_len = lengths.iter().copied().max().unwrap_or(0);

      let mut data = vec![0.0f32; items.len() * max_len * dim];
      for (row, emb) in items.iter().enumerate() {
         let start = row * max_len * dim;
         data[start..start + emb.len() * dim].copy_from_slice(emb.as_slice());
      }

      let tensor = Tensor::from_vec(data, (items.len(), max_len, dim), device)?;
      let tensor = if dtype == DType::F32 { tensor } else { tensor.to_dtype(dtype)? };

      Ok(Self { tensor, lengths, max_len, dim })
   }

   pub const fn tensor(&self) -> &Tensor {
      &self.tensor
   }

   pub fn lengths(&self) -> &[usize] {
      &self.lengths
   }

   pub fn batch_size(&self) -> usize {
      self.lengths.len()
   }

   pub const fn max_len(&self) -> usize {
      self.max_len
   }

   pub const fn dim(&self) -> usize {
      self.dim
   }

   pub fn device(&self) -> &Device {
      self.tensor.device()
   }

   /// Host-side `(batch, max_len)` validity flags: `1.0` real, `0.0` padding.
   fn mask_values(&self) -> Vec<f32> {
      let mut mask = vec![0.0f32; self.lengths.len() * self.max_len];
      for (row, &len) in self.lengths.iter().enumerate() {
         mask[row * self.max_len..row * self.max_len + len].fill(1.0);
      }
      mask
   }

   /// `(batch, max_len)` mask on the batch's device, in `dtype`.
   pub fn mask(&self, dtype: DType) -> Result<Tensor> {
      let mask = Tensor::from_vec(self.mask_values(), (self.batch_size(), self.max_len), self.device())?;
      Ok(mask.to_dtype(dtype)?)
   }

   /// `(batch, max_len)` additive bias: `0` for real positions, `-inf` for
   /// padding.
   pub fn padding_bias(&self, dtype: DType) -> Result<Tensor> {
      let bias: Vec<f32> =
         self.mask_values().into_iter().map(|m| if m > 0.0 { 0.0 } else { f32::NEG_INFINITY }).collect();
      let bias = Tensor::from_vec(bias, (self.batch_size(), self.max_len), self.device())?;
      Ok(bias.to_dtype(dtype)?)
   }

   /// Copies the block to host memory as `f32`, one matrix per row trimmed to
   /// its true length.
   pub fn to_host(&self) -> Result<Vec<Array2<f32>>> {
      let flat: Vec<f32> = self
         .tensor
         .to_dtype(DType::F32)?
         .to_device(&Device::Cpu)?
         .flatten_all()?
         .to_vec1()?;

      let stride = self.max_len * self.dim;
      self
         .lengths
         .iter()
         .enumerate()
         .map(|(row, &len)| {
            let start = row * stride;
            let data = flat[start..start + len * self.dim].to_vec();
            Ok(Array2::from_shape_vec((len, self.dim), data)?)
         })
         .collect()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn emb(rows: &[&[f32]]) -> Embedding {
      Embedding::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
   }

   #[test]
   fn ranges_cover_input_in_order() {
      let ranges: Vec<_> = batch_ranges(5, 2).unwrap().collect();
      assert_eq!(ranges, vec![0..2, 2..4, 4..5]);
      assert_eq!(batch_ranges(0, 3).unwrap().count(), 0);
      assert!(matches!(batch_ranges(3, 0), Err(ScoreError::InvalidBatchSize(0))));
   }

   #[test]
   fn pads_trailing_with_zeros() {
      let items = vec![emb(&[&[1.0, 2.0]]), emb(&[&[3.0, 4.0], &[5.0, 6.0], &[7.0, 8.0]])];
      let batch = PaddedBatch::from_embeddings(&items, &Device::Cpu, DType::F32).unwrap();

      assert_eq!(batch.tensor().dims(), &[2, 3, 2]);
      assert_eq!(batch.lengths(), &[1, 3]);
      let values: Vec<Vec<Vec<f32>>> = batch.tensor().to_vec3().unwrap();
      assert_eq!(values[0], vec![vec![1.0, 2.0], vec![0.0, 0.0], vec![0.0, 0.0]]);
      assert_eq!(values[1], vec![vec![3.0, 4.0], vec![5.0, 6.0], vec![7.0, 8.0]]);
   }

   #[test]
   fn mask_and_bias_track_padding() {
      let items = vec![emb(&[&[1.0]]), emb(&[&[2.0], &[3.0]])];
      let batch = PaddedBatch::from_embeddings(&items, &Device::Cpu, DType::F32).unwrap();

      let mask: Vec<Vec<f32>> = batch.mask(DType::F32).unwrap().to_vec2().unwrap();
      assert_eq!(mask, vec![vec![1.0, 0.0], vec![1.0, 1.0]]);

      let bias: Vec<Vec<f32>> = batch.padding_bias(DType::F32).unwrap().to_vec2().unwrap();
      assert_eq!(bias[0][0], 0.0);
      assert_eq!(bias[0][1], f32::NEG_INFINITY);
      assert_eq!(bias[1], vec![0.0, 0.0]);
   }

   #[test]
   fn mismatched_dims_are_rejected() {
      let items = vec![emb(&[&[1.0, 2.0]]), emb(&[&[1.0, 2.0, 3.0]])];
      let err = PaddedBatch::from_embeddings(&items, &Device::Cpu, DType::F32).unwrap_err();
      assert!(matches!(err, ScoreError::DimensionMismatch { expected: 2, found: 3, index: 1 }));
   }

   #[test]
   fn to_host_trims_padding() {
      let items = vec![emb(&[&[1.0, 2.0]]), emb(&[&[3.0, 4.0], &[5.0, 6.0]])];
      let batch = PaddedBatch::from_embeddings(&items, &Device::Cpu, DType::F16).unwrap();
      let host = batch.to_host().unwrap();
      assert_eq!(host[0].shape(), &[1, 2]);
      assert_eq!(host[1].shape(), &[2, 2]);
      assert_eq!(host[1][[1, 1]], 6.0);
   }

   #[test]
   fn shared_dim_counts_across_sets() {
      let a = vec![emb(&[&[1.0, 2.0]])];
      let b = vec![emb(&[&[1.0, 2.0]]), emb(&[&[1.0]])];
      let err = shared_dim(&[&a, &b]).unwrap_err();
      assert!(matches!(err, ScoreError::DimensionMismatch { index: 2, .. }));
   }
}
