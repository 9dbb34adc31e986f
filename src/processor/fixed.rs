use candle_core::Tensor;

use crate::{
   error::{Result, ScoreError},
   processor::{ProcessorBatch, QueryTokenizer, RgbImage, VisualProcessor},
   types::PatchGrid,
};

/// Processor for encoders that see every page at one square resolution
/// (PaliGemma-style vision towers).
///
/// The patch grid is the same for every input image.
pub struct FixedResolutionProcessor {
   queries:    QueryTokenizer,
   resolution: usize,
   patch_size: usize,
}

impl FixedResolutionProcessor {
   pub fn new(queries: QueryTokenizer, resolution: usize, patch_size: usize) -> Result<Self> {
      if patch_size == 0 || resolution < patch_size {
         return Err(ScoreError::Processor(format!(
            "resolution {resolution} cannot be tiled by patches of {patch_size}"
         )));
      }
      Ok(Self { queries, resolution, patch_size })
   }

   pub const fn resolution(&self) -> usize {
      self.resolution
   }
}

impl VisualProcessor for FixedResolutionProcessor {
   /// `pixel_values` is `(batch, 3, resolution, resolution)` in `[-1, 1]`.
   fn process_images(&self, images: &[RgbImage]) -> Result<ProcessorBatch> {
      if images.is_empty() {
         return Err(ScoreError::EmptyInput { what: "images" });
      }

      let side = self.resolution;
      let mut pixels = Vec::with_capacity(images.len() * 3 * side * side);
      for image in images {
         pixels.extend(image.to_normalized_chw(side, side));
      }

      let grid = self.get_n_patches((side as u32, side as u32));
      Ok(ProcessorBatch {
         pixel_values: Some(Tensor::from_vec(
            pixels,
            (images.len(), 3, side, side),
            self.queries.device(),
         )?),
         image_grids: vec![grid; images.len()],
         ..ProcessorBatch::default()
      })
   }

   fn process_queries(
      &self,
      queries: &[&str],
      max_length: usize,
      suffix: Option<&str>,
   ) -> Result<ProcessorBatch> {
      self.queries.encode(queries, max_length, suffix)
   }

   fn get_n_patches(&self, _image_size: (u32, u32)) -> PatchGrid {
      let n = self.resolution / self.patch_size;
      PatchGrid::new(n, n)
   }
}
