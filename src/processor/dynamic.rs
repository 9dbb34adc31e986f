use candle_core::Tensor;

use crate::{
   error::{Result, ScoreError},
   processor::{ProcessorBatch, QueryTokenizer, RgbImage, VisualProcessor},
   types::PatchGrid,
};

pub const DEFAULT_PATCH_SIZE: usize = 14;
pub const DEFAULT_MERGE_SIZE: usize = 2;
pub const DEFAULT_MIN_PIXELS: usize = 4 * 28 * 28;
pub const DEFAULT_MAX_PIXELS: usize = 768 * 28 * 28;

/// Processor for encoders that keep the page's aspect ratio (Qwen2-VL-style
/// vision towers).
///
/// Images are resized so both sides are multiples of `patch_size *
/// merge_size` and the pixel count lands in `[min_pixels, max_pixels]`. The
/// encoder merges `merge_size x merge_size` patches into one embedding, so the
/// reported grid counts merged patches.
pub struct DynamicResolutionProcessor {
   queries:    QueryTokenizer,
   patch_size: usize,
   merge_size: usize,
   min_pixels: usize,
   max_pixels: usize,
}

impl DynamicResolutionProcessor {
   pub fn new(queries: QueryTokenizer) -> Self {
      Self {
         queries,
         patch_size: DEFAULT_PATCH_SIZE,
         merge_size: DEFAULT_MERGE_SIZE,
         min_pixels: DEFAULT_MIN_PIXELS,
         max_pixels: DEFAULT_MAX_PIXELS,
      }
   }

   pub fn with_geometry(mut self, patch_size: usize, merge_size: usize) -> Result<Self> {
      if patch_size == 0 || merge_size == 0 {
         return Err(ScoreError::Processor("patch and merge sizes must be positive".to_string()));
      }
      self.patch_size = patch_size;
      self.merge_size = merge_size;
      Ok(self)
   }

   pub fn with_pixel_bounds(mut self, min_pixels: usize, max_pixels: usize) -> Result<Self> {
      if min_pixels > max_pixels {
         return Err(ScoreError::Processor(format!(
            "min_pixels {min_pixels} exceeds max_pixels {max_pixels}"
         )));
      }
      self.min_pixels = min_pixels;
      self.max_pixels = max_pixels;
      Ok(self)
   }

   const fn factor(&self) -> usize {
      self.patch_size * self.merge_size
   }

   /// Resized `(height, width)` for an input of `(height, width)`.
   pub fn smart_resize(&self, height: usize, width: usize) -> (usize, usize) {
      let factor = self.factor();
      let round_to = |v: f64| ((v / factor as f64).round() as usize * factor).max(factor);
      let floor_to = |v: f64| ((v / factor as f64).floor() as usize * factor).max(factor);
      let ceil_to = |v: f64| ((v / factor as f64).ceil() as usize * factor).max(factor);

      let (h, w) = (height as f64, width as f64);
      let (mut h_bar, mut w_bar) = (round_to(h), round_to(w));

      if h_bar * w_bar > self.max_pixels {
         let beta = (h * w / self.max_pixels as f64).sqrt();
         h_bar = floor_to(h / beta);
         w_bar = floor_to(w / beta);
      } else if h_bar * w_bar < self.min_pixels {
         let beta = (self.min_pixels as f64 / (h * w)).sqrt();
         h_bar = ceil_to(h * beta);
         w_bar = ceil_to(w * beta);
      }
      (h_bar, w_bar)
   }

   /// Flattens a resized image into `(n_patches, 3 * patch * patch)` rows,
   /// row-major over the unmerged patch grid.
   fn patchify(&self, chw: &[f32], height: usize, width: usize) -> Vec<f32> {
      let p = self.patch_size;
      let (rows, cols) = (height / p, width / p);
      let mut out = Vec::with_capacity(chw.len());
      for py in 0..rows {
         for px in 0..cols {
            for c in 0..3 {
               for y in 0..p {
                  let start = (c * height + py * p + y) * width + px * p;
                  out.extend_from_slice(&chw[start..start + p]);
               }
            }
         }
      }
      out
   }
}

impl VisualProcessor for DynamicResolutionProcessor {
   /// `pixel_values` is `(total_patches, 3 * patch * patch)`, images
   /// concatenated in input order; `image_grids` gives each image's merged
   /// grid, so image `i` owns `grid.total() * merge_size²` rows.
   fn process_images(&self, images: &[RgbImage]) -> Result<ProcessorBatch> {
      if images.is_empty() {
         return Err(ScoreError::EmptyInput { what: "images" });
      }

      let mut pixels = Vec::new();
      let mut image_grids = Vec::with_capacity(images.len());
      for image in images {
         let (height, width) = self.smart_resize(image.height() as usize, image.width() as usize);
         let chw = image.to_normalized_chw(height, width);
         pixels.extend(self.patchify(&chw, height, width));
         image_grids.push(self.get_n_patches(image.size()));
      }

      let patch_len = 3 * self.patch_size * self.patch_size;
      let n_patches = pixels.len() / patch_len;
      Ok(ProcessorBatch {
         pixel_values: Some(Tensor::from_vec(pixels, (n_patches, patch_len), self.queries.device())?),
         image_grids,
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

   fn get_n_patches(&self, image_size: (u32, u32)) -> PatchGrid {
      let (height, width) = self.smart_resize(image_size.0 as usize, image_size.1 as usize);
      let factor = self.factor();
      PatchGrid::new(width / factor, height / factor)
   }
}
