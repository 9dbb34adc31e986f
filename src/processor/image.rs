use image::{ImageBuffer, Rgb, imageops::FilterType};

use crate::error::{Result, ScoreError};

/// 8-bit RGB page image handed to a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
   inner: image::RgbImage,
}

impl RgbImage {
   /// Wraps interleaved RGB bytes, row-major.
   pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
      if width == 0 || height == 0 {
         return Err(ScoreError::Processor(format!("empty image {width}x{height}")));
      }
      let expected = width as usize * height as usize * 3;
      let found = pixels.len();
      let inner = ImageBuffer::from_raw(width, height, pixels).ok_or_else(|| {
         ScoreError::Processor(format!(
            "expected {expected} bytes for {width}x{height} RGB, got {found}"
         ))
      })?;
      Ok(Self { inner })
   }

   /// Image filled with one color.
   pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
      if width == 0 || height == 0 {
         return Err(ScoreError::Processor(format!("empty image {width}x{height}")));
      }
      Ok(Self { inner: ImageBuffer::from_pixel(width, height, Rgb(rgb)) })
   }

   /// Decodes an encoded image (PNG, JPEG, ...) and converts it to RGB.
   pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
      let decoded = image::load_from_memory(bytes)
         .map_err(|e| ScoreError::Processor(format!("failed to decode image: {e}")))?;
      Self::try_from(decoded.to_rgb8())
   }

   pub fn width(&self) -> u32 {
      self.inner.width()
   }

   pub fn height(&self) -> u32 {
      self.inner.height()
   }

   /// `(height, width)`, the order patch geometry is asked in.
   pub fn size(&self) -> (u32, u32) {
      (self.height(), self.width())
   }

   /// Bilinear resize to `(height, width)`, scaled to `[-1, 1]`,
   /// channel-major `(3, height, width)`.
   pub fn to_normalized_chw(&self, height: usize, width: usize) -> Vec<f32> {
      let resized = if (height, width) == (self.height() as usize, self.width() as usize) {
         self.inner.clone()
      } else {
         image::imageops::resize(&self.inner, width as u32, height as u32, FilterType::Triangle)
      };

      let plane = height * width;
      let mut out = vec![0.0f32; 3 * plane];
      for (i, pixel) in resized.pixels().enumerate() {
         for (c, &value) in pixel.0.iter().enumerate() {
            out[c * plane + i] = f32::from(value) / 127.5 - 1.0;
         }
      }
      out
   }
}

impl TryFrom<image::RgbImage> for RgbImage {
   type Error = ScoreError;

   fn try_from(inner: image::RgbImage) -> Result<Self> {
      if inner.width() == 0 || inner.height() == 0 {
         return Err(ScoreError::Processor("empty image".to_string()));
      }
      Ok(Self { inner })
   }
}

#[cfg(test)]
mod tests {
   use std::io::Cursor;

   use super::*;

   #[test]
   fn rejects_wrong_buffer_size() {
      assert!(RgbImage::new(2, 2, vec![0; 11]).is_err());
      assert!(RgbImage::new(0, 2, vec![]).is_err());
   }

   #[test]
   fn solid_color_survives_resize() {
      let image = RgbImage::solid(7, 3, [255, 0, 127]).unwrap();
      let chw = image.to_normalized_chw(4, 5);
      assert_eq!(chw.len(), 3 * 4 * 5);
      assert!(chw[..20].iter().all(|&v| (v - 1.0).abs() < 1e-5));
      assert!(chw[20..40].iter().all(|&v| (v + 1.0).abs() < 1e-5));
      assert!(chw[40..].iter().all(|&v| (v - (127.0 / 127.5 - 1.0)).abs() < 1e-5));
   }

   #[test]
   fn identity_resize_keeps_pixels() {
      let image = RgbImage::new(2, 1, vec![0, 0, 0, 255, 255, 255]).unwrap();
      let chw = image.to_normalized_chw(1, 2);
      assert!((chw[0] + 1.0).abs() < 1e-5);
      assert!((chw[1] - 1.0).abs() < 1e-5);
   }

   #[test]
   fn decodes_png() {
      let source = image::RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
      let mut bytes = Vec::new();
      source.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();

      let decoded = RgbImage::from_bytes(&bytes).unwrap();
      assert_eq!(decoded.size(), (2, 3));
      assert!(RgbImage::from_bytes(b"not an image").is_err());
   }
}
