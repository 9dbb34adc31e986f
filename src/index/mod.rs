//! Approximate top-k index contract.
//!
//! The engine only builds and queries indexes through these traits; how a
//! backend lays out its storage is its own business.

#[cfg(feature = "index")]
pub mod centroid;
#[cfg(feature = "index")]
pub mod flat;

use std::sync::Arc;

#[cfg(feature = "index")]
pub use centroid::CentroidBackend;
#[cfg(feature = "index")]
pub use flat::FlatBackend;
use ndarray::Array2;

use crate::{
   batch::PaddedBatch,
   config::{IndexBackendKind, IndexConfig},
   error::Result,
   types::RankedHit,
};

/// Builds indexes from passage token matrices.
pub trait IndexBackend: Send + Sync {
   fn name(&self) -> &'static str;

   /// Takes one `(L_i, D)` `f32` matrix per passage, unpadded. Passage ids in
   /// search results are positions in `documents`.
   fn build(&self, documents: Vec<Array2<f32>>) -> Result<Box<dyn ApproximateIndex>>;
}

/// A built index answering top-k queries.
pub trait ApproximateIndex: Send + Sync {
   /// Number of indexed passages.
   fn len(&self) -> usize;

   fn is_empty(&self) -> bool {
      self.len() == 0
   }

   /// Embedding dimensionality the index was built with.
   fn dim(&self) -> usize;

   /// Returns one ranked list per batch row, in row order, each holding at
   /// most `k` hits sorted by descending score.
   fn search(&self, queries: &PaddedBatch, k: usize) -> Result<Vec<Vec<RankedHit>>>;
}

impl<T: IndexBackend + ?Sized> IndexBackend for Arc<T> {
   fn name(&self) -> &'static str {
      (**self).name()
   }

   fn build(&self, documents: Vec<Array2<f32>>) -> Result<Box<dyn ApproximateIndex>> {
      (**self).build(documents)
   }
}

/// Backend selected by `config`, or `None` when none is configured or the
/// crate was built without the `index` feature.
pub fn backend_for(config: &IndexConfig) -> Option<Arc<dyn IndexBackend>> {
   match config.backend {
      IndexBackendKind::None => None,
      #[cfg(feature = "index")]
      IndexBackendKind::Flat => Some(Arc::new(FlatBackend)),
      #[cfg(feature = "index")]
      IndexBackendKind::Centroid => Some(Arc::new(CentroidBackend::from_config(config))),
      #[cfg(not(feature = "index"))]
      kind => {
         tracing::warn!("index backend {kind:?} requested but the `index` feature is disabled");
         None
      },
   }
}

/// Backend kinds compiled into this build.
pub const fn available_backends() -> &'static [IndexBackendKind] {
   #[cfg(feature = "index")]
   {
      &[IndexBackendKind::Flat, IndexBackendKind::Centroid]
   }
   #[cfg(not(feature = "index"))]
   {
      &[]
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn none_backend_is_absent() {
      assert!(backend_for(&IndexConfig::default()).is_none());
   }

   #[cfg(feature = "index")]
   #[test]
   fn configured_backends_resolve() {
      let flat = IndexConfig { backend: IndexBackendKind::Flat, ..IndexConfig::default() };
      assert_eq!(backend_for(&flat).unwrap().name(), "flat");

      let centroid = IndexConfig { backend: IndexBackendKind::Centroid, ..IndexConfig::default() };
      assert_eq!(backend_for(&centroid).unwrap().name(), "centroid");
      assert_eq!(available_backends().len(), 2);
   }
}
