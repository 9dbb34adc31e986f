//! Exhaustive index: exact `MaxSim` against every stored passage.

use ndarray::Array2;
use rayon::prelude::*;

use crate::{
   batch::PaddedBatch,
   config::debug_index,
   error::Result,
   index::{ApproximateIndex, IndexBackend},
   score::maxsim::max_sim,
   types::{RankedHit, rank_hits},
};

/// Builds [`FlatIndex`]es.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatBackend;

impl IndexBackend for FlatBackend {
   fn name(&self) -> &'static str {
      "flat"
   }

   fn build(&self, documents: Vec<Array2<f32>>) -> Result<Box<dyn ApproximateIndex>> {
      let dim = documents.first().map_or(0, |d| d.ncols());
      Ok(Box::new(FlatIndex { documents, dim }))
   }
}

/// Stores every passage and scores all of them per query.
#[derive(Debug)]
pub struct FlatIndex {
   documents: Vec<Array2<f32>>,
   dim:       usize,
}

impl FlatIndex {
   fn search_one(&self, query: &Array2<f32>, k: usize) -> Vec<RankedHit> {
      let mut hits: Vec<RankedHit> = self
         .documents
         .par_iter()
         .enumerate()
         .map(|(passage_id, doc)| RankedHit { passage_id, score: max_sim(query.view(), doc.view()) })
         .collect();
      rank_hits(&mut hits, k);
      hits
   }
}

impl ApproximateIndex for FlatIndex {
   fn len(&self) -> usize {
      self.documents.len()
   }

   fn dim(&self) -> usize {
      self.dim
   }

   fn search(&self, queries: &PaddedBatch, k: usize) -> Result<Vec<Vec<RankedHit>>> {
      let queries = queries.to_host()?;
      if debug_index() {
         tracing::debug!("flat search: {} queries over {} passages", queries.len(), self.len());
      }
      Ok(queries.iter().map(|q| self.search_one(q, k)).collect())
   }
}
