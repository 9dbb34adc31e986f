//! Centroid-pruned index in the style of PLAID.
//!
//! Every passage token is assigned to one of `n_centroids` k-means centroids;
//! an inverted list maps each centroid to the passages that own a token in it.
//! A query probes the `n_probe` closest centroids of each of its tokens, takes
//! the union of their passages as candidates and reranks those candidates with
//! exact `MaxSim`. Passages that own no token near any query token are never
//! scored, which is where both the speedup and the approximation come from.

use std::collections::BTreeSet;

use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

use crate::{
   batch::PaddedBatch,
   config::{IndexConfig, debug_index},
   error::Result,
   index::{ApproximateIndex, IndexBackend},
   score::maxsim::{max_sim, squared_l2},
   types::{RankedHit, rank_hits},
};

/// Builds [`CentroidIndex`]es.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CentroidBackend {
   pub n_centroids:  usize,
   pub n_probe:      usize,
   pub kmeans_iters: usize,
}

impl CentroidBackend {
   pub const fn new(n_centroids: usize, n_probe: usize, kmeans_iters: usize) -> Self {
      Self { n_centroids, n_probe, kmeans_iters }
   }

   pub const fn from_config(config: &IndexConfig) -> Self {
      Self::new(config.n_centroids, config.n_probe, config.kmeans_iters)
   }
}

impl Default for CentroidBackend {
   fn default() -> Self {
      Self::from_config(&IndexConfig::default())
   }
}

impl IndexBackend for CentroidBackend {
   fn name(&self) -> &'static str {
      "centroid"
   }

   fn build(&self, documents: Vec<Array2<f32>>) -> Result<Box<dyn ApproximateIndex>> {
      let dim = documents.first().map_or(0, |d| d.ncols());
      let total: usize = documents.iter().map(|d| d.nrows()).sum();

      let mut data = Vec::with_capacity(total * dim);
      let mut owners = Vec::with_capacity(total);
      for (doc_id, doc) in documents.iter().enumerate() {
         for row in doc.rows() {
            data.extend(row.iter().copied());
            owners.push(doc_id);
         }
      }
      let tokens = Array2::from_shape_vec((total, dim), data)?;

      let n_centroids = self.n_centroids.clamp(1, total.max(1));
      let centroids = if total == 0 {
         Array2::zeros((0, dim))
      } else {
         kmeans(&tokens, n_centroids, self.kmeans_iters)
      };

      // Tokens are visited in passage order, so each list comes out sorted
      // and consecutive duplicates are the only duplicates.
      let mut lists = vec![Vec::new(); centroids.nrows()];
      for (token, centroid) in assign(&tokens, &centroids).into_iter().enumerate() {
         lists[centroid].push(owners[token]);
      }
      for list in &mut lists {
         list.dedup();
      }

      if debug_index() {
         let largest = lists.iter().map(Vec::len).max().unwrap_or(0);
         tracing::debug!(
            "centroid index: {} tokens, {} centroids, largest list {largest}",
            total,
            centroids.nrows()
         );
      }

      Ok(Box::new(CentroidIndex {
         documents,
         centroids,
         lists,
         dim,
         n_probe: self.n_probe.max(1),
      }))
   }
}

/// Passages plus centroid inverted lists.
#[derive(Debug)]
pub struct CentroidIndex {
   documents: Vec<Array2<f32>>,
   centroids: Array2<f32>,
   lists:     Vec<Vec<usize>>,
   dim:       usize,
   n_probe:   usize,
}

impl CentroidIndex {
   pub fn n_centroids(&self) -> usize {
      self.centroids.nrows()
   }

   /// Passages owning a token in any centroid probed by `query`.
   fn candidates(&self, query: &Array2<f32>) -> BTreeSet<usize> {
      let mut candidates = BTreeSet::new();
      for token in query.rows() {
         for centroid in nearest(token, &self.centroids, self.n_probe) {
            candidates.extend(self.lists[centroid].iter().copied());
         }
      }
      candidates
   }

   fn search_one(&self, query: &Array2<f32>, k: usize) -> Vec<RankedHit> {
      let candidates: Vec<usize> = self.candidates(query).into_iter().collect();
      if debug_index() {
         tracing::debug!("centroid search: {} of {} passages probed", candidates.len(), self.len());
      }

      let mut hits: Vec<RankedHit> = candidates
         .par_iter()
         .map(|&passage_id| RankedHit {
            passage_id,
            score: max_sim(query.view(), self.documents[passage_id].view()),
         })
         .collect();
      rank_hits(&mut hits, k);
      hits
   }
}

impl ApproximateIndex for CentroidIndex {
   fn len(&self) -> usize {
      self.documents.len()
   }

   fn dim(&self) -> usize {
      self.dim
   }

   fn search(&self, queries: &PaddedBatch, k: usize) -> Result<Vec<Vec<RankedHit>>> {
      let queries = queries.to_host()?;
      Ok(queries.iter().map(|q| self.search_one(q, k)).collect())
   }
}

/// Indices of the `n` centroids closest to `token`, closest first.
fn nearest(token: ArrayView1<'_, f32>, centroids: &Array2<f32>, n: usize) -> Vec<usize> {
   let mut distances: Vec<(usize, f32)> = centroids
      .rows()
      .into_iter()
      .enumerate()
      .map(|(i, c)| (i, squared_l2(token, c)))
      .collect();
   distances.sort_by(|a, b| {
      a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.cmp(&b.0))
   });
   distances.truncate(n);
   distances.into_iter().map(|(i, _)| i).collect()
}

fn assign(tokens: &Array2<f32>, centroids: &Array2<f32>) -> Vec<usize> {
   if centroids.nrows() == 0 {
      return Vec::new();
   }
   (0..tokens.nrows())
      .into_par_iter()
      .map(|t| nearest(tokens.row(t), centroids, 1)[0])
      .collect()
}

/// Lloyd's k-means seeded with evenly spaced tokens, so builds are
/// deterministic. Empty clusters keep their previous centroid.
fn kmeans(tokens: &Array2<f32>, k: usize, iters: usize) -> Array2<f32> {
   let (n, dim) = tokens.dim();
   let mut centroids = Array2::zeros((k, dim));
   for c in 0..k {
      centroids.row_mut(c).assign(&tokens.row(c * n / k));
   }

   for _ in 0..iters {
      let assignments = assign(tokens, &centroids);
      let mut sums = Array2::<f32>::zeros((k, dim));
      let mut counts = vec![0usize; k];
      for (t, &c) in assignments.iter().enumerate() {
         let mut sum = sums.row_mut(c);
         sum += &tokens.row(t);
         counts[c] += 1;
      }
      for (c, &count) in counts.iter().enumerate() {
         if count > 0 {
            let mean = sums.row(c).mapv(|v| v / count as f32);
            centroids.row_mut(c).assign(&mean);
         }
      }
   }

   centroids
}
