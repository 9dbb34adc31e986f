//! Host-side `MaxSim` on `ndarray` matrices, used by the index backends to
//! score candidates without going through the tensor runtime.

use ndarray::{ArrayView1, ArrayView2};

/// Computes `MaxSim` score between query and document token matrices.
///
/// For each query token, finds the maximum dot product with any document token
/// and sums these maxima. Only real tokens should be passed in; there is no
/// padding handling here.
pub fn max_sim(query: ArrayView2<'_, f32>, doc: ArrayView2<'_, f32>) -> f32 {
   if query.is_empty() || doc.is_empty() {
      return 0.0;
   }

   debug_assert_eq!(query.ncols(), doc.ncols(), "dimension mismatch");

   // (Lq, D) x (D, Ld) -> (Lq, Ld)
   let sims = query.dot(&doc.t());
   sims
      .rows()
      .into_iter()
      .map(|row| row.fold(f32::NEG_INFINITY, |max, &v| max.max(v)))
      .sum()
}

/// Squared euclidean distance between two equal-length vectors.
#[inline]
pub fn squared_l2(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
   debug_assert_eq!(a.len(), b.len(), "distance requires equal-length vectors");
   a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
   use ndarray::{Array2, array};

   use super::*;

   #[test]
   fn test_max_sim() {
      let query = array![[1.0f32, 0.0], [0.0, 1.0]];
      let doc = array![[0.9f32, 0.1], [0.1, 0.9]];
      let score = max_sim(query.view(), doc.view());
      assert!((score - 1.8).abs() < 1e-6);
   }

   #[test]
   fn test_max_sim_picks_best_token() {
      let query = array![[1.0f32, 0.0]];
      let doc = array![[0.5f32, 0.0], [0.9, 0.0], [0.1, 0.0]];
      assert!((max_sim(query.view(), doc.view()) - 0.9).abs() < 1e-6);
   }

   #[test]
   fn test_max_sim_negative_similarities() {
      // All similarities negative: no zero floor on the host path.
      let query = array![[1.0f32, 0.0]];
      let doc = array![[-0.5f32, 0.0], [-0.2, 0.0]];
      assert!((max_sim(query.view(), doc.view()) + 0.2).abs() < 1e-6);
   }

   #[test]
   fn test_max_sim_empty() {
      let query = Array2::<f32>::zeros((0, 2));
      let doc = array![[1.0f32, 0.0]];
      assert_eq!(max_sim(query.view(), doc.view()), 0.0);
   }

   #[test]
   fn test_squared_l2() {
      let a = array![1.0f32, 2.0];
      let b = array![4.0f32, 6.0];
      assert!((squared_l2(a.view(), b.view()) - 25.0).abs() < 1e-6);
   }
}
