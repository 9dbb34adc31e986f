#![allow(dead_code, reason = "shared by several test binaries")]

use colscore::{Embedding, ScoringConfig, ScoringEngine};

/// Deterministic xorshift stream in `[lo, hi)`.
pub struct XorShift(u64);

impl XorShift {
   pub const fn new(seed: u64) -> Self {
      Self(seed | 1)
   }

   pub fn next_f32(&mut self, lo: f32, hi: f32) -> f32 {
      self.0 ^= self.0 << 13;
      self.0 ^= self.0 >> 7;
      self.0 ^= self.0 << 17;
      let unit = (self.0 >> 40) as f32 / (1u64 << 24) as f32;
      lo + (hi - lo) * unit
   }

   pub fn next_len(&mut self, min: usize, max: usize) -> usize {
      min + (self.next_f32(0.0, 1.0) * (max - min + 1) as f32) as usize % (max - min + 1)
   }
}

/// `n` embeddings with lengths in `min_len..=max_len` and values in `[lo, hi)`.
pub fn corpus(
   rng: &mut XorShift,
   n: usize,
   min_len: usize,
   max_len: usize,
   dim: usize,
   (lo, hi): (f32, f32),
) -> Vec<Embedding> {
   (0..n)
      .map(|_| {
         let len = rng.next_len(min_len, max_len);
         let data = (0..len * dim).map(|_| rng.next_f32(lo, hi)).collect();
         Embedding::from_flat(data, dim).unwrap()
      })
      .collect()
}

pub fn cpu_engine() -> ScoringEngine {
   ScoringEngine::new(ScoringConfig::cpu()).unwrap()
}

pub fn emb(rows: &[&[f32]]) -> Embedding {
   Embedding::from_rows(&rows.iter().map(|r| r.to_vec()).collect::<Vec<_>>()).unwrap()
}
