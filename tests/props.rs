use colscore::{Embedding, PaddingMode, ScoringConfig, ScoringEngine, score::maxsim::max_sim};
use proptest::prelude::*;

const DIM: usize = 4;

fn embedding() -> impl Strategy<Value = Embedding> {
   (1usize..6)
      .prop_flat_map(|len| prop::collection::vec(-1.0f32..1.0, len * DIM))
      .prop_map(|data| Embedding::from_flat(data, DIM).unwrap())
}

fn masked_engine() -> ScoringEngine {
   ScoringEngine::new(ScoringConfig { padding: PaddingMode::Masked, ..ScoringConfig::cpu() })
      .unwrap()
}

proptest! {
   #![proptest_config(ProptestConfig::with_cases(48))]

   #[test]
   fn masked_scores_are_batch_invariant(
      queries in prop::collection::vec(embedding(), 1..6),
      passages in prop::collection::vec(embedding(), 1..8),
      batch_size in 1usize..5,
   ) {
      let engine = masked_engine();
      let tiled = engine.score_multi_with_batch_size(&queries, &passages, batch_size).unwrap();
      let whole = engine.score_multi_with_batch_size(&queries, &passages, 128).unwrap();
      for (a, b) in tiled.iter().zip(whole.iter()) {
         prop_assert!((a - b).abs() < 1e-4, "{a} vs {b}");
      }
   }

   #[test]
   fn masked_scores_match_host_maxsim(
      queries in prop::collection::vec(embedding(), 1..4),
      passages in prop::collection::vec(embedding(), 1..5),
   ) {
      let scores = masked_engine().score_multi(&queries, &passages).unwrap();
      prop_assert_eq!(scores.shape(), &[queries.len(), passages.len()]);
      for (i, q) in queries.iter().enumerate() {
         for (j, p) in passages.iter().enumerate() {
            let expected = max_sim(q.view(), p.view());
            prop_assert!((scores[[i, j]] - expected).abs() < 1e-4);
         }
      }
   }
}
