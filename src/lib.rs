//! Similarity scoring for visual document retrieval.
//!
//! Queries and page images are embedded elsewhere, either as one vector per
//! item or as one vector per token/patch. This crate scores them:
//!
//! - [`ScoringEngine::score_single`]: dense dot products,
//! - [`ScoringEngine::score_multi`]: late interaction (`MaxSim`), tiled into
//!   batches to bound device memory,
//! - [`ScoringEngine::build_index`] / [`ScoringEngine::topk_via_index`]: top-k
//!   through an approximate index backend.
//!
//! ```no_run
//! use colscore::{Embedding, ScoringConfig, ScoringEngine};
//!
//! let engine = ScoringEngine::new(ScoringConfig::cpu())?;
//! let queries = vec![Embedding::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]])?];
//! let pages = vec![Embedding::from_rows(&[vec![0.9, 0.1], vec![0.1, 0.9]])?];
//! let scores = engine.score_multi(&queries, &pages)?;
//! assert_eq!(scores.shape(), &[1, 1]);
//! # Ok::<(), colscore::ScoreError>(())
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod index;
pub mod logging;
pub mod processor;
pub mod score;
pub mod types;

pub use batch::PaddedBatch;
pub use config::{DeviceSpec, IndexBackendKind, IndexConfig, PaddingMode, Precision, ScoringConfig};
pub use error::{Result, ScoreError};
pub use index::{ApproximateIndex, IndexBackend};
pub use processor::{ProcessorBatch, RgbImage, VisualProcessor};
pub use score::ScoringEngine;
pub use types::{Embedding, EmbeddingArity, PatchGrid, RankedHit, ScoreMatrix};
