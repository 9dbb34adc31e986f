use thiserror::Error;

/// Errors surfaced by scoring, batching, indexing and preprocessing.
///
/// Every variant is fatal to the call that produced it; no partial score
/// matrix is ever returned alongside an error.
#[derive(Debug, Error)]
pub enum ScoreError {
   #[error("no {what} provided")]
   EmptyInput { what: &'static str },

   #[error("dimension mismatch: expected {expected}, found {found} (item {index})")]
   DimensionMismatch { expected: usize, found: usize, index: usize },

   #[error("approximate index backend unavailable: {0}")]
   BackendUnavailable(String),

   #[error("single-vector scoring requires sequence length 1, item {index} has {len}")]
   NotSingleVector { index: usize, len: usize },

   #[error("batch size must be positive, got {0}")]
   InvalidBatchSize(usize),

   #[error("top-k requires k > 0")]
   InvalidTopK,

   #[error("malformed embedding data: {0}")]
   Shape(String),

   #[error("invalid device: {0}")]
   InvalidDevice(String),

   #[error("index backend broke its contract: {0}")]
   IndexContract(String),

   #[error("tensor operation failed: {0}")]
   Tensor(#[from] candle_core::Error),

   #[error("configuration error: {0}")]
   Config(#[from] Box<figment::Error>),

   #[error("processor error: {0}")]
   Processor(String),
}

impl From<figment::Error> for ScoreError {
   fn from(err: figment::Error) -> Self {
      Self::Config(Box::new(err))
   }
}

impl From<ndarray::ShapeError> for ScoreError {
   fn from(err: ndarray::ShapeError) -> Self {
      Self::Shape(err.to_string())
   }
}

impl ScoreError {
   /// Whether the caller can fall back to exact scoring.
   pub const fn is_backend_unavailable(&self) -> bool {
      matches!(self, Self::BackendUnavailable(_))
   }
}

pub type Result<T> = std::result::Result<T, ScoreError>;
