use tracing_subscriber::{EnvFilter, fmt};

/// Installs a global fmt subscriber filtered by `COLSCORE_LOG`, then
/// `RUST_LOG`, then `info`. Calling it again is a no-op.
pub fn init() {
   let filter = EnvFilter::try_from_env("COLSCORE_LOG")
      .or_else(|_| EnvFilter::try_from_default_env())
      .unwrap_or_else(|_| EnvFilter::new("info"));

   let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
