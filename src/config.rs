use std::{fmt, path::Path, str::FromStr};

use candle_core::{DType, Device};
use figment::{
   Figment,
   providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScoreError};

pub const DEFAULT_BATCH_SIZE: usize = 128;

pub const DEFAULT_N_CENTROIDS: usize = 64;
pub const DEFAULT_N_PROBE: usize = 4;
pub const DEFAULT_KMEANS_ITERS: usize = 8;

pub const ENV_PREFIX: &str = "COLSCORE_";

/// Compute device request, resolved once per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceSpec {
   /// CUDA 0, then Metal 0, then CPU.
   #[default]
   Auto,
   Cpu,
   Cuda(usize),
   Metal(usize),
}

impl DeviceSpec {
   pub fn resolve(self) -> Result<Device> {
      let device = match self {
         Self::Auto => {
            if candle_core::utils::cuda_is_available() {
               Device::new_cuda(0)?
            } else if candle_core::utils::metal_is_available() {
               Device::new_metal(0)?
            } else {
               Device::Cpu
            }
         },
         Self::Cpu => Device::Cpu,
         Self::Cuda(ordinal) => Device::new_cuda(ordinal)?,
         Self::Metal(ordinal) => Device::new_metal(ordinal)?,
      };

      tracing::info!("resolved compute device {self} -> {:?}", device);
      Ok(device)
   }
}

impl fmt::Display for DeviceSpec {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         Self::Auto => f.write_str("auto"),
         Self::Cpu => f.write_str("cpu"),
         Self::Cuda(n) => write!(f, "cuda:{n}"),
         Self::Metal(n) => write!(f, "metal:{n}"),
      }
   }
}

impl FromStr for DeviceSpec {
   type Err = ScoreError;

   fn from_str(s: &str) -> Result<Self> {
      let s = s.trim().to_ascii_lowercase();
      let (kind, ordinal) = match s.split_once(':') {
         Some((kind, ordinal)) => {
            let ordinal = ordinal
               .parse()
               .map_err(|_| ScoreError::InvalidDevice(format!("bad ordinal in {s:?}")))?;
            (kind.to_string(), ordinal)
         },
         None => (s.clone(), 0),
      };

      match kind.as_str() {
         "auto" => Ok(Self::Auto),
         "cpu" => Ok(Self::Cpu),
         "cuda" | "gpu" => Ok(Self::Cuda(ordinal)),
         "metal" | "mps" => Ok(Self::Metal(ordinal)),
         _ => Err(ScoreError::InvalidDevice(format!("unknown device {s:?}"))),
      }
   }
}

impl TryFrom<String> for DeviceSpec {
   type Error = ScoreError;

   fn try_from(value: String) -> Result<Self> {
      value.parse()
   }
}

impl From<DeviceSpec> for String {
   fn from(spec: DeviceSpec) -> Self {
      spec.to_string()
   }
}

/// How padded positions take part in the MaxSim reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
   /// Padded rows and columns are ordinary zero vectors.
   #[default]
   Unmasked,
   /// Padded passage tokens are excluded from the max, padded query tokens
   /// from the sum.
   Masked,
}

/// Internal compute precision. Scores are always returned as `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
   #[default]
   F32,
   F16,
   Bf16,
}

impl Precision {
   pub const fn dtype(self) -> DType {
      match self {
         Self::F32 => DType::F32,
         Self::F16 => DType::F16,
         Self::Bf16 => DType::BF16,
      }
   }
}

/// Which approximate-index backend the engine is wired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackendKind {
   #[default]
   None,
   Flat,
   Centroid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
   pub backend:      IndexBackendKind,
   /// Number of k-means centroids for the centroid backend.
   pub n_centroids:  usize,
   /// Centroids probed per query token.
   pub n_probe:      usize,
   pub kmeans_iters: usize,
}

impl Default for IndexConfig {
   fn default() -> Self {
      Self {
         backend:      IndexBackendKind::None,
         n_centroids:  DEFAULT_N_CENTROIDS,
         n_probe:      DEFAULT_N_PROBE,
         kmeans_iters: DEFAULT_KMEANS_ITERS,
      }
   }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
   pub device:     DeviceSpec,
   pub batch_size: usize,
   pub padding:    PaddingMode,
   pub precision:  Precision,
   pub index:      IndexConfig,
}

impl Default for ScoringConfig {
   fn default() -> Self {
      Self {
         device:     DeviceSpec::Auto,
         batch_size: DEFAULT_BATCH_SIZE,
         padding:    PaddingMode::Unmasked,
         precision:  Precision::F32,
         index:      IndexConfig::default(),
      }
   }
}

impl ScoringConfig {
   /// Defaults, then the optional TOML file, then `COLSCORE_*` variables
   /// (nested keys use `__`, e.g. `COLSCORE_INDEX__BACKEND=flat`).
   pub fn load(path: Option<&Path>) -> Result<Self> {
      let mut figment = Figment::from(Serialized::defaults(Self::default()));
      if let Some(path) = path {
         figment = figment.merge(Toml::file(path));
      }
      let config: Self = figment.merge(Env::prefixed(ENV_PREFIX).split("__")).extract()?;
      config.validate()?;
      Ok(config)
   }

   pub fn validate(&self) -> Result<()> {
      if self.batch_size == 0 {
         return Err(ScoreError::InvalidBatchSize(self.batch_size));
      }
      Ok(())
   }

   /// CPU-only defaults, used by tests and deterministic tooling.
   pub fn cpu() -> Self {
      Self { device: DeviceSpec::Cpu, ..Self::default() }
   }
}

fn env_flag(name: &str) -> bool {
   std::env::var(name)
      .ok()
      .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
      .unwrap_or(false)
}

pub fn debug_scoring() -> bool {
   env_flag("COLSCORE_DEBUG_SCORING")
}

pub fn debug_index() -> bool {
   env_flag("COLSCORE_DEBUG_INDEX")
}

#[cfg(test)]
mod tests {
   use std::io::Write;

   use tempfile::NamedTempFile;

   use super::*;

   #[test]
   fn device_spec_parses() {
      assert_eq!("auto".parse::<DeviceSpec>().unwrap(), DeviceSpec::Auto);
      assert_eq!("CPU".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cpu);
      assert_eq!("cuda:1".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(1));
      assert_eq!("cuda".parse::<DeviceSpec>().unwrap(), DeviceSpec::Cuda(0));
      assert_eq!("mps".parse::<DeviceSpec>().unwrap(), DeviceSpec::Metal(0));
      assert!(matches!("tpu".parse::<DeviceSpec>(), Err(ScoreError::InvalidDevice(_))));
      assert!(matches!("cuda:x".parse::<DeviceSpec>(), Err(ScoreError::InvalidDevice(_))));
   }

   #[test]
   fn device_spec_display_roundtrips() {
      for spec in [DeviceSpec::Auto, DeviceSpec::Cpu, DeviceSpec::Cuda(2), DeviceSpec::Metal(0)] {
         assert_eq!(spec.to_string().parse::<DeviceSpec>().unwrap(), spec);
      }
   }

   #[test]
   fn cpu_resolves() {
      assert!(DeviceSpec::Cpu.resolve().unwrap().is_cpu());
   }

   fn load(path: Option<&Path>) -> std::result::Result<ScoringConfig, figment::Error> {
      ScoringConfig::load(path).map_err(|e| figment::Error::from(e.to_string()))
   }

   // Loads run inside a `Jail` so environment overrides set by one test never
   // leak into another.
   #[test]
   fn load_from_toml_file() {
      figment::Jail::expect_with(|_jail| {
         let mut file = NamedTempFile::new().map_err(|e| e.to_string())?;
         writeln!(
            file,
            "device = \"cpu\"\nbatch_size = 16\npadding = \"masked\"\n\n[index]\nbackend = \"centroid\"\nn_probe = 2"
         )
         .map_err(|e| e.to_string())?;

         let config = load(Some(file.path()))?;
         assert_eq!(config.device, DeviceSpec::Cpu);
         assert_eq!(config.batch_size, 16);
         assert_eq!(config.padding, PaddingMode::Masked);
         assert_eq!(config.precision, Precision::F32);
         assert_eq!(config.index.backend, IndexBackendKind::Centroid);
         assert_eq!(config.index.n_probe, 2);
         assert_eq!(config.index.n_centroids, DEFAULT_N_CENTROIDS);
         Ok(())
      });
   }

   #[test]
   fn environment_overrides_toml() {
      figment::Jail::expect_with(|jail| {
         jail.create_file(
            "colscore.toml",
            "batch_size = 16\nprecision = \"f16\"\n\n[index]\nbackend = \"centroid\"\nn_probe = 2",
         )?;
         jail.set_env("COLSCORE_BATCH_SIZE", "7");
         jail.set_env("COLSCORE_INDEX__BACKEND", "flat");
         jail.set_env("COLSCORE_DEVICE", "cpu");

         let config = load(Some(Path::new("colscore.toml")))?;
         assert_eq!(config.batch_size, 7);
         assert_eq!(config.index.backend, IndexBackendKind::Flat);
         assert_eq!(config.device, DeviceSpec::Cpu);
         // Keys the environment leaves alone keep their file values.
         assert_eq!(config.precision, Precision::F16);
         assert_eq!(config.index.n_probe, 2);

         let config = load(None)?;
         assert_eq!(config.batch_size, 7);
         assert_eq!(config.precision, Precision::F32);
         Ok(())
      });
   }

   #[test]
   fn invalid_environment_device_is_rejected() {
      figment::Jail::expect_with(|jail| {
         jail.set_env("COLSCORE_DEVICE", "tpu");
         assert!(matches!(ScoringConfig::load(None), Err(ScoreError::Config(_))));
         Ok(())
      });
   }

   #[test]
   fn zero_batch_size_is_rejected() {
      figment::Jail::expect_with(|jail| {
         jail.create_file("colscore.toml", "batch_size = 0")?;
         assert!(matches!(
            ScoringConfig::load(Some(Path::new("colscore.toml"))),
            Err(ScoreError::InvalidBatchSize(0))
         ));
         Ok(())
      });
   }

   #[test]
   fn defaults_match_constants() {
      let config = ScoringConfig::default();
      assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
      assert_eq!(config.padding, PaddingMode::Unmasked);
      assert_eq!(config.index.backend, IndexBackendKind::None);
   }
}
