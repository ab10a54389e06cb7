//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hard memory cap (in bytes) shared by bag materialization and sorts.
    pub mem_cap_bytes: usize,

    /// Bucket count for shuffles that do not declare `parallel N`.
    pub default_parallelism: usize,

    /// Seed for the order range sampler and the skewed-join key sampler.
    pub seed: u64,

    /// Rows drawn per sampling pass.
    pub sample_size: usize,

    /// Share of sampled rows above which a join key is treated as heavy.
    pub skew_threshold: f64,

    /// Rows a group bag keeps in memory before paging to spill storage.
    pub bag_spill_rows: usize,

    /// Directory for spill files.
    pub spill_dir: String,

    /// Spill segment compression: `none`, `zstd` or `lz4`.
    pub spill_codec: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mem_cap_bytes: 512 * 1024 * 1024, // 512 MiB default
            default_parallelism: 2,
            seed: 0x5eed,
            sample_size: 100,
            skew_threshold: 0.25,
            bag_spill_rows: 10_000,
            spill_dir: "/tmp/dagrel-spill".to_string(),
            spill_codec: "none".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `DAGREL_MEM_CAP_BYTES`: memory cap in bytes
    /// - `DAGREL_PARALLELISM`: default shuffle bucket count
    /// - `DAGREL_SEED`: sampling seed
    /// - `DAGREL_SAMPLE_SIZE`: rows per sampling pass
    /// - `DAGREL_SKEW_THRESHOLD`: heavy-key share (0..1)
    /// - `DAGREL_BAG_SPILL_ROWS`: in-memory rows per bag
    /// - `DAGREL_SPILL_DIR`, `DAGREL_SPILL_CODEC`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_parse("DAGREL_MEM_CAP_BYTES") {
            cfg.mem_cap_bytes = v;
        }
        if let Some(v) = env_parse("DAGREL_PARALLELISM") {
            cfg.default_parallelism = v;
        }
        if let Some(v) = env_parse("DAGREL_SEED") {
            cfg.seed = v;
        }
        if let Some(v) = env_parse("DAGREL_SAMPLE_SIZE") {
            cfg.sample_size = v;
        }
        if let Some(v) = env_parse("DAGREL_SKEW_THRESHOLD") {
            cfg.skew_threshold = v;
        }
        if let Some(v) = env_parse("DAGREL_BAG_SPILL_ROWS") {
            cfg.bag_spill_rows = v;
        }
        if let Ok(s) = std::env::var("DAGREL_SPILL_DIR") {
            cfg.spill_dir = s;
        }
        if let Ok(s) = std::env::var("DAGREL_SPILL_CODEC") {
            cfg.spill_codec = s;
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_parallelism == 0 {
            return Err(Error::Config("default_parallelism must be >= 1".into()));
        }
        if self.sample_size == 0 {
            return Err(Error::Config("sample_size must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.skew_threshold) {
            return Err(Error::Config(format!(
                "skew_threshold must be within 0..=1, got {}",
                self.skew_threshold
            )));
        }
        if self.bag_spill_rows == 0 {
            return Err(Error::Config("bag_spill_rows must be >= 1".into()));
        }
        if !matches!(self.spill_codec.as_str(), "none" | "zstd" | "lz4") {
            return Err(Error::Config(format!(
                "unknown spill codec '{}'",
                self.spill_codec
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let cfg: EngineConfig = serde_yaml::from_str("default_parallelism: 4\nseed: 7\n").unwrap();
        assert_eq!(cfg.default_parallelism, 4);
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.sample_size, EngineConfig::default().sample_size);
    }

    #[test]
    fn rejects_bad_values() {
        let cfg = EngineConfig {
            skew_threshold: 2.0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
        let cfg = EngineConfig {
            spill_codec: "snappy".into(),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
