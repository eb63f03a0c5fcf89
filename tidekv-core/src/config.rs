//! # Configuration Management
//!
//! Handles all configuration for tidekv components. The storage engine only
//! ever sees a [`StorageConfig`] value; reading one from disk is left to the
//! binary that embeds it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).map_err(|e| Error::Configuration {
            message: format!("invalid TOML: {}", e),
        })?;
        config.storage.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading config {}", path.display()), e))?;
        Self::from_toml_str(&text)
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `<id>.sst` files and the `manifest`
    pub data_dir: PathBuf,
    /// Active memtable is frozen once its payload exceeds this
    pub memtable_max_bytes: usize,
    /// Target payload of one SST data block
    pub block_max_bytes: usize,
    pub bloom_false_positive_rate: f64,
    /// Compaction budget per level; the length caps the cascade
    pub level_max_bytes: Vec<u64>,
    /// Rewrite the manifest file before publishing every new version
    pub persist_manifest_on_publish: bool,
    /// Unlink SST files once compaction has superseded them
    pub reclaim_obsolete_tables: bool,
    /// Seed for skip-list heights and bloom seeds (entropy when unset)
    pub rng_seed: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            memtable_max_bytes: 3 * 1024 * 1024, // 3MB
            block_max_bytes: 4 * 1024 * 1024,    // 4MB
            bloom_false_positive_rate: 0.01,
            level_max_bytes: vec![
                1024,
                10 * 1024 * 1024,
                100 * 1024 * 1024,
                1000 * 1024 * 1024,
                10000 * 1024 * 1024,
            ],
            persist_manifest_on_publish: true,
            reclaim_obsolete_tables: true,
            rng_seed: None,
        }
    }
}

impl StorageConfig {
    /// Create a new config rooted at the given directory
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable freeze threshold
    pub fn memtable_max_bytes(mut self, bytes: usize) -> Self {
        self.memtable_max_bytes = bytes;
        self
    }

    /// Set the data block payload target
    pub fn block_max_bytes(mut self, bytes: usize) -> Self {
        self.block_max_bytes = bytes;
        self
    }

    /// Set per-level compaction budgets
    pub fn level_max_bytes(mut self, budgets: Vec<u64>) -> Self {
        self.level_max_bytes = budgets;
        self
    }

    /// Seed the random source
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Keep or reclaim superseded SST files
    pub fn reclaim_obsolete_tables(mut self, enabled: bool) -> Self {
        self.reclaim_obsolete_tables = enabled;
        self
    }

    pub fn persist_manifest_on_publish(mut self, enabled: bool) -> Self {
        self.persist_manifest_on_publish = enabled;
        self
    }

    /// Check invariants the engine relies on
    pub fn validate(&self) -> Result<()> {
        if self.memtable_max_bytes == 0 {
            return Err(Error::Configuration {
                message: "memtable_max_bytes must be greater than zero".to_string(),
            });
        }
        if self.block_max_bytes == 0 {
            return Err(Error::Configuration {
                message: "block_max_bytes must be greater than zero".to_string(),
            });
        }
        let p = self.bloom_false_positive_rate;
        if !(p > 0.0 && p < 1.0) {
            return Err(Error::Configuration {
                message: format!("bloom_false_positive_rate must be in (0, 1), got {}", p),
            });
        }
        if self.level_max_bytes.is_empty() {
            return Err(Error::Configuration {
                message: "level_max_bytes needs at least one level".to_string(),
            });
        }
        if self.level_max_bytes.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Configuration {
                message: "level_max_bytes must be strictly increasing".to_string(),
            });
        }
        Ok(())
    }
}
