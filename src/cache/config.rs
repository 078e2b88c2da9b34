//! Cache Configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::shard::accounted_size;
use super::{
    DEFAULT_ADMISSION_WINDOW_SECS, DEFAULT_BUCKETS_PER_SHARD, DEFAULT_MAX_BYTES,
    DEFAULT_MAX_OBJECT_BYTES, DEFAULT_SHARD_COUNT, DEFAULT_TTL_SECS,
};
use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Total byte budget across all shards
    pub max_bytes: u64,
    /// TTL applied when a put passes 0
    pub default_ttl_secs: u64,
    /// Second request must arrive within this many seconds to be admitted
    pub admission_window_secs: u64,
    /// Largest body accepted by `put`
    pub max_object_bytes: usize,
    /// Number of shards (power of two)
    pub shard_count: usize,
    /// Hash buckets per shard
    pub buckets_per_shard: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            default_ttl_secs: DEFAULT_TTL_SECS,
            admission_window_secs: DEFAULT_ADMISSION_WINDOW_SECS,
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
            shard_count: DEFAULT_SHARD_COUNT,
            buckets_per_shard: DEFAULT_BUCKETS_PER_SHARD,
        }
    }
}

impl CacheConfig {
    /// Configuration with the three tunables; 0 selects the default
    pub fn new(max_bytes: u64, default_ttl_secs: u64, admission_window_secs: u64) -> Self {
        Self {
            max_bytes,
            default_ttl_secs,
            admission_window_secs,
            ..Default::default()
        }
        .normalized()
    }

    /// Replace zero budget, TTL and window with their defaults
    pub fn normalized(mut self) -> Self {
        if self.max_bytes == 0 {
            self.max_bytes = DEFAULT_MAX_BYTES;
        }
        if self.default_ttl_secs == 0 {
            self.default_ttl_secs = DEFAULT_TTL_SECS;
        }
        if self.admission_window_secs == 0 {
            self.admission_window_secs = DEFAULT_ADMISSION_WINDOW_SECS;
        }
        self
    }

    /// Per-shard byte budget
    pub fn shard_budget(&self) -> u64 {
        self.max_bytes / self.shard_count.max(1) as u64
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 || !self.shard_count.is_power_of_two() {
            return Err(Error::Config(format!(
                "shard_count must be a power of two, got {}",
                self.shard_count
            )));
        }
        if self.buckets_per_shard == 0 {
            return Err(Error::Config("buckets_per_shard must be > 0".into()));
        }
        if self.max_object_bytes == 0 {
            return Err(Error::Config("max_object_bytes must be > 0".into()));
        }
        if self.shard_budget() == 0 {
            return Err(Error::Config(format!(
                "max_bytes {} is smaller than shard_count {}",
                self.max_bytes, self.shard_count
            )));
        }
        if self.shard_budget() < accounted_size(self.max_object_bytes) {
            warn!(
                shard_budget = self.shard_budget(),
                max_object_bytes = self.max_object_bytes,
                "Per-shard budget cannot hold a maximum-size object"
            );
        }
        Ok(())
    }

    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config.normalized())
    }

    /// Load a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }
}

// =============================================================================
// Tests
// =============================================================================
