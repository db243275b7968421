//! Maintenance configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the local cache maintenance subsystem.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Base directory of the local chunk store.
    #[serde(default = "default_chunk_store")]
    pub chunk_store: PathBuf,
    /// Base directory of the local index store.
    #[serde(default = "default_index_store")]
    pub index_store: PathBuf,
    /// Total byte budget for the local cache in GiB.
    #[serde(default = "default_cache_size_gib")]
    pub cache_size_gib: u64,
    /// Seconds between GC passes.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,
    /// Seconds between verifier runs.
    #[serde(default = "default_verify_interval_secs")]
    pub verify_interval_secs: u64,
}

fn default_chunk_store() -> PathBuf {
    PathBuf::from("./data/chunks")
}

fn default_index_store() -> PathBuf {
    PathBuf::from("./data/indices")
}

fn default_cache_size_gib() -> u64 {
    10
}

fn default_gc_interval_secs() -> u64 {
    3600 // 1 hour
}

fn default_verify_interval_secs() -> u64 {
    86400 // 24 hours
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            chunk_store: default_chunk_store(),
            index_store: default_index_store(),
            cache_size_gib: default_cache_size_gib(),
            gc_interval_secs: default_gc_interval_secs(),
            verify_interval_secs: default_verify_interval_secs(),
        }
    }
}

impl MaintenanceConfig {
    /// The configured cache budget in bytes.
    pub fn cache_size_bytes(&self) -> u64 {
        self.cache_size_gib << 30
    }

    /// The interval between GC passes.
    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    /// The interval between verifier runs.
    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_size_gib == 0 {
            return Err("cache_size_gib must be at least 1".to_string());
        }
        // A zero interval would panic when creating the tokio ticker.
        if self.gc_interval_secs == 0 {
            return Err("gc_interval_secs cannot be 0".to_string());
        }
        if self.verify_interval_secs == 0 {
            return Err("verify_interval_secs cannot be 0".to_string());
        }
        Ok(())
    }
}
