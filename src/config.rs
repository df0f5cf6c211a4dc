//! Configuration for the opt-out store
//!
//! Centralized configuration with sensible defaults. Every replica of a
//! deployment must agree on the interval settings: the partition grid and
//! the replica turn are derived from them without any coordination.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OptOutError, Result};

/// Main configuration for an opt-out store replica
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Local Cache Configuration
    // -------------------------------------------------------------------------
    /// Root directory for locally cached files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── delta/           (cached delta logs, flat)
    ///     ├── partition/       (cached partition + synthetic snapshots)
    ///     └── outbox/          (this replica's deltas awaiting upload)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Cloud Configuration
    // -------------------------------------------------------------------------
    /// Object key prefix shared by all replicas, e.g. "optout/"
    pub cloud_root: String,

    /// List the whole cloud tree on every refresh instead of backtracking
    pub full_sync: bool,

    /// Only upload deltas; never list, download, or compact
    pub upload_only: bool,

    /// Days of delta folders listed before the last partition
    pub delta_backtrack_days: u32,

    // -------------------------------------------------------------------------
    // Replica Configuration
    // -------------------------------------------------------------------------
    /// This replica's id (0-based, must be below max_replicas)
    pub replica_id: u32,

    /// Number of writer replicas taking turns at compaction
    pub max_replicas: u32,

    // -------------------------------------------------------------------------
    // Retention Configuration
    // -------------------------------------------------------------------------
    /// How often a writer closes its delta file (seconds)
    pub delta_rotation_interval_secs: u64,

    /// Spacing of the partition grid (seconds)
    pub partition_interval_secs: u64,

    /// Partitions retained before files expire
    pub max_partitions: u32,

    /// Include synthetic (replica 999) files in listings
    pub synthetic_logs_enabled: bool,

    /// Newest synthetic files kept in a listing
    pub max_synthetic_logs: usize,

    // -------------------------------------------------------------------------
    // Heap Configuration
    // -------------------------------------------------------------------------
    /// Initial capacity of a DedupHeap, in entries
    pub heap_initial_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./optout_data"),
            cloud_root: "optout/".to_string(),
            full_sync: false,
            upload_only: false,
            delta_backtrack_days: 1,
            replica_id: 0,
            max_replicas: 1,
            delta_rotation_interval_secs: 300, // 5 minutes
            partition_interval_secs: 86_400,   // 1 day
            max_partitions: 30,
            synthetic_logs_enabled: false,
            max_synthetic_logs: 0,
            heap_initial_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a config from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the partition grid or turn formula meaningless
    pub fn validate(&self) -> Result<()> {
        if self.delta_rotation_interval_secs == 0 {
            return Err(OptOutError::Config(
                "delta_rotation_interval_secs must be positive".to_string(),
            ));
        }
        if self.partition_interval_secs == 0 {
            return Err(OptOutError::Config(
                "partition_interval_secs must be positive".to_string(),
            ));
        }
        if self.max_partitions == 0 {
            return Err(OptOutError::Config(
                "max_partitions must be positive".to_string(),
            ));
        }
        if self.max_replicas == 0 {
            return Err(OptOutError::Config(
                "max_replicas must be positive".to_string(),
            ));
        }
        if self.replica_id >= self.max_replicas {
            return Err(OptOutError::Config(format!(
                "replica_id {} out of range for {} replicas",
                self.replica_id, self.max_replicas
            )));
        }
        if self.heap_initial_capacity == 0 {
            return Err(OptOutError::Config(
                "heap_initial_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Local folder holding cached delta files
    pub fn local_delta_dir(&self) -> PathBuf {
        self.data_dir.join("delta")
    }

    /// Local folder holding cached partition and synthetic files
    pub fn local_partition_dir(&self) -> PathBuf {
        self.data_dir.join("partition")
    }

    /// Local folder holding this replica's own deltas before upload
    pub fn local_outbox_dir(&self) -> PathBuf {
        self.data_dir.join("outbox")
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the local cache directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the cloud key prefix
    pub fn cloud_root(mut self, root: impl Into<String>) -> Self {
        self.config.cloud_root = root.into();
        self
    }

    pub fn full_sync(mut self, enabled: bool) -> Self {
        self.config.full_sync = enabled;
        self
    }

    pub fn upload_only(mut self, enabled: bool) -> Self {
        self.config.upload_only = enabled;
        self
    }

    pub fn delta_backtrack_days(mut self, days: u32) -> Self {
        self.config.delta_backtrack_days = days;
        self
    }

    /// Set this replica's id and the replica count
    pub fn replica(mut self, replica_id: u32, max_replicas: u32) -> Self {
        self.config.replica_id = replica_id;
        self.config.max_replicas = max_replicas;
        self
    }

    pub fn delta_rotation_interval_secs(mut self, secs: u64) -> Self {
        self.config.delta_rotation_interval_secs = secs;
        self
    }

    pub fn partition_interval_secs(mut self, secs: u64) -> Self {
        self.config.partition_interval_secs = secs;
        self
    }

    pub fn max_partitions(mut self, count: u32) -> Self {
        self.config.max_partitions = count;
        self
    }

    /// Enable synthetic logs, keeping at most `max_logs` of them
    pub fn synthetic_logs(mut self, max_logs: usize) -> Self {
        self.config.synthetic_logs_enabled = true;
        self.config.max_synthetic_logs = max_logs;
        self
    }

    pub fn heap_initial_capacity(mut self, entries: usize) -> Self {
        self.config.heap_initial_capacity = entries;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
