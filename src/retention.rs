//! Retention policy
//!
//! Expiry and grace-period rules derived from file-name timestamps, plus
//! the partition-boundary grid every replica computes independently.

use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::storage::OptOutFile;

const SECONDS_PER_DAY: i64 = 86_400;

/// File retention rules shared by all replicas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    delta_rotation_interval_secs: u64,
    partition_interval_secs: u64,
    max_partitions: u32,
    synthetic_logs_enabled: bool,
    max_synthetic_logs: usize,
}

impl RetentionPolicy {
    pub fn new(delta_rotation_interval_secs: u64, partition_interval_secs: u64, max_partitions: u32) -> Self {
        assert!(delta_rotation_interval_secs > 0, "delta rotation interval must be positive");
        assert!(partition_interval_secs > 0, "partition interval must be positive");
        Self {
            delta_rotation_interval_secs,
            partition_interval_secs,
            max_partitions,
            synthetic_logs_enabled: false,
            max_synthetic_logs: 0,
        }
    }

    /// Enable synthetic logs, keeping the newest `max_logs`
    pub fn with_synthetic_logs(mut self, max_logs: usize) -> Self {
        self.synthetic_logs_enabled = true;
        self.max_synthetic_logs = max_logs;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        let policy = Self::new(
            config.delta_rotation_interval_secs,
            config.partition_interval_secs,
            config.max_partitions,
        );
        if config.synthetic_logs_enabled {
            policy.with_synthetic_logs(config.max_synthetic_logs)
        } else {
            policy
        }
    }

    /// `partition_interval * max_partitions`
    pub fn max_lifespan(&self) -> Duration {
        Duration::seconds(self.partition_interval_secs as i64 * self.max_partitions as i64)
    }

    /// Three delta rotations
    pub fn lookback_grace_period(&self) -> Duration {
        Duration::seconds(3 * self.delta_rotation_interval_secs as i64)
    }

    pub fn partition_interval(&self) -> Duration {
        Duration::seconds(self.partition_interval_secs as i64)
    }

    pub fn synthetic_logs_enabled(&self) -> bool {
        self.synthetic_logs_enabled
    }

    pub fn max_synthetic_logs(&self) -> usize {
        self.max_synthetic_logs
    }

    /// True if `timestamp` is older than `now - max_lifespan`
    pub fn is_timestamp_expired(&self, now: DateTime<Utc>, timestamp: DateTime<Utc>) -> bool {
        timestamp < now - self.max_lifespan()
    }

    /// File expiry; synthetic files never expire
    pub fn is_expired(&self, now: DateTime<Utc>, file: &OptOutFile) -> bool {
        !file.is_synthetic() && self.is_timestamp_expired(now, file.timestamp)
    }

    /// File timestamp strictly inside `(low, high)`; synthetic files always pass
    pub fn is_in_range(&self, file: &OptOutFile, low: DateTime<Utc>, high: DateTime<Utc>) -> bool {
        file.is_synthetic() || (file.timestamp > low && file.timestamp < high)
    }

    /// Largest point of the partition grid not after `timestamp`
    ///
    /// The grid restarts at every UTC midnight and advances in
    /// `partition_interval` steps.
    pub fn truncate_to_partition_cutoff(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let midnight = secs - secs.rem_euclid(SECONDS_PER_DAY);
        let interval = self.partition_interval_secs as i64;
        let cutoff = midnight + (secs - midnight) / interval * interval;
        DateTime::<Utc>::from_timestamp(cutoff, 0).unwrap_or_default()
    }
}
