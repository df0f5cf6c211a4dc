//! Replication coordinator
//!
//! One `refresh` call is one convergence step:
//! 1. List the relevant cloud files
//! 2. Diff them against the local cache, reporting downloads and deletes
//! 3. Report "in sync" only when neither set had anything in it
//! 4. When in sync, run the compaction gate
//!
//! Refresh has no internal retry loop. Callers repeat it until it returns
//! `true` (see `CloudSync`), and must not run two refreshes of the same
//! replica concurrently.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{OptOutError, Result};
use crate::retention::RetentionPolicy;
use crate::storage::{FileKind, OptOutFile};

use super::CloudStorage;

const DELTA_FOLDER: &str = "delta/";
const PARTITION_FOLDER: &str = "partition/";
const SYNTHETIC_FOLDER: &str = "synthetic/";

/// Input for one compaction, emitted by the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionPlan {
    /// Grid point the new partition is named after
    pub cutoff: DateTime<Utc>,
    /// Cached delta files to merge, sorted by path
    pub deltas: Vec<PathBuf>,
}

/// Receives the work a refresh step decides on
///
/// Every call made during a refresh must finish before the next refresh
/// of the same replica starts.
pub trait SyncHandler {
    /// Fetch these cloud objects into the local cache
    fn download(&mut self, cloud_paths: &BTreeSet<String>) -> Result<()>;

    /// Remove these cached files
    fn delete(&mut self, local_paths: &BTreeSet<PathBuf>) -> Result<()>;

    /// Produce a partition from the plan's deltas
    fn compact(&mut self, plan: &CompactionPlan) -> Result<()>;
}

/// Cloud/local sync and compaction turn-taking for one replica
#[derive(Debug, Clone)]
pub struct ReplicationCoordinator {
    /// Object key prefix, always ending in '/' (or empty)
    cloud_root: String,
    local_delta_dir: PathBuf,
    local_partition_dir: PathBuf,
    replica_id: u32,
    max_replicas: u32,
    delta_backtrack_days: u32,
    full_sync: bool,
    upload_only: bool,
    policy: RetentionPolicy,
}

impl ReplicationCoordinator {
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let mut cloud_root = config.cloud_root.clone();
        if !cloud_root.is_empty() && !cloud_root.ends_with('/') {
            cloud_root.push('/');
        }

        Ok(Self {
            cloud_root,
            local_delta_dir: config.local_delta_dir(),
            local_partition_dir: config.local_partition_dir(),
            replica_id: config.replica_id,
            max_replicas: config.max_replicas,
            delta_backtrack_days: config.delta_backtrack_days,
            full_sync: config.full_sync,
            upload_only: config.upload_only,
            policy: RetentionPolicy::from_config(config),
        })
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    pub fn replica_id(&self) -> u32 {
        self.replica_id
    }

    pub fn is_upload_only(&self) -> bool {
        self.upload_only
    }

    // =========================================================================
    // Path Mapping
    // =========================================================================

    /// Cloud key for a cached file
    ///
    /// Deltas go under a date folder, partitions under a flat folder, and
    /// synthetic partitions under their own folder.
    pub fn to_cloud_path(&self, local: &Path) -> Result<String> {
        let file = OptOutFile::from_path(local)?;
        Ok(self.cloud_path_for(&file))
    }

    /// Cached location of a cloud object
    pub fn to_local_path(&self, cloud: &str) -> Result<PathBuf> {
        let file = OptOutFile::from_cloud_path(cloud)?;
        Ok(self.local_path_for(&file))
    }

    fn cloud_path_for(&self, file: &OptOutFile) -> String {
        match file.kind {
            FileKind::Delta => format!(
                "{}{}{}/{}",
                self.cloud_root,
                DELTA_FOLDER,
                file.date_folder(),
                file
            ),
            FileKind::Partition if file.is_synthetic() => {
                format!("{}{}{}", self.cloud_root, SYNTHETIC_FOLDER, file)
            }
            FileKind::Partition => format!("{}{}{}", self.cloud_root, PARTITION_FOLDER, file),
        }
    }

    fn local_path_for(&self, file: &OptOutFile) -> PathBuf {
        match file.kind {
            FileKind::Delta => self.local_delta_dir.join(file.file_name()),
            FileKind::Partition => self.local_partition_dir.join(file.file_name()),
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// One convergence step; returns true when the cache matched the cloud
    ///
    /// Listing failures propagate before any handler call. In upload-only
    /// mode nothing is listed and the step reports in sync.
    pub fn refresh(
        &self,
        now: DateTime<Utc>,
        storage: &dyn CloudStorage,
        cached: &[PathBuf],
        handler: &mut dyn SyncHandler,
    ) -> Result<bool> {
        if self.upload_only {
            return Ok(true);
        }

        // Step 1: List relevant cloud files
        let cloud = self.list_relevant_cloud_files(storage, now)?;
        let cloud_set: BTreeSet<&str> = cloud.iter().map(String::as_str).collect();

        // Step 2: Diff against the local cache
        let mut present = BTreeSet::new();
        let mut deletes = BTreeSet::new();
        for local in cached {
            match self.to_cloud_path(local) {
                Ok(cloud_path) if cloud_set.contains(cloud_path.as_str()) => {
                    present.insert(cloud_path);
                }
                Ok(_) => {
                    deletes.insert(local.clone());
                }
                Err(e) => warn!(path = %local.display(), error = %e, "ignoring unrecognized cached file"),
            }
        }
        let downloads: BTreeSet<String> = cloud
            .iter()
            .filter(|path| !present.contains(path.as_str()))
            .cloned()
            .collect();

        if !downloads.is_empty() {
            handler.download(&downloads)?;
        }
        if !deletes.is_empty() {
            handler.delete(&deletes)?;
        }

        // Step 3: In sync only if nothing was pending
        let in_sync = downloads.is_empty() && deletes.is_empty();
        info!(
            replica_id = self.replica_id,
            cloud = cloud.len(),
            cached = cached.len(),
            downloads = downloads.len(),
            deletes = deletes.len(),
            in_sync,
            "refresh step"
        );

        // Step 4: Compaction gate
        if in_sync {
            if let Some(plan) = self.compaction_candidates(now, cached, &cloud) {
                info!(
                    replica_id = self.replica_id,
                    cutoff = %plan.cutoff,
                    deltas = plan.deltas.len(),
                    "triggering compaction"
                );
                handler.compact(&plan)?;
            }
        }

        Ok(in_sync)
    }

    /// Cloud files this replica should cache, minus expired ones
    pub fn list_relevant_cloud_files(
        &self,
        storage: &dyn CloudStorage,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        // Synthetic files map to their own folder; one stored under
        // partition/ would never match its cached copy
        let partitions: Vec<String> = storage
            .list(&self.folder(PARTITION_FOLDER))?
            .into_iter()
            .filter(|path| !OptOutFile::from_cloud_path(path).is_ok_and(|f| f.is_synthetic()))
            .collect();

        let deltas = if self.full_sync {
            storage.list(&self.folder(DELTA_FOLDER))?
        } else {
            let last_partition = partitions
                .iter()
                .filter_map(|p| OptOutFile::from_cloud_path(p).ok())
                .filter(|f| f.is_partition() && !f.is_synthetic())
                .map(|f| f.timestamp)
                .max();

            match last_partition {
                Some(last) => self.list_delta_days(storage, last, now)?,
                None => storage.list(&self.folder(DELTA_FOLDER))?,
            }
        };

        let mut relevant: Vec<String> = partitions
            .into_iter()
            .chain(deltas)
            .filter(|path| self.is_live(path, now))
            .collect();

        if self.policy.synthetic_logs_enabled() {
            relevant.extend(self.list_synthetic(storage)?);
        }

        Ok(relevant)
    }

    /// Delta folders from `delta_backtrack_days` before `last` through today
    fn list_delta_days(
        &self,
        storage: &dyn CloudStorage,
        last: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut day = (last - Duration::days(self.delta_backtrack_days as i64)).date_naive();
        let today = now.date_naive();

        let mut listed = Vec::new();
        while day <= today {
            let prefix = format!(
                "{}{}{}/",
                self.cloud_root,
                DELTA_FOLDER,
                day.format("%Y-%m-%d")
            );
            listed.extend(storage.list(&prefix)?);
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        Ok(listed)
    }

    /// Newest `max_synthetic_logs` synthetic files
    fn list_synthetic(&self, storage: &dyn CloudStorage) -> Result<Vec<String>> {
        let mut synthetic: Vec<(DateTime<Utc>, String)> = storage
            .list(&self.folder(SYNTHETIC_FOLDER))?
            .into_iter()
            .filter_map(|path| {
                let file = OptOutFile::from_cloud_path(&path).ok()?;
                file.is_synthetic().then_some((file.timestamp, path))
            })
            .collect();

        synthetic.sort_by(|a, b| b.0.cmp(&a.0));
        synthetic.truncate(self.policy.max_synthetic_logs());
        Ok(synthetic.into_iter().map(|(_, path)| path).collect())
    }

    fn is_live(&self, path: &str, now: DateTime<Utc>) -> bool {
        match OptOutFile::from_cloud_path(path) {
            Ok(file) => !self.policy.is_expired(now, &file),
            Err(_) => {
                debug!(path, "skipping unrecognized cloud object");
                false
            }
        }
    }

    fn folder(&self, folder: &str) -> String {
        format!("{}{}", self.cloud_root, folder)
    }

    // =========================================================================
    // Compaction Gate
    // =========================================================================

    /// Replica index whose turn it is at `now`
    pub fn replica_turn(&self, now: DateTime<Utc>) -> u32 {
        let cutoff = self.policy.truncate_to_partition_cutoff(now);
        self.turn_since(now, cutoff)
    }

    fn turn_since(&self, now: DateTime<Utc>, cutoff: DateTime<Utc>) -> u32 {
        let grace = self.policy.lookback_grace_period().num_seconds().max(1);
        let elapsed = (now - cutoff).num_seconds().max(0);
        ((elapsed / grace) % self.max_replicas as i64) as u32
    }

    /// Deltas to compact now, or `None` to defer to a later cycle
    ///
    /// Defers when the cutoff is not after the last partition, when the turn
    /// belongs to another replica, or when the cached and cloud delta sets
    /// of the window `[last_partition - grace, now]` differ.
    pub fn compaction_candidates(
        &self,
        now: DateTime<Utc>,
        cached: &[PathBuf],
        cloud: &[String],
    ) -> Option<CompactionPlan> {
        let cutoff = self.policy.truncate_to_partition_cutoff(now);

        let cached_files: Vec<(OptOutFile, &PathBuf)> = cached
            .iter()
            .filter_map(|path| OptOutFile::from_path(path).ok().map(|f| (f, path)))
            .collect();
        let cloud_files: Vec<OptOutFile> = cloud
            .iter()
            .filter_map(|path| OptOutFile::from_cloud_path(path).ok())
            .collect();

        let last_partition = cached_files
            .iter()
            .map(|(f, _)| f)
            .chain(cloud_files.iter())
            .filter(|f| f.is_partition() && !f.is_synthetic())
            .map(|f| f.timestamp)
            .max();

        if let Some(last) = last_partition {
            if cutoff <= last {
                debug!(%cutoff, %last, "partition for cutoff already exists");
                return None;
            }
        }
        if cutoff > now {
            debug!(%cutoff, "cutoff not yet due");
            return None;
        }

        let turn = self.turn_since(now, cutoff);
        if turn != self.replica_id {
            debug!(turn, replica_id = self.replica_id, "not this replica's turn");
            return None;
        }

        let low = last_partition.unwrap_or_default() - self.policy.lookback_grace_period();
        let in_window = |f: &OptOutFile| f.is_delta() && f.timestamp >= low && f.timestamp <= now;

        let cached_deltas: BTreeMap<String, &PathBuf> = cached_files
            .iter()
            .filter(|(f, _)| in_window(f))
            .map(|(f, path)| (f.file_name(), *path))
            .collect();
        let cloud_deltas: BTreeSet<String> = cloud_files
            .iter()
            .filter(|&f| in_window(f))
            .map(OptOutFile::file_name)
            .collect();

        if !cached_deltas.keys().eq(cloud_deltas.iter()) {
            debug!(
                cached = cached_deltas.len(),
                cloud = cloud_deltas.len(),
                "delta window not fully downloaded"
            );
            return None;
        }
        if cached_deltas.is_empty() && last_partition.is_none() {
            debug!("nothing to compact");
            return None;
        }

        let mut deltas: Vec<PathBuf> = cached_deltas.into_values().cloned().collect();
        deltas.sort();
        Some(CompactionPlan { cutoff, deltas })
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Upload one local delta or partition file to its cloud key
    ///
    /// Available in every mode, including upload-only.
    pub fn upload_file(&self, storage: &dyn CloudStorage, local: &Path) -> Result<String> {
        let cloud_path = self.to_cloud_path(local)?;
        let data = fs::read(local)?;
        storage.upload(Bytes::from(data), &cloud_path)?;
        info!(path = %cloud_path, "uploaded");
        Ok(cloud_path)
    }

    /// Delete expired delta and partition objects from the cloud
    ///
    /// Synthetic files are never expired.
    pub fn purge_expired(&self, storage: &dyn CloudStorage, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut expired = Vec::new();
        for folder in [PARTITION_FOLDER, DELTA_FOLDER] {
            for path in storage.list(&self.folder(folder))? {
                match OptOutFile::from_cloud_path(&path) {
                    Ok(file) if self.policy.is_expired(now, &file) => expired.push(path),
                    _ => {}
                }
            }
        }

        if !expired.is_empty() {
            storage.delete(&expired).map_err(|e| {
                OptOutError::Storage(format!("failed to purge {} expired files: {}", expired.len(), e))
            })?;
            info!(count = expired.len(), "purged expired cloud files");
        }
        Ok(expired)
    }
}
