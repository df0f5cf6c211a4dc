//! Cloud sync driver
//!
//! The caller side of `ReplicationCoordinator::refresh`: serializes runs,
//! repeats refresh until the cache converges, and performs the downloads,
//! deletes, and compactions the coordinator asks for.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::engine::OptOutStore;
use crate::entry::ENTRY_SIZE;
use crate::error::{OptOutError, Result};
use crate::storage::{self, PartitionMeta};

use super::{CloudStorage, CompactionPlan, ReplicationCoordinator, SyncHandler};

/// Refresh steps allowed per run before giving up
pub const MAX_REFRESH_ATTEMPTS: usize = 20;

/// Threads used for one batch of downloads
const DOWNLOAD_WORKERS: usize = 4;

/// Outcome of `CloudSync::run`
#[derive(Debug)]
pub enum SyncReport {
    /// Another run was in flight; this trigger was dropped
    Skipped,
    /// The cache matched the cloud after `attempts` refresh steps
    Converged {
        attempts: usize,
        compacted: Option<PartitionMeta>,
    },
}

/// Periodic sync job for one replica
pub struct CloudSync<S: CloudStorage> {
    coordinator: ReplicationCoordinator,
    storage: Arc<S>,
    store: Arc<OptOutStore>,
    in_flight: AtomicBool,
}

impl<S: CloudStorage> CloudSync<S> {
    pub fn new(storage: Arc<S>, store: Arc<OptOutStore>) -> Result<Self> {
        let coordinator = ReplicationCoordinator::new(store.config())?;
        Ok(Self {
            coordinator,
            storage,
            store,
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn coordinator(&self) -> &ReplicationCoordinator {
        &self.coordinator
    }

    /// Refresh until converged, then reload the store's snapshot
    ///
    /// Overlapping calls return `SyncReport::Skipped` rather than queueing.
    /// Errors from storage or the local cache abort the run; the next
    /// periodic trigger starts over.
    pub fn run(&self, now: DateTime<Utc>) -> Result<SyncReport> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            debug!("sync already in flight, skipping");
            return Ok(SyncReport::Skipped);
        };

        let mut worker = SyncWorker {
            coordinator: &self.coordinator,
            storage: &*self.storage,
            store: &*self.store,
            now,
            compacted: None,
        };

        for attempt in 1..=MAX_REFRESH_ATTEMPTS {
            let cached = self.store.list_cached_files()?;
            if self
                .coordinator
                .refresh(now, &*self.storage, &cached, &mut worker)?
            {
                self.store.load_snapshot()?;
                info!(attempts = attempt, "cloud sync converged");
                return Ok(SyncReport::Converged {
                    attempts: attempt,
                    compacted: worker.compacted,
                });
            }
        }

        warn!(attempts = MAX_REFRESH_ATTEMPTS, "cloud sync did not converge");
        Err(OptOutError::Storage(format!(
            "cloud sync did not converge after {} refresh attempts",
            MAX_REFRESH_ATTEMPTS
        )))
    }

    /// Rotate the active delta and upload every closed delta in the outbox
    ///
    /// Uploaded deltas move into the cache, or are removed in upload-only
    /// mode where no cache is kept. Returns the cloud paths written.
    pub fn publish_deltas(&self) -> Result<Vec<String>> {
        self.store.rotate_delta()?;

        let mut uploaded = Vec::new();
        for outbox_path in self.store.pending_deltas()? {
            let cloud_path = self
                .coordinator
                .upload_file(&*self.storage, &outbox_path)?;

            if self.coordinator.is_upload_only() {
                fs::remove_file(&outbox_path)?;
            } else {
                let cache_path = self.coordinator.to_local_path(&cloud_path)?;
                self.store.adopt_delta(&outbox_path, &cache_path)?;
            }
            uploaded.push(cloud_path);
        }
        Ok(uploaded)
    }
}

// =============================================================================
// Handler
// =============================================================================

struct SyncWorker<'a, S: CloudStorage> {
    coordinator: &'a ReplicationCoordinator,
    storage: &'a S,
    store: &'a OptOutStore,
    now: DateTime<Utc>,
    compacted: Option<PartitionMeta>,
}

impl<S: CloudStorage> SyncHandler for SyncWorker<'_, S> {
    fn download(&mut self, cloud_paths: &BTreeSet<String>) -> Result<()> {
        let workers = DOWNLOAD_WORKERS.min(cloud_paths.len()).max(1);
        let mut buckets: Vec<Vec<&String>> = vec![Vec::new(); workers];
        for (i, path) in cloud_paths.iter().enumerate() {
            buckets[i % workers].push(path);
        }

        let coordinator = self.coordinator;
        let storage = self.storage;
        let results = crossbeam::scope(|scope| {
            let handles: Vec<_> = buckets
                .iter()
                .map(|bucket| {
                    scope.spawn(move |_| -> Result<()> {
                        for path in bucket {
                            fetch(coordinator, storage, path)?;
                        }
                        Ok(())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join()).collect::<Vec<_>>()
        })
        .map_err(|_| OptOutError::Storage("download scope panicked".to_string()))?;

        for result in results {
            result.map_err(|_| OptOutError::Storage("download worker panicked".to_string()))??;
        }
        info!(count = cloud_paths.len(), "downloaded cloud files");
        Ok(())
    }

    fn delete(&mut self, local_paths: &BTreeSet<PathBuf>) -> Result<()> {
        for path in local_paths {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(count = local_paths.len(), "deleted stale cached files");
        Ok(())
    }

    fn compact(&mut self, plan: &CompactionPlan) -> Result<()> {
        let meta = self.store.compact(&plan.deltas, plan.cutoff)?;
        self.coordinator.upload_file(self.storage, &meta.path)?;
        self.coordinator.purge_expired(self.storage, self.now)?;
        self.compacted = Some(meta);
        Ok(())
    }
}

/// Download one object into its cache location
fn fetch<S: CloudStorage>(coordinator: &ReplicationCoordinator, storage: &S, cloud_path: &str) -> Result<()> {
    let local = coordinator.to_local_path(cloud_path)?;
    let data = storage.download(cloud_path)?;
    if data.len() % ENTRY_SIZE != 0 {
        return Err(OptOutError::Codec(format!(
            "{}: {} bytes is not a multiple of {}",
            cloud_path,
            data.len(),
            ENTRY_SIZE
        )));
    }

    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    storage::write_file_atomic(&local, &data)?;
    debug!(path = cloud_path, "downloaded");
    Ok(())
}

// =============================================================================
// In-Flight Guard
// =============================================================================

/// Holds the in-flight flag for the duration of one run
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
