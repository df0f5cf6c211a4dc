//! Engine Module
//!
//! The local opt-out store that ties the in-memory structures to files.
//!
//! ## Responsibilities
//! - Append entries to this replica's open delta file
//! - Rotate (close) delta files so they can be uploaded
//! - Compact cached deltas into a new partition file
//! - Load the cache into a merged partition + bloom filter for lookups

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Config;
use crate::entry::{IdentityHash, OptOutEntry, ENTRY_SIZE};
use crate::error::Result;
use crate::filter::BloomFilter;
use crate::heap::DedupHeap;
use crate::storage::{self, FileKind, OptOutFile, PartitionMeta, SortedPartition};

/// Point-in-time view of the cached files
pub struct Snapshot {
    partition: SortedPartition,
    bloom: BloomFilter,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            partition: DedupHeap::new(1).to_partition(true),
            bloom: BloomFilter::new(BloomFilter::ideal_capacity(0)),
        }
    }

    pub fn partition(&self) -> &SortedPartition {
        &self.partition
    }

    pub fn bloom(&self) -> &BloomFilter {
        &self.bloom
    }
}

/// Delta file currently receiving appends
struct ActiveDelta {
    path: PathBuf,
    writer: BufWriter<File>,
    entries: u64,
}

/// The local opt-out store of one replica
///
/// ## Concurrency Model
///
/// - **Appends/rotation**: serialized by the `active_delta` mutex
/// - **Lookups**: take a cheap `Arc` clone of the current snapshot under a
///   read lock, then search without holding any lock
/// - **Snapshot reload**: builds the new snapshot unlocked, swaps under the
///   write lock
pub struct OptOutStore {
    config: Config,

    /// Cached delta files (mirrors cloud)
    delta_dir: PathBuf,

    /// Cached partition and synthetic files (mirrors cloud)
    partition_dir: PathBuf,

    /// Deltas written by this replica and not yet uploaded
    outbox_dir: PathBuf,

    active_delta: Mutex<Option<ActiveDelta>>,

    snapshot: RwLock<Arc<Snapshot>>,
}

impl OptOutStore {
    /// Open or create a store with the given config
    ///
    /// On startup:
    /// 1. Validate config
    /// 2. Create the cache and outbox directories
    /// 3. Load a snapshot from whatever is cached
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let delta_dir = config.local_delta_dir();
        let partition_dir = config.local_partition_dir();
        let outbox_dir = config.local_outbox_dir();
        fs::create_dir_all(&delta_dir)?;
        fs::create_dir_all(&partition_dir)?;
        fs::create_dir_all(&outbox_dir)?;

        let store = Self {
            config,
            delta_dir,
            partition_dir,
            outbox_dir,
            active_delta: Mutex::new(None),
            snapshot: RwLock::new(Arc::new(Snapshot::empty())),
        };
        store.load_snapshot()?;
        Ok(store)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Append one entry to the active delta file, opening one if needed
    pub fn append(&self, entry: &OptOutEntry) -> Result<()> {
        let mut active = self.active_delta.lock();

        if active.is_none() {
            let file = OptOutFile::new(FileKind::Delta, self.config.replica_id, Utc::now());
            let path = self.outbox_dir.join(file.file_name());
            let handle = OpenOptions::new().create(true).append(true).open(&path)?;
            debug!(path = %path.display(), "opened delta file");
            *active = Some(ActiveDelta {
                path,
                writer: BufWriter::new(handle),
                entries: 0,
            });
        }

        if let Some(delta) = active.as_mut() {
            delta.writer.write_all(&entry.to_bytes())?;
            delta.entries += 1;
        }
        Ok(())
    }

    /// Close the active delta file and return its path
    ///
    /// Returns `None` if nothing was appended since the last rotation.
    pub fn rotate_delta(&self) -> Result<Option<PathBuf>> {
        let mut active = self.active_delta.lock();
        let Some(mut delta) = active.take() else {
            return Ok(None);
        };

        delta.writer.flush()?;
        delta.writer.get_ref().sync_all()?;
        info!(path = %delta.path.display(), entries = delta.entries, "rotated delta file");
        Ok(Some(delta.path))
    }

    /// Closed deltas still waiting in the outbox
    pub fn pending_deltas(&self) -> Result<Vec<PathBuf>> {
        let active = self
            .active_delta
            .lock()
            .as_ref()
            .map(|delta| delta.path.clone());
        let mut pending: Vec<PathBuf> = list_dat_files(&self.outbox_dir)?
            .into_iter()
            .filter(|path| Some(path) != active.as_ref())
            .collect();
        pending.sort();
        Ok(pending)
    }

    /// Move an uploaded outbox delta into the cache
    pub fn adopt_delta(&self, outbox_path: &Path, cache_path: &Path) -> Result<()> {
        if let Some(parent) = cache_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(outbox_path, cache_path)?;
        Ok(())
    }

    // =========================================================================
    // Cache
    // =========================================================================

    /// Every cached delta and partition file
    pub fn list_cached_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = list_dat_files(&self.delta_dir)?;
        files.extend(list_dat_files(&self.partition_dir)?);
        files.sort();
        Ok(files)
    }

    /// Rebuild the lookup snapshot from every cached file
    ///
    /// Returns the number of distinct identity hashes.
    pub fn load_snapshot(&self) -> Result<usize> {
        let files = self.list_cached_files()?;

        let mut heap = DedupHeap::new(self.config.heap_initial_capacity);
        for path in &files {
            heap.add_encoded(&storage::read_entry_file(path)?);
        }

        let partition = heap.to_partition(true);
        let bloom = partition.build_bloom_filter();
        let count = partition.len();

        *self.snapshot.write() = Arc::new(Snapshot { partition, bloom });
        info!(files = files.len(), entries = count, "loaded snapshot");
        Ok(count)
    }

    /// The current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn is_opted_out(&self, identity_hash: &IdentityHash) -> bool {
        self.opt_out_timestamp(identity_hash) >= 0
    }

    /// Opt-out timestamp in the current snapshot, or -1
    ///
    /// Search order:
    /// 1. Bloom filter (definite negatives)
    /// 2. Binary search in the partition
    pub fn opt_out_timestamp(&self, identity_hash: &IdentityHash) -> i64 {
        let snapshot = self.snapshot();
        if !snapshot.bloom.likely_contains(identity_hash) {
            return -1;
        }
        snapshot.partition.get_opt_out_timestamp(identity_hash)
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Merge `deltas` into a new partition
    ///
    /// Each partition covers only its own delta window; earlier partitions
    /// are not folded in, so a record disappears once the files holding it
    /// expire. The file is named after `cutoff` and written into the cache.
    pub fn compact(&self, deltas: &[PathBuf], cutoff: DateTime<Utc>) -> Result<PartitionMeta> {
        let mut buffers = Vec::with_capacity(deltas.len());
        for path in deltas {
            buffers.push(storage::read_entry_file(path)?);
        }
        let total: usize = buffers.iter().map(|b| b.len() / ENTRY_SIZE).sum();

        let mut heap = DedupHeap::new(total.max(1));
        for buffer in &buffers {
            heap.add_encoded(buffer);
        }
        let partition = heap.to_partition(true);

        let file = OptOutFile::new(FileKind::Partition, self.config.replica_id, cutoff);
        let path = self.partition_dir.join(file.file_name());
        storage::write_file_atomic(&path, partition.as_bytes())?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(partition.as_bytes());
        let meta = PartitionMeta {
            path,
            entry_count: partition.len() as u64,
            file_size: partition.as_bytes().len() as u64,
            crc32: hasher.finalize(),
        };

        info!(
            path = %meta.path.display(),
            deltas = deltas.len(),
            input_entries = total,
            entries = meta.entry_count,
            crc32 = meta.crc32,
            "wrote partition"
        );
        Ok(meta)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn delta_dir(&self) -> &Path {
        &self.delta_dir
    }

    pub fn partition_dir(&self) -> &Path {
        &self.partition_dir
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }
}

/// `.dat` files directly inside `dir`
fn list_dat_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "dat") {
            files.push(path);
        }
    }
    Ok(files)
}
