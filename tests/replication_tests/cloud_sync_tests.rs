//! End-to-end tests for CloudSync
//!
//! These tests verify:
//! - Publishing deltas from one replica and syncing them into another
//! - Deterministic compaction on this replica's turn, with expired purges
//! - Giving up when the cloud keeps changing
//! - Overlapping runs are skipped

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use bytes::Bytes;
use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, Sender};
use optout::replication::{SyncReport, MAX_REFRESH_ATTEMPTS};
use optout::storage::{FileKind, SYNTHETIC_REPLICA_ID};
use optout::{CloudStorage, CloudSync, Config, OptOutEntry, OptOutError, OptOutFile, OptOutStore, Result};
use tempfile::TempDir;

#[path = "../common/mod.rs"]
mod common;

use common::{at, entries_bytes, file, MemoryStorage};

// =============================================================================
// Helper Functions
// =============================================================================

fn open_store(dir: &Path, replica_id: u32, max_replicas: u32) -> Arc<OptOutStore> {
    let config = Config::builder()
        .data_dir(dir)
        .cloud_root("optout/")
        .replica(replica_id, max_replicas)
        .delta_rotation_interval_secs(300)
        .partition_interval_secs(86_400)
        .max_partitions(30)
        .build();
    Arc::new(OptOutStore::open(config).unwrap())
}

fn put_file<S: CloudStorage>(
    sync: &CloudSync<S>,
    storage: &MemoryStorage,
    name: &OptOutFile,
    entries: &[OptOutEntry],
) -> String {
    let path = sync
        .coordinator()
        .to_cloud_path(Path::new(&name.file_name()))
        .unwrap();
    storage.put(&path, entries_bytes(entries));
    path
}

// =============================================================================
// Publish + Sync Tests
// =============================================================================

#[test]
fn test_published_deltas_reach_other_replica() {
    let writer_dir = TempDir::new().unwrap();
    let reader_dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());

    let writer = open_store(writer_dir.path(), 0, 1);
    let writer_sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&writer)).unwrap();

    for id in 0..10u64 {
        writer.append(&OptOutEntry::from_test_id(id, 1_000 + id)).unwrap();
    }
    let uploaded = writer_sync.publish_deltas().unwrap();

    assert_eq!(uploaded.len(), 1);
    assert!(uploaded[0].starts_with("optout/delta/"));
    assert!(storage.contains(&uploaded[0]));
    assert!(writer.pending_deltas().unwrap().is_empty());
    assert_eq!(writer.list_cached_files().unwrap().len(), 1);

    // Nothing new: publishing again uploads nothing
    assert!(writer_sync.publish_deltas().unwrap().is_empty());

    let reader = open_store(reader_dir.path(), 0, 1);
    let reader_sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&reader)).unwrap();
    assert!(!reader.is_opted_out(&OptOutEntry::test_hash(3)));

    match reader_sync.run(Utc::now()).unwrap() {
        SyncReport::Converged { attempts, .. } => assert_eq!(attempts, 2),
        SyncReport::Skipped => panic!("unexpected skip"),
    }

    for id in 0..10u64 {
        assert_eq!(reader.opt_out_timestamp(&OptOutEntry::test_hash(id)), (1_000 + id) as i64);
    }
    assert!(!reader.is_opted_out(&OptOutEntry::test_hash(10)));
}

#[test]
fn test_upload_only_publish_clears_outbox() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());

    let mut config = Config::builder().data_dir(dir.path()).build();
    config.upload_only = true;
    let store = Arc::new(OptOutStore::open(config).unwrap());
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();

    store.append(&OptOutEntry::from_test_id(1, 1)).unwrap();
    let uploaded = sync.publish_deltas().unwrap();

    assert_eq!(uploaded.len(), 1);
    assert!(store.pending_deltas().unwrap().is_empty());
    assert!(store.list_cached_files().unwrap().is_empty());

    // Upload-only runs converge immediately without listing
    storage.fail_list.store(true, Ordering::SeqCst);
    assert!(matches!(
        sync.run(Utc::now()).unwrap(),
        SyncReport::Converged { attempts: 1, compacted: None }
    ));
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_compaction_on_own_turn() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();
    let now = at("2024-03-10T00:20:00Z");

    put_file(
        &sync,
        &storage,
        &file(FileKind::Partition, 0, "2024-03-09T00:00:00Z", "00000001"),
        &[OptOutEntry::from_test_id(1, 100), OptOutEntry::from_test_id(5, 50)],
    );
    put_file(
        &sync,
        &storage,
        &file(FileKind::Delta, 0, "2024-03-09T12:00:00Z", "00000002"),
        &[OptOutEntry::from_test_id(2, 150)],
    );
    put_file(
        &sync,
        &storage,
        &file(FileKind::Delta, 0, "2024-03-09T23:55:00Z", "00000003"),
        &[OptOutEntry::from_test_id(1, 200)],
    );
    let expired = put_file(
        &sync,
        &storage,
        &file(FileKind::Delta, 0, "2024-01-01T12:00:00Z", "00000004"),
        &[OptOutEntry::from_test_id(9, 9)],
    );

    let compacted = match sync.run(now).unwrap() {
        SyncReport::Converged { attempts, compacted } => {
            assert_eq!(attempts, 2);
            compacted.expect("this replica's turn should compact")
        }
        SyncReport::Skipped => panic!("unexpected skip"),
    };

    // Only the two window deltas; the earlier partition stays a separate file
    assert_eq!(compacted.entry_count, 2);
    assert_eq!(compacted.file_size, 2 * 72);
    assert_eq!(
        compacted.crc32,
        crc32fast::hash(&std::fs::read(&compacted.path).unwrap())
    );

    let cloud_partition = sync.coordinator().to_cloud_path(&compacted.path).unwrap();
    assert!(cloud_partition.starts_with("optout/partition/partition-000_2024-03-10T00.00.00Z_"));
    assert!(storage.contains(&cloud_partition));
    assert!(!storage.contains(&expired));

    assert_eq!(store.opt_out_timestamp(&OptOutEntry::test_hash(1)), 200);
    assert_eq!(store.opt_out_timestamp(&OptOutEntry::test_hash(2)), 150);
    assert_eq!(store.opt_out_timestamp(&OptOutEntry::test_hash(5)), 50);
    assert_eq!(store.opt_out_timestamp(&OptOutEntry::test_hash(9)), -1);

    // The new partition is already covered; a second run changes nothing
    assert!(matches!(
        sync.run(now).unwrap(),
        SyncReport::Converged { attempts: 1, compacted: None }
    ));
}

#[test]
fn test_records_expire_with_their_files() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();

    put_file(
        &sync,
        &storage,
        &file(FileKind::Partition, 0, "2024-03-09T00:00:00Z", "00000001"),
        &[OptOutEntry::from_test_id(7, 70)],
    );
    put_file(
        &sync,
        &storage,
        &file(FileKind::Delta, 0, "2024-03-09T12:00:00Z", "00000002"),
        &[OptOutEntry::from_test_id(8, 80)],
    );

    let first = at("2024-03-10T00:20:00Z");
    assert!(matches!(
        sync.run(first).unwrap(),
        SyncReport::Converged { compacted: Some(_), .. }
    ));
    assert!(store.is_opted_out(&OptOutEntry::test_hash(7)));
    assert!(store.is_opted_out(&OptOutEntry::test_hash(8)));

    // Every file is past the 30-day lifespan: the cache is emptied
    let later = at("2024-04-20T00:20:00Z");
    assert!(matches!(
        sync.run(later).unwrap(),
        SyncReport::Converged { attempts: 2, compacted: None }
    ));
    assert!(store.list_cached_files().unwrap().is_empty());
    assert!(!store.is_opted_out(&OptOutEntry::test_hash(7)));
    assert!(!store.is_opted_out(&OptOutEntry::test_hash(8)));
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_gives_up_when_cloud_keeps_changing() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    storage.grow_on_delta_list.store(true, Ordering::SeqCst);

    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();

    let err = sync.run(at("2024-03-10T00:20:00Z")).unwrap_err();
    assert!(matches!(err, OptOutError::Storage(_)));
    assert!(err.to_string().contains(&MAX_REFRESH_ATTEMPTS.to_string()));
}

#[test]
fn test_listing_error_aborts_run() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    storage.fail_list.store(true, Ordering::SeqCst);

    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();

    assert!(sync.run(at("2024-03-10T00:20:00Z")).is_err());

    // The in-flight flag is released after a failed run
    storage.fail_list.store(false, Ordering::SeqCst);
    assert!(matches!(
        sync.run(at("2024-03-10T00:20:00Z")).unwrap(),
        SyncReport::Converged { .. }
    ));
}

#[test]
fn test_corrupt_download_is_rejected() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();

    let path = put_file(
        &sync,
        &storage,
        &file(FileKind::Delta, 0, "2024-03-09T12:00:00Z", "00000001"),
        &[],
    );
    storage.put(&path, vec![0u8; 71]);

    let err = sync.run(at("2024-03-09T18:00:00Z")).unwrap_err();
    assert!(matches!(err, OptOutError::Codec(_)));
    assert!(store.list_cached_files().unwrap().is_empty());
}

#[test]
fn test_synthetic_file_in_partition_folder_does_not_block_sync() {
    let dir = TempDir::new().unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(Arc::clone(&storage), Arc::clone(&store)).unwrap();

    let misplaced = file(FileKind::Partition, SYNTHETIC_REPLICA_ID, "2024-03-09T00:00:00Z", "00000001");
    storage.put(
        &format!("optout/partition/{}", misplaced),
        entries_bytes(&[OptOutEntry::from_test_id(1, 1)]),
    );

    assert!(matches!(
        sync.run(at("2024-03-09T18:00:00Z")).unwrap(),
        SyncReport::Converged { attempts: 1, .. }
    ));
    assert!(store.list_cached_files().unwrap().is_empty());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

/// Storage whose first list call blocks until released
struct GatedStorage {
    inner: MemoryStorage,
    armed: AtomicBool,
    entered: Sender<()>,
    release: Receiver<()>,
}

impl CloudStorage for GatedStorage {
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.send(()).unwrap();
            self.release.recv().unwrap();
        }
        self.inner.list(prefix)
    }

    fn download(&self, path: &str) -> Result<Bytes> {
        self.inner.download(path)
    }

    fn upload(&self, data: Bytes, path: &str) -> Result<()> {
        self.inner.upload(data, path)
    }

    fn delete(&self, paths: &[String]) -> Result<()> {
        self.inner.delete(paths)
    }
}

#[test]
fn test_overlapping_run_is_skipped() {
    let dir = TempDir::new().unwrap();
    let (entered_tx, entered_rx) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let storage = Arc::new(GatedStorage {
        inner: MemoryStorage::new(),
        armed: AtomicBool::new(true),
        entered: entered_tx,
        release: release_rx,
    });

    let store = open_store(dir.path(), 0, 1);
    let sync = CloudSync::new(storage, store).unwrap();
    let now = at("2024-03-10T00:20:00Z");

    thread::scope(|scope| {
        let first = scope.spawn(|| sync.run(now));

        entered_rx.recv().unwrap();
        assert!(matches!(sync.run(now).unwrap(), SyncReport::Skipped));
        release_tx.send(()).unwrap();

        assert!(matches!(first.join().unwrap().unwrap(), SyncReport::Converged { .. }));
    });
}
