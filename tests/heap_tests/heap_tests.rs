//! Tests for DedupHeap
//!
//! These tests verify:
//! - to_partition() yields ascending identity hashes
//! - Duplicate merge keeps the newest timestamp
//! - Growth past the initial capacity
//! - Bulk insertion from encoded bytes and other heaps

use optout::{DedupHeap, OptOutEntry, ENTRY_SIZE};

// =============================================================================
// Helper Functions
// =============================================================================

fn heap_of(entries: &[OptOutEntry]) -> DedupHeap {
    let mut heap = DedupHeap::new(16);
    heap.add_all(entries);
    heap
}

fn assert_ascending(heap: &DedupHeap, merge_dups: bool) {
    let partition = heap.to_partition(merge_dups);
    let hashes: Vec<_> = partition.iter().map(|e| e.identity_hash).collect();
    for pair in hashes.windows(2) {
        if merge_dups {
            assert!(pair[0] < pair[1]);
        } else {
            assert!(pair[0] <= pair[1]);
        }
    }
}

// =============================================================================
// Partition Tests
// =============================================================================

#[test]
fn test_thousand_distinct_entries() {
    let mut heap = DedupHeap::new(1);
    for id in 0..1000u64 {
        heap.add(&OptOutEntry::from_test_id(id, id * 3));
    }
    assert_eq!(heap.len(), 1000);

    let partition = heap.to_partition(false);
    assert_eq!(partition.len(), 1000);

    for id in 0..1000u64 {
        let hash = OptOutEntry::test_hash(id);
        assert_eq!(partition.get_opt_out_timestamp(&hash), (id * 3) as i64);
    }
    assert_ascending(&heap, false);
}

#[test]
fn test_merge_keeps_newest_timestamp() {
    let heap = heap_of(&[
        OptOutEntry::from_test_id(1, 2),
        OptOutEntry::from_test_id(1, 1),
    ]);

    let partition = heap.to_partition(true);
    assert_eq!(partition.len(), 1);
    assert_eq!(partition.get_opt_out_timestamp(&OptOutEntry::test_hash(1)), 2);
}

#[test]
fn test_merge_independent_of_insert_order() {
    for order in [[5u64, 9, 1], [1, 5, 9], [9, 1, 5]] {
        let mut entries: Vec<_> = order.iter().map(|&ts| OptOutEntry::from_test_id(7, ts)).collect();
        entries.push(OptOutEntry::from_test_id(3, 4));

        let partition = heap_of(&entries).to_partition(true);
        assert_eq!(partition.len(), 2);
        assert_eq!(partition.get_opt_out_timestamp(&OptOutEntry::test_hash(7)), 9);
        assert_eq!(partition.get_opt_out_timestamp(&OptOutEntry::test_hash(3)), 4);
    }
}

#[test]
fn test_no_merge_keeps_duplicates() {
    let heap = heap_of(&[
        OptOutEntry::from_test_id(1, 2),
        OptOutEntry::from_test_id(1, 1),
        OptOutEntry::from_test_id(2, 1),
    ]);

    let partition = heap.to_partition(false);
    assert_eq!(partition.len(), 3);
    assert_ascending(&heap, false);
}

#[test]
fn test_to_partition_leaves_heap_usable() {
    let mut heap = heap_of(&[OptOutEntry::from_test_id(1, 1), OptOutEntry::from_test_id(2, 2)]);
    let first = heap.to_partition(true);

    heap.add(&OptOutEntry::from_test_id(3, 3));
    let second = heap.to_partition(true);

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 3);
    assert!(second.contains(&OptOutEntry::test_hash(3)));
}

#[test]
fn test_empty_heap_yields_empty_partition() {
    let heap = DedupHeap::new(4);
    assert!(heap.is_empty());
    assert!(heap.to_partition(true).is_empty());
}

#[test]
fn test_tombstones_survive_merge() {
    let mut tombstone = OptOutEntry::from_test_id(4, 10);
    tombstone.is_tombstone = true;
    let heap = heap_of(&[OptOutEntry::from_test_id(4, 5), tombstone]);

    let partition = heap.to_partition(true);
    let merged = partition.get(0).unwrap();
    assert_eq!(merged.timestamp, 10);
    assert!(merged.is_tombstone);
}

// =============================================================================
// Bulk Insert Tests
// =============================================================================

#[test]
fn test_grows_past_initial_capacity() {
    let mut heap = DedupHeap::new(1);
    for id in 0..100u64 {
        heap.add(&OptOutEntry::from_test_id(id, id));
    }
    assert_eq!(heap.len(), 100);
    assert!(heap.capacity() >= 100);
    assert_eq!(heap.as_bytes().len(), 100 * ENTRY_SIZE);
}

#[test]
fn test_add_encoded() {
    let mut encoded = Vec::new();
    for id in (0..50u64).rev() {
        encoded.extend_from_slice(&OptOutEntry::from_test_id(id, id + 1).to_bytes());
    }

    let mut heap = DedupHeap::new(8);
    heap.add_encoded(&encoded);
    heap.add_encoded(&[]);

    assert_eq!(heap.len(), 50);
    let partition = heap.to_partition(true);
    assert_eq!(partition.get_opt_out_timestamp(&OptOutEntry::test_hash(49)), 50);
    assert_ascending(&heap, true);
}

#[test]
fn test_add_heap() {
    let left = heap_of(&[OptOutEntry::from_test_id(1, 1), OptOutEntry::from_test_id(2, 1)]);
    let mut right = heap_of(&[OptOutEntry::from_test_id(2, 8), OptOutEntry::from_test_id(3, 1)]);

    right.add_heap(&left);
    assert_eq!(right.len(), 4);

    let partition = right.to_partition(true);
    assert_eq!(partition.len(), 3);
    assert_eq!(partition.get_opt_out_timestamp(&OptOutEntry::test_hash(2)), 8);
}

#[test]
#[should_panic]
fn test_add_encoded_rejects_partial_entry() {
    let mut heap = DedupHeap::new(1);
    heap.add_encoded(&[0u8; ENTRY_SIZE + 1]);
}

#[test]
#[should_panic]
fn test_zero_capacity_panics() {
    DedupHeap::new(0);
}
