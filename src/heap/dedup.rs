//! DedupHeap implementation
//!
//! Byte-arena binary max-heap keyed by identity hash.

use bytes::Bytes;

use crate::entry::{codec, OptOutEntry, ENTRY_SIZE, HASH_SIZE};
use crate::storage::SortedPartition;

/// Append-only max-heap of encoded entries
pub struct DedupHeap {
    /// `capacity * ENTRY_SIZE` bytes; the first `len` slots are live
    arena: Vec<u8>,
    /// Live entries
    len: usize,
    /// Slots allocated
    capacity: usize,
}

impl DedupHeap {
    /// Create a heap with room for `capacity` entries
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "heap capacity must be positive");
        Self {
            arena: vec![0u8; capacity * ENTRY_SIZE],
            len: 0,
            capacity,
        }
    }

    /// Add one entry
    pub fn add(&mut self, entry: &OptOutEntry) {
        self.reserve(1);
        codec::write(entry, &mut self.arena, self.len * ENTRY_SIZE);
        self.len += 1;
        sift_up(&mut self.arena, self.len - 1);
    }

    /// Add every entry of an iterator
    pub fn add_all<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = &'a OptOutEntry>,
    {
        for entry in entries {
            self.add(entry);
        }
    }

    /// Add a run of already-encoded entries (e.g. a delta file's contents)
    ///
    /// `bytes.len()` must be a multiple of `ENTRY_SIZE`.
    pub fn add_encoded(&mut self, bytes: &[u8]) {
        assert!(
            bytes.len() % ENTRY_SIZE == 0,
            "encoded entries must be a multiple of {} bytes, got {}",
            ENTRY_SIZE,
            bytes.len()
        );

        let count = bytes.len() / ENTRY_SIZE;
        if count == 0 {
            return;
        }

        self.reserve(count);
        let start = self.len;
        self.arena[start * ENTRY_SIZE..(start + count) * ENTRY_SIZE].copy_from_slice(bytes);
        self.len += count;

        for slot in start..self.len {
            sift_up(&mut self.arena, slot);
        }
    }

    /// Add every entry of another heap
    pub fn add_heap(&mut self, other: &DedupHeap) {
        self.add_encoded(other.as_bytes());
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Slots currently allocated
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Live entries, in heap order
    pub fn as_bytes(&self) -> &[u8] {
        &self.arena[..self.len * ENTRY_SIZE]
    }

    /// Sort a copy of the heap into a partition
    ///
    /// Heapsort is not stable: entries sharing an identity hash come out in
    /// arbitrary relative order. With `merge_dups`, each run of equal hashes
    /// collapses to the run's entry with the greatest timestamp.
    pub fn to_partition(&self, merge_dups: bool) -> SortedPartition {
        let mut sorted = self.as_bytes().to_vec();
        let n = self.len;

        for end in (1..n).rev() {
            swap_slots(&mut sorted, 0, end);
            sift_down(&mut sorted, 0, end);
        }

        let count = if merge_dups {
            merge_sorted_duplicates(&mut sorted, n)
        } else {
            n
        };
        sorted.truncate(count * ENTRY_SIZE);

        SortedPartition::from_sorted(Bytes::from(sorted))
    }

    /// Grow so that `extra` more entries fit, at least doubling
    fn reserve(&mut self, extra: usize) {
        let needed = self.len + extra;
        if needed <= self.capacity {
            return;
        }
        let new_capacity = needed.max(self.capacity * 2);
        self.arena.resize(new_capacity * ENTRY_SIZE, 0);
        self.capacity = new_capacity;
    }
}

// =============================================================================
// Slot Helpers
// =============================================================================

#[inline]
fn key(arena: &[u8], slot: usize) -> &[u8] {
    let start = slot * ENTRY_SIZE;
    &arena[start..start + HASH_SIZE]
}

fn swap_slots(arena: &mut [u8], a: usize, b: usize) {
    if a == b {
        return;
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    let (head, tail) = arena.split_at_mut(high * ENTRY_SIZE);
    head[low * ENTRY_SIZE..(low + 1) * ENTRY_SIZE].swap_with_slice(&mut tail[..ENTRY_SIZE]);
}

fn sift_up(arena: &mut [u8], mut slot: usize) {
    while slot > 0 {
        let parent = (slot - 1) >> 1;
        if key(arena, slot) <= key(arena, parent) {
            break;
        }
        swap_slots(arena, slot, parent);
        slot = parent;
    }
}

/// Restore heap order below `slot`, considering only the first `len` slots
fn sift_down(arena: &mut [u8], mut slot: usize, len: usize) {
    loop {
        let left = 2 * slot + 1;
        if left >= len {
            break;
        }
        let right = left + 1;

        let mut largest = slot;
        if key(arena, left) > key(arena, largest) {
            largest = left;
        }
        if right < len && key(arena, right) > key(arena, largest) {
            largest = right;
        }
        if largest == slot {
            break;
        }
        swap_slots(arena, slot, largest);
        slot = largest;
    }
}

/// Collapse runs of equal hashes in a sorted arena; returns the surviving count
fn merge_sorted_duplicates(arena: &mut [u8], len: usize) -> usize {
    let mut kept = 0;
    for read in 0..len {
        if kept > 0 && key(arena, kept - 1) == key(arena, read) {
            let current = (kept - 1) * ENTRY_SIZE;
            if codec::read_timestamp(arena, read * ENTRY_SIZE) > codec::read_timestamp(arena, current) {
                arena.copy_within(read * ENTRY_SIZE..(read + 1) * ENTRY_SIZE, current);
            }
            continue;
        }
        if read != kept {
            arena.copy_within(read * ENTRY_SIZE..(read + 1) * ENTRY_SIZE, kept * ENTRY_SIZE);
        }
        kept += 1;
    }
    kept
}
