//! Sorted partition
//!
//! Immutable, binary-searchable run of entries produced by
//! `DedupHeap::to_partition`.

use bytes::Bytes;

use crate::entry::{codec, IdentityHash, OptOutEntry, ENTRY_SIZE};
use crate::filter::BloomFilter;

/// Entries sorted ascending by identity hash
///
/// Cloning is cheap (shared buffer) and any number of threads may read
/// concurrently.
#[derive(Debug, Clone)]
pub struct SortedPartition {
    data: Bytes,
}

impl SortedPartition {
    /// Wrap bytes that are already sorted by identity hash
    pub(crate) fn from_sorted(data: Bytes) -> Self {
        debug_assert!(data.len() % ENTRY_SIZE == 0);
        Self { data }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.data.len() / ENTRY_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if an entry with this identity hash exists
    pub fn contains(&self, identity_hash: &IdentityHash) -> bool {
        self.find(identity_hash).is_some()
    }

    /// Timestamp of the entry with this identity hash, or -1 if absent
    pub fn get_opt_out_timestamp(&self, identity_hash: &IdentityHash) -> i64 {
        match self.find(identity_hash) {
            Some(slot) => codec::read_timestamp(&self.data, slot * ENTRY_SIZE) as i64,
            None => -1,
        }
    }

    /// Decode the entry at `index`
    pub fn get(&self, index: usize) -> Option<OptOutEntry> {
        (index < self.len()).then(|| codec::parse(&self.data, index * ENTRY_SIZE))
    }

    /// Decode all entries in order
    pub fn iter(&self) -> impl Iterator<Item = OptOutEntry> + '_ {
        (0..self.len()).map(move |i| codec::parse(&self.data, i * ENTRY_SIZE))
    }

    /// The encoded entries, ready to write as a partition file
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bloom filter over every identity hash, sized for ~1% load
    pub fn build_bloom_filter(&self) -> BloomFilter {
        let mut filter = BloomFilter::new(BloomFilter::ideal_capacity(self.len()));
        for slot in 0..self.len() {
            filter.add(codec::identity_hash(&self.data, slot * ENTRY_SIZE));
        }
        filter
    }

    /// Binary search on identity hash; returns the slot index
    fn find(&self, identity_hash: &IdentityHash) -> Option<usize> {
        let target: &[u8] = identity_hash;
        let mut low = 0;
        let mut high = self.len();

        while low < high {
            let mid = low + (high - low) / 2;
            match codec::identity_hash(&self.data, mid * ENTRY_SIZE).cmp(target) {
                std::cmp::Ordering::Less => low = mid + 1,
                std::cmp::Ordering::Greater => high = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }
}
