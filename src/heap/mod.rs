//! Heap Module
//!
//! In-memory accumulation of opt-out entries before compaction.
//!
//! ## Responsibilities
//! - Append raw 72-byte entries with O(log n) insert
//! - Keep entries in max-heap order by identity hash
//! - Produce a sorted, optionally deduplicated partition in one pass
//!
//! ## Data Structure Choice
//! A binary max-heap laid out in one contiguous byte arena with fixed
//! 72-byte slots (`slot(i) = i * 72`) instead of a vector of entry
//! objects. Sifting swaps slot bytes in place, so inserts never allocate
//! beyond arena growth.
//!
//! Mutation takes `&mut self`; share a heap across threads only behind a lock.

mod dedup;

pub use dedup::DedupHeap;
