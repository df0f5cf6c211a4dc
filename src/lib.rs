//! # optout
//!
//! Opt-out record storage, deduplication, and multi-replica replication:
//! - Fixed 72-byte binary entries with a versioned, bit-packed trailer
//! - Append-only byte-arena heap compacted into sorted, deduplicated partitions
//! - Single-probe bloom filter for fast negative lookups
//! - Time-based retention and replica turn-taking for compaction
//! - Convergence of a local file cache with shared cloud storage
//!
//! ## Architecture Overview
//!
//! ```text
//!   writers ──append──▶ ┌─────────────┐  rotate/upload  ┌──────────────┐
//!                       │ OptOutStore │ ───────────────▶│ CloudStorage │
//!                       │  (engine)   │ ◀───────────────│  (external)  │
//!                       └──────┬──────┘    download     └──────┬───────┘
//!                              │                               │ list
//!                   load/compact                      ┌────────▼──────────────┐
//!                              │                      │ ReplicationCoordinator│
//!                              ▼                      │ (diff, turn, gate)    │
//!                       ┌─────────────┐               └───────────────────────┘
//!                       │  DedupHeap  │
//!                       └──────┬──────┘
//!                              │ to_partition
//!                              ▼
//!                 ┌─────────────────────┐     ┌─────────────┐
//!                 │   SortedPartition   │────▶│ BloomFilter │
//!                 └─────────────────────┘     └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod entry;
pub mod filter;
pub mod heap;
pub mod storage;
pub mod retention;
pub mod replication;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{OptOutError, Result};
pub use config::Config;
pub use entry::{AdvertisingId, IdentityHash, OptOutEntry, ENTRY_SIZE};
pub use filter::BloomFilter;
pub use heap::DedupHeap;
pub use storage::{OptOutFile, SortedPartition};
pub use retention::RetentionPolicy;
pub use replication::{CloudStorage, CloudSync, ReplicationCoordinator};
pub use engine::OptOutStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
