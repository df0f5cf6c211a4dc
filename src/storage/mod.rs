//! Storage Module
//!
//! Immutable sorted partitions and the on-disk file model shared by the
//! local cache and cloud storage.
//!
//! ## File Format
//! Delta and partition files are bare arrays of 72-byte entries with no
//! header or footer. Deltas are in append order; partitions are sorted
//! ascending by identity hash and deduplicated.
//! ```text
//! ┌──────────────┬──────────────┬─────┬──────────────┐
//! │ Entry 0 (72) │ Entry 1 (72) │ ... │ Entry n (72) │
//! └──────────────┴──────────────┴─────┴──────────────┘
//! ```
//!
//! ## File Names
//! `{delta|partition}-{replica:03}_{timestamp}_{8 hex}.dat`, where the
//! timestamp is RFC 3339 UTC with `:` escaped as `.`.

mod file_name;
mod partition;

use std::fs;
use std::path::{Path, PathBuf};

pub use file_name::{FileKind, OptOutFile, SYNTHETIC_REPLICA_ID};
pub use partition::SortedPartition;

use crate::entry::ENTRY_SIZE;
use crate::error::{OptOutError, Result};

// =============================================================================
// Partition Metadata
// =============================================================================

/// Metadata of a partition file written by compaction
#[derive(Debug, Clone)]
pub struct PartitionMeta {
    /// Path of the partition file in the local cache
    pub path: PathBuf,
    /// Number of entries after deduplication
    pub entry_count: u64,
    /// File size in bytes
    pub file_size: u64,
    /// CRC32 of the file contents
    pub crc32: u32,
}

// =============================================================================
// File Helpers
// =============================================================================

/// Read a delta or partition file, checking it holds whole entries
pub fn read_entry_file(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    if bytes.len() % ENTRY_SIZE != 0 {
        return Err(OptOutError::Codec(format!(
            "{}: {} bytes is not a multiple of {}",
            path.display(),
            bytes.len(),
            ENTRY_SIZE
        )));
    }
    Ok(bytes)
}

/// Write `bytes` to `path` through a temporary file and rename
pub(crate) fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
