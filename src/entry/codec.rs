//! Entry codec
//!
//! Encoding and decoding of 72-byte entries at arbitrary buffer offsets.
//! Callers guarantee `offset + ENTRY_SIZE <= buffer.len()`; a shorter
//! buffer is a programming error and panics.

use super::{
    AdvertisingId, IdentityHash, OptOutEntry, ADVERTISING_ID_OFFSET, ENTRY_SIZE, HASH_SIZE,
    METADATA_OFFSET, TIMESTAMP_MASK, TIMESTAMP_OFFSET,
};

/// Bits 0-4 of the metadata byte
const IDENTITY_TYPE_MASK: u8 = 0x1F;

/// Bit 5 of the metadata byte
const TOMBSTONE_BIT: u8 = 1 << 5;

/// Shift of the 2-bit version field
const VERSION_SHIFT: u8 = 6;

/// Version written for 33-byte advertising ids
const TYPED_VERSION: u8 = 1;

#[inline]
fn check_bounds(buffer_len: usize, offset: usize) {
    assert!(
        offset + ENTRY_SIZE <= buffer_len,
        "entry at offset {} does not fit in buffer of {} bytes",
        offset,
        buffer_len
    );
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode the entry stored at `offset`
pub fn parse(buffer: &[u8], offset: usize) -> OptOutEntry {
    check_bounds(buffer.len(), offset);

    let metadata = buffer[offset + METADATA_OFFSET];
    let version = metadata >> VERSION_SHIFT;
    let identity_type = metadata & IDENTITY_TYPE_MASK;
    let is_tombstone = metadata & TOMBSTONE_BIT != 0;

    let mut identity_hash = [0u8; HASH_SIZE];
    identity_hash.copy_from_slice(&buffer[offset..offset + HASH_SIZE]);

    let mut id = [0u8; 32];
    id.copy_from_slice(&buffer[offset + ADVERTISING_ID_OFFSET..offset + TIMESTAMP_OFFSET]);
    let advertising_id = if version == 0 {
        AdvertisingId::Legacy(id)
    } else {
        AdvertisingId::Typed { identity_type, id }
    };

    OptOutEntry {
        identity_hash,
        advertising_id,
        timestamp: read_timestamp(buffer, offset),
        is_tombstone,
    }
}

/// Read only the identity hash of the entry at `offset`
#[inline]
pub fn identity_hash(buffer: &[u8], offset: usize) -> &[u8] {
    &buffer[offset..offset + HASH_SIZE]
}

/// Read only the 56-bit timestamp of the entry at `offset`
#[inline]
pub fn read_timestamp(buffer: &[u8], offset: usize) -> u64 {
    let start = offset + TIMESTAMP_OFFSET;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buffer[start..start + 8]);
    u64::from_le_bytes(raw) & TIMESTAMP_MASK
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode `entry` into `buffer` at `offset`
///
/// Timestamps wider than 56 bits are truncated.
pub fn write(entry: &OptOutEntry, buffer: &mut [u8], offset: usize) {
    check_bounds(buffer.len(), offset);

    buffer[offset..offset + HASH_SIZE].copy_from_slice(&entry.identity_hash);
    buffer[offset + ADVERTISING_ID_OFFSET..offset + TIMESTAMP_OFFSET]
        .copy_from_slice(entry.advertising_id.id_bytes());

    let mut metadata = match entry.advertising_id {
        AdvertisingId::Legacy(_) => 0,
        AdvertisingId::Typed { identity_type, .. } => {
            (TYPED_VERSION << VERSION_SHIFT) | (identity_type & IDENTITY_TYPE_MASK)
        }
    };
    if entry.is_tombstone {
        metadata |= TOMBSTONE_BIT;
    }

    let start = offset + TIMESTAMP_OFFSET;
    let timestamp = entry.timestamp & TIMESTAMP_MASK;
    buffer[start..start + 8].copy_from_slice(&timestamp.to_le_bytes());
    buffer[offset + METADATA_OFFSET] |= metadata;
}

// =============================================================================
// Reserved Hashes
// =============================================================================

/// True for the reserved all-zero and all-one identity hashes
pub fn is_special_hash(hash: &IdentityHash) -> bool {
    hash.iter().all(|&b| b == 0x00) || hash.iter().all(|&b| b == 0xFF)
}
