//! Entry Module
//!
//! The fixed-size opt-out record and its binary encoding.
//!
//! ## Wire Format (72 bytes, little-endian)
//! ```text
//! ┌──────────────────┬──────────────────┬──────────────┬──────────┐
//! │ IdentityHash(32) │ AdvertisingId(32)│ Timestamp(7) │ Meta (1) │
//! └──────────────────┴──────────────────┴──────────────┴──────────┘
//!                                         └─ u64 LE, low 56 bits ─┘
//! Meta: bits 0-4 identity type | bit 5 tombstone | bits 6-7 version
//! ```
//!
//! Version 0 entries carry a raw 32-byte advertising id. Later versions
//! carry a 33-byte id whose first byte (the identity type) lives in the
//! metadata byte.

pub mod codec;

use std::hash::{Hash, Hasher};

// =============================================================================
// Layout Constants
// =============================================================================

/// Size of one encoded entry
pub const ENTRY_SIZE: usize = 72;

/// Size of the identity hash key
pub const HASH_SIZE: usize = 32;

/// Offset of the advertising id field
pub const ADVERTISING_ID_OFFSET: usize = 32;

/// Offset of the timestamp field
pub const TIMESTAMP_OFFSET: usize = 64;

/// Offset of the metadata byte (top byte of the timestamp field)
pub const METADATA_OFFSET: usize = 71;

/// Mask for the 56-bit timestamp
pub const TIMESTAMP_MASK: u64 = 0x00FF_FFFF_FFFF_FFFF;

/// 32-byte identity hash
pub type IdentityHash = [u8; HASH_SIZE];

// =============================================================================
// Advertising Id
// =============================================================================

/// Advertising id carried by an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertisingId {
    /// Version 0: raw 32 bytes
    Legacy([u8; 32]),

    /// Versioned: identity type byte followed by 32 id bytes
    Typed { identity_type: u8, id: [u8; 32] },
}

impl AdvertisingId {
    /// Build from 32 (legacy) or 33 (typed) bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            32 => {
                let mut id = [0u8; 32];
                id.copy_from_slice(bytes);
                Some(Self::Legacy(id))
            }
            33 => {
                let mut id = [0u8; 32];
                id.copy_from_slice(&bytes[1..]);
                Some(Self::Typed {
                    identity_type: bytes[0],
                    id,
                })
            }
            _ => None,
        }
    }

    /// The 32 or 33 byte representation
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Legacy(id) => id.to_vec(),
            Self::Typed { identity_type, id } => {
                let mut bytes = Vec::with_capacity(33);
                bytes.push(*identity_type);
                bytes.extend_from_slice(id);
                bytes
            }
        }
    }

    /// Length of the byte representation (32 or 33)
    pub fn len(&self) -> usize {
        match self {
            Self::Legacy(_) => 32,
            Self::Typed { .. } => 33,
        }
    }

    /// The 32 bytes stored in the entry's advertising id field
    pub fn id_bytes(&self) -> &[u8; 32] {
        match self {
            Self::Legacy(id) => id,
            Self::Typed { id, .. } => id,
        }
    }
}

// =============================================================================
// Opt-Out Entry
// =============================================================================

/// A decoded opt-out record
///
/// Equality and hashing cover `identity_hash`, `advertising_id` and
/// `timestamp`; the tombstone flag does not participate.
#[derive(Debug, Clone)]
pub struct OptOutEntry {
    pub identity_hash: IdentityHash,
    pub advertising_id: AdvertisingId,
    /// Seconds since the unix epoch (56 bits significant)
    pub timestamp: u64,
    pub is_tombstone: bool,
}

impl OptOutEntry {
    /// Create a live (non-tombstone) entry
    pub fn new(identity_hash: IdentityHash, advertising_id: AdvertisingId, timestamp: u64) -> Self {
        Self {
            identity_hash,
            advertising_id,
            timestamp,
            is_tombstone: false,
        }
    }

    /// Deterministic entry derived from a numeric id
    ///
    /// Used by tests and benchmarks. The hash interleaves `id` and `!id`
    /// so that no id produces a reserved all-zero or all-one hash.
    pub fn from_test_id(id: u64, timestamp: u64) -> Self {
        let hash = Self::test_hash(id);
        Self::new(hash, AdvertisingId::Legacy(hash), timestamp)
    }

    /// The identity hash `from_test_id` assigns to `id`
    pub fn test_hash(id: u64) -> IdentityHash {
        let mut hash = [0u8; HASH_SIZE];
        for (i, chunk) in hash.chunks_exact_mut(8).enumerate() {
            let word = if i % 2 == 0 { id } else { !id };
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        hash
    }

    /// Encode into a fresh 72-byte buffer
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut buffer = [0u8; ENTRY_SIZE];
        codec::write(self, &mut buffer, 0);
        buffer
    }
}

impl PartialEq for OptOutEntry {
    fn eq(&self, other: &Self) -> bool {
        self.identity_hash == other.identity_hash
            && self.advertising_id == other.advertising_id
            && self.timestamp == other.timestamp
    }
}

impl Eq for OptOutEntry {}

impl Hash for OptOutEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_hash.hash(state);
        self.advertising_id.hash(state);
        self.timestamp.hash(state);
    }
}
