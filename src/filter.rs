//! Bloom filter over identity hashes
//!
//! A single-probe bit array addressed directly by the low-order bits of the
//! key. No hash function is applied: keys MUST already be uniformly
//! distributed (identity hashes are SHA-256 outputs). Feeding structured
//! keys makes the filter trivially gameable.
//!
//! ## Addressing
//! ```text
//! capacity = words * 64 = 2^(l1_bits + 6)
//! bf_index = LE(key[0..ceil((l1_bits + 6) / 8)]) & (capacity - 1)
//! word     = bf_index >> 6
//! bit      = bf_index & 63
//! ```

/// Upper bound returned by `ideal_capacity` (2^35 bits, 4 GiB)
pub const MAX_IDEAL_CAPACITY: usize = 1 << 35;

/// Bits per entry targeted by `ideal_capacity` (~1% load factor)
const BITS_PER_ENTRY: usize = 128;

/// Approximate membership structure keyed by pre-hashed bytes
#[derive(Debug, Clone)]
pub struct BloomFilter {
    words: Vec<u64>,
    /// log2(words.len())
    l1_bits: u32,
    /// Bytes of key consumed to build an address
    key_bytes: usize,
    /// Keys added (distinct addresses set)
    size: usize,
}

impl BloomFilter {
    /// Create a filter holding at least `capacity` bits
    ///
    /// The real capacity is the next power of two, and never below one word.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "bloom filter capacity must be positive");

        let bits = capacity.next_power_of_two().max(64);
        let words = bits / 64;
        let l1_bits = words.trailing_zeros();
        let key_bytes = (l1_bits as usize + 6 + 7) / 8;

        Self {
            words: vec![0u64; words],
            l1_bits,
            key_bytes,
            size: 0,
        }
    }

    /// Capacity in bits targeting a ~1% load for `size` keys
    pub fn ideal_capacity(size: usize) -> usize {
        size.max(1)
            .next_power_of_two()
            .saturating_mul(BITS_PER_ENTRY)
            .min(MAX_IDEAL_CAPACITY)
    }

    /// Set the key's bit; false if it was already set
    pub fn add(&mut self, key: &[u8]) -> bool {
        let (word, bit) = self.address(key);
        let mask = 1u64 << bit;
        if self.words[word] & mask != 0 {
            return false;
        }
        self.words[word] |= mask;
        self.size += 1;
        true
    }

    /// False means definitely absent; true may be a false positive
    pub fn likely_contains(&self, key: &[u8]) -> bool {
        let (word, bit) = self.address(key);
        self.words[word] & (1u64 << bit) != 0
    }

    /// Clear every bit
    pub fn reset(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.size = 0;
    }

    /// Number of successful `add` calls since creation or reset
    pub fn size(&self) -> usize {
        self.size
    }

    /// Capacity in bits
    pub fn capacity(&self) -> usize {
        self.words.len() * 64
    }

    fn address(&self, key: &[u8]) -> (usize, u32) {
        assert!(
            key.len() >= self.key_bytes,
            "bloom filter key needs {} bytes, got {}",
            self.key_bytes,
            key.len()
        );

        let mut raw = [0u8; 8];
        raw[..self.key_bytes].copy_from_slice(&key[..self.key_bytes]);
        let mask = (1u64 << (self.l1_bits + 6)) - 1;
        let bf_index = u64::from_le_bytes(raw) & mask;

        ((bf_index >> 6) as usize, (bf_index & 63) as u32)
    }
}
