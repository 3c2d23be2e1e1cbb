//! A sparse, approximate index from record digest to chain position.
//!
//! The index never stores full digests. Each bucket keeps a 28-bit sample of the digest (bytes 28
//! to 30 and the high nibble of byte 31) next to a 20-bit position, packing an entry into 6 bytes.
//! Distinct digests can share a sample, so a lookup answers "some indexed digest with this sample
//! lives at this position". Callers that need certainty confirm the answer against the log.
//!
//! # Format
//!
//! ```text
//! +-----------+-----------+-----------+----------------------+-----------+-----------+
//! |  d[28]    |  d[29]    |  d[30]    | d[31] & 0xF0 | p>>16 | (p>>8)&FF |   p&FF    |
//! +-----------+-----------+-----------+----------------------+-----------+-----------+
//!
//! d = digest, p = position (20 bits)
//! ```
//!
//! A bucket of all zeros is empty. A position of `0xFFFFF` marks an ambiguous entry: two inserted
//! digests with the same sample met during probing, and neither position can be trusted.
//!
//! # Probing
//!
//! The base bucket of a digest is derived from its low 20 bits (the low nibble of byte 29, then
//! bytes 30 and 31), scaled by `0.98 * slots / 0xFFFFF` so the top of the table is reserved for
//! overflow. Probing visits `base, base+1, base-1, base+2, base-2, ...` and continues in one
//! direction once either end of the table is reached.
//!
//! Inserts only land on "valid" slots, those not divisible by the current `held_back` stride. The
//! stride starts at 2 and doubles whenever an insert travels at least 50 slots from its base (while
//! the stride is below 50,000). Lookups ignore the stride.
//!
//! Each base bucket remembers the largest distance any insert from it travelled (at most 255).
//! Lookups stop once they pass that distance. Inserts that find an empty slot within that distance
//! keep scanning up to it, so that an earlier digest with the same sample is still detected.
//!
//! # Collisions
//!
//! When an insert meets a bucket holding the same sample, the existing entry wins: `put` returns
//! [Insert::Collision] with the stored position and marks the bucket ambiguous. Every `put` counts
//! towards [SparseHashIndex::recorded], collisions included, so the count always equals the number
//! of records offered to the index.

mod probe;
mod storage;
pub use storage::SparseHashIndex;

use headerchain_codec::Digest;
use thiserror::Error;

/// Number of buckets in a default table.
pub const SLOTS: usize = 262_143;

/// Largest address derivable from a digest (and the number of representable positions).
pub const ADDRESS_MASK: u32 = 0xFFFFF;

/// Position value reserved to mark an ambiguous bucket.
pub const AMBIGUOUS: u32 = ADDRESS_MASK;

/// Share of the table that base buckets are spread over.
pub const SCALE_FACTOR: f64 = 0.98;

/// Furthest an entry may be stored from its base bucket.
pub const MAX_DISTANCE: usize = u8::MAX as usize;

/// Stride of invalid slots before any growth.
pub const INITIAL_HELD_BACK: u32 = 2;

/// Insert distance at which the stride doubles.
pub const HELD_BACK_THRESHOLD: usize = 50;

/// The stride only doubles while below this value.
pub const HELD_BACK_CAP: u32 = 50_000;

/// Size of a packed bucket.
pub const BUCKET_SIZE: usize = 6;

/// Errors that can occur when interacting with the index.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no bucket available within {MAX_DISTANCE} slots of base {0}")]
    ProbeExhausted(usize),
    #[error("position {0} does not fit in a bucket")]
    ReservedPosition(u64),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Configuration for [SparseHashIndex].
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of buckets in the table.
    ///
    /// Must be smaller than `ADDRESS_MASK` so that scaled base buckets stay inside the table.
    pub slots: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self { slots: SLOTS }
    }
}

/// Result of [SparseHashIndex::put].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Insert {
    /// The digest was stored in `slot`.
    Inserted { slot: usize },
    /// A digest with the same sample was already stored in `slot`.
    ///
    /// `existing` is the position stored there, or `None` if the bucket was already ambiguous.
    Collision { slot: usize, existing: Option<u32> },
}

/// Result of [SparseHashIndex::position].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup {
    /// A bucket with the digest's sample holds this position.
    Found(u32),
    /// A bucket with the digest's sample exists but was marked by a collision.
    Ambiguous,
    /// No bucket with the digest's sample exists.
    Missing,
}

/// A packed index entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Bucket([u8; BUCKET_SIZE]);

impl Bucket {
    pub(crate) fn new(digest: &Digest, position: u32) -> Self {
        Self([
            digest[28],
            digest[29],
            digest[30],
            (digest[31] & 0xF0) | ((position >> 16) & 0x0F) as u8,
            (position >> 8) as u8,
            position as u8,
        ])
    }

    /// Whether the bucket has never been written.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; BUCKET_SIZE]
    }

    /// Whether the bucket holds the sample of `digest`.
    pub fn matches(&self, digest: &Digest) -> bool {
        self.0[0] == digest[28]
            && self.0[1] == digest[29]
            && self.0[2] == digest[30]
            && self.0[3] & 0xF0 == digest[31] & 0xF0
    }

    /// The stored position, unless the bucket is ambiguous.
    pub fn position(&self) -> Option<u32> {
        let position = ((self.0[3] & 0x0F) as u32) << 16 | (self.0[4] as u32) << 8 | self.0[5] as u32;
        (position != AMBIGUOUS).then_some(position)
    }

    pub fn as_bytes(&self) -> &[u8; BUCKET_SIZE] {
        &self.0
    }

    pub(crate) fn mark_ambiguous(&mut self) {
        self.0[3] |= 0x0F;
        self.0[4] = 0xFF;
        self.0[5] = 0xFF;
    }
}

/// Derive the 20-bit address of a digest.
pub(crate) fn address(digest: &Digest) -> u32 {
    ((digest[29] & 0x0F) as u32) << 16 | (digest[30] as u32) << 8 | digest[31] as u32
}

/// Multiplier applied to an address to find its base bucket.
pub(crate) fn scale(slots: usize) -> f64 {
    SCALE_FACTOR * slots as f64 / ADDRESS_MASK as f64
}

/// Check that the table size, address derivation, and bucket packing agree.
///
/// Run once by [SparseHashIndex::init].
pub fn validate(cfg: &Config) -> Result<(), Error> {
    // The address mask must be whole low bytes followed by contiguous low bits
    if ADDRESS_MASK & 0xFFFF != 0xFFFF {
        return Err(Error::InvalidConfiguration("address mask must cover two full bytes"));
    }
    let high = (ADDRESS_MASK >> 16) as u8;
    if high & high.wrapping_add(1) != 0 {
        return Err(Error::InvalidConfiguration("address mask high bits are not contiguous"));
    }

    // The packed position field holds exactly the address bits
    let saturated = Digest::from([0xFF; 32]);
    if address(&saturated) != ADDRESS_MASK {
        return Err(Error::InvalidConfiguration("address does not span the mask"));
    }
    let largest = ADDRESS_MASK - 1;
    if Bucket::new(&saturated, largest).position() != Some(largest) {
        return Err(Error::InvalidConfiguration("bucket cannot hold the largest position"));
    }
    let mut marked = Bucket::new(&saturated, 0);
    marked.mark_ambiguous();
    if marked.position().is_some() || !marked.matches(&saturated) {
        return Err(Error::InvalidConfiguration("ambiguous marker overlaps the sample"));
    }

    // Base buckets must leave headroom at the top of the table
    if cfg.slots == 0 || cfg.slots >= ADDRESS_MASK as usize {
        return Err(Error::InvalidConfiguration("slots must be in 1..0xFFFFF"));
    }
    let top = (ADDRESS_MASK as f64 * scale(cfg.slots)) as usize;
    if top >= cfg.slots {
        return Err(Error::InvalidConfiguration("scaled address exceeds the table"));
    }
    Ok(())
}
