//! A fixed-capacity, in-memory window over the newest records of a chain.
//!
//! The window is an array of `capacity` slots, each holding one encoded record (or nothing, in
//! which case the slot is all zeros). Slot `i` holds the record at chain position
//! `offset + i`, where the offset is tracked by the caller.
//!
//! # Linkage
//!
//! Like [crate::log::DiskLog], the window only accepts records that extend their predecessor.
//! The expected parent of slot `i` is the digest stored in slot `i - 1`. Slot 0, and any slot
//! whose predecessor is blank, expects the window's initial parent instead, which must be set
//! with [RamWindow::set_initial_parent] before the first insert.
//!
//! # Shifting
//!
//! [RamWindow::shift_down] moves every slot toward the start of the window (evicting the oldest
//! records) and [RamWindow::shift_up] moves them toward the end. Slots are moved in chunks of
//! [SHIFT_CHUNK] and vacated slots are zeroed.
//!
//! # Snapshots
//!
//! [RamWindow::persist] writes all slots, blank or not, to a single blob (`window`) in the
//! configured partition:
//!
//! ```text
//! +--------+--------+-----+-------------------+
//! | slot_0 | slot_1 | ... | slot_capacity-1   |
//! +--------+--------+-----+-------------------+
//!
//! every slot is 92 bytes, blank slots are zeros
//! ```
//!
//! The initial parent is not part of the snapshot.

mod storage;
pub use storage::RamWindow;

use headerchain_codec::{Digest, Error as CodecError};
use headerchain_runtime::Error as RError;
use thiserror::Error;

/// Name of the blob holding the snapshot.
pub const SNAPSHOT_BLOB: &[u8] = b"window";

/// Number of slots moved per copy during a shift.
pub const SHIFT_CHUNK: usize = 1_000;

/// Default number of slots.
pub const CAPACITY: usize = 50_000;

/// Errors that can occur when interacting with the window.
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] RError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("record at slot {position} does not extend its predecessor: expected parent {expected}, found {found}")]
    ChainOrder {
        position: usize,
        expected: Digest,
        found: Digest,
    },
    #[error("slot {position} out of bounds (capacity {capacity})")]
    OutOfBounds { position: usize, capacity: usize },
    #[error("snapshot has {found} bytes, expected {expected}")]
    SnapshotSize { expected: u64, found: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Configuration for [RamWindow].
#[derive(Clone)]
pub struct Config {
    /// The `headerchain-runtime::Storage` partition to use for the snapshot blob.
    pub partition: String,

    /// Number of record slots held in memory.
    pub capacity: usize,
}
