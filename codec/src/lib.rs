//! Encode and decode fixed-width chain header records.
//!
//! # Overview
//!
//! Every record in the chain encodes to the same number of bytes, so stores can locate
//! record `n` at byte `n * RECORD_SIZE` without an index. The parent digest of a record is
//! not stored with it: it is the digest of the preceding record, and decoders receive it
//! as a 32-byte prefix (see [RawRecord]).
//!
//! # Example
//!
//! ```
//! use headerchain_codec::{Digest, HeaderRecord, RECORD_SIZE};
//!
//! let record = HeaderRecord {
//!     version: 1,
//!     merkle_root: Digest::from([1u8; 32]),
//!     time: 1_231_006_505,
//!     difficulty_target: 0x1d00_ffff,
//!     nonce: 7,
//!     height: 0,
//!     chain_work: 1,
//!     digest: Digest::from([2u8; 32]),
//!     parent: Digest::EMPTY,
//! };
//! let encoded = record.encode().unwrap();
//! assert_eq!(encoded.len(), RECORD_SIZE);
//!
//! let raw = record.to_raw().unwrap();
//! assert_eq!(raw.decode().unwrap(), record);
//! ```

mod codec;
pub use codec::{at_least, DecodeFixed, EncodeFixed, FixedSize, Read, Write};
pub mod error;
pub use error::Error;
mod types;
pub use types::{
    digest::{Digest, DIGEST_LENGTH},
    record::{digest_of, HeaderRecord, RawRecord, DIGEST_OFFSET, RAW_RECORD_SIZE, RECORD_SIZE},
};
