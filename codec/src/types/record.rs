//! Fixed-width header records.
//!
//! # Format
//!
//! A record encodes to exactly [RECORD_SIZE] bytes. Integers are big-endian.
//!
//! ```text
//! +---------+-------------+------+--------+-------+--------+------------+--------+
//! | version | merkle root | time | target | nonce | height | chain work | digest |
//! |    4    |     32      |  4   |   4    |   4   |   4    |     8      |   32   |
//! +---------+-------------+------+--------+-------+--------+------------+--------+
//! ```
//!
//! The parent digest is not part of the record. Stores reconstruct it from the preceding
//! record (or a configured initial parent) and hand it to the decoder as a 32-byte prefix,
//! forming a [RawRecord] of [RAW_RECORD_SIZE] bytes.

use crate::{at_least, Digest, Error, FixedSize, Read, Write, DIGEST_LENGTH};
use bytes::{Buf, BufMut};

/// Encoded size of a [HeaderRecord], excluding its parent digest.
pub const RECORD_SIZE: usize = 92;

/// Size of a [RawRecord]: the parent digest followed by an encoded record.
pub const RAW_RECORD_SIZE: usize = DIGEST_LENGTH + RECORD_SIZE;

/// Offset of the record's own digest within its [RECORD_SIZE] encoding.
pub const DIGEST_OFFSET: usize = RECORD_SIZE - DIGEST_LENGTH;

/// Returns the digest stored in an encoded record.
///
/// # Panics
///
/// Panics if `encoded` is shorter than [RECORD_SIZE].
pub fn digest_of(encoded: &[u8]) -> Digest {
    let mut out = [0u8; DIGEST_LENGTH];
    out.copy_from_slice(&encoded[DIGEST_OFFSET..RECORD_SIZE]);
    Digest::from(out)
}

/// One entry in the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderRecord {
    pub version: u32,
    pub merkle_root: Digest,
    pub time: u32,
    pub difficulty_target: u32,
    pub nonce: u32,
    pub height: i32,
    /// Cumulative work up to and including this record. Must fit in 8 bytes to be encoded.
    pub chain_work: u128,
    pub digest: Digest,
    pub parent: Digest,
}

impl HeaderRecord {
    /// Encodes the record (without its parent) into [RECORD_SIZE] bytes.
    ///
    /// Fails with [Error::ChainWorkOverflow] if `chain_work` exceeds `u64::MAX`.
    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], Error> {
        let work =
            u64::try_from(self.chain_work).map_err(|_| Error::ChainWorkOverflow(self.chain_work))?;
        let mut array = [0u8; RECORD_SIZE];
        let mut buf = &mut array[..];
        self.version.write(&mut buf);
        self.merkle_root.write(&mut buf);
        self.time.write(&mut buf);
        self.difficulty_target.write(&mut buf);
        self.nonce.write(&mut buf);
        self.height.write(&mut buf);
        work.write(&mut buf);
        self.digest.write(&mut buf);
        debug_assert!(buf.is_empty());
        Ok(array)
    }

    /// Encodes the record prefixed by its parent digest.
    pub fn to_raw(&self) -> Result<RawRecord, Error> {
        Ok(RawRecord::new(&self.parent, &self.encode()?))
    }
}

impl Read for HeaderRecord {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        at_least(buf, RAW_RECORD_SIZE)?;
        let parent = Digest::read(buf)?;
        let version = u32::read(buf)?;
        let merkle_root = Digest::read(buf)?;
        let time = u32::read(buf)?;
        let difficulty_target = u32::read(buf)?;
        let nonce = u32::read(buf)?;
        let height = i32::read(buf)?;
        let chain_work = u64::read(buf)? as u128;
        let digest = Digest::read(buf)?;
        Ok(Self {
            version,
            merkle_root,
            time,
            difficulty_target,
            nonce,
            height,
            chain_work,
            digest,
            parent,
        })
    }
}

impl FixedSize for HeaderRecord {
    const SIZE: usize = RAW_RECORD_SIZE;
}

/// An encoded record together with its parent digest.
#[derive(Clone, PartialEq, Eq)]
pub struct RawRecord([u8; RAW_RECORD_SIZE]);

impl RawRecord {
    /// Joins a parent digest and an encoded record.
    pub fn new(parent: &Digest, encoded: &[u8; RECORD_SIZE]) -> Self {
        let mut array = [0u8; RAW_RECORD_SIZE];
        array[..DIGEST_LENGTH].copy_from_slice(parent.as_ref());
        array[DIGEST_LENGTH..].copy_from_slice(encoded);
        Self(array)
    }

    /// Copies a raw record out of a slice of exactly [RAW_RECORD_SIZE] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        if slice.len() < RAW_RECORD_SIZE {
            return Err(Error::EndOfBuffer);
        }
        if slice.len() > RAW_RECORD_SIZE {
            return Err(Error::ExtraData(slice.len() - RAW_RECORD_SIZE));
        }
        let mut array = [0u8; RAW_RECORD_SIZE];
        array.copy_from_slice(slice);
        Ok(Self(array))
    }

    /// The parent digest prefix.
    pub fn parent(&self) -> Digest {
        let mut out = [0u8; DIGEST_LENGTH];
        out.copy_from_slice(&self.0[..DIGEST_LENGTH]);
        Digest::from(out)
    }

    /// The encoded record, without the parent prefix.
    pub fn record(&self) -> &[u8] {
        &self.0[DIGEST_LENGTH..]
    }

    /// The digest of the record itself.
    pub fn digest(&self) -> Digest {
        digest_of(self.record())
    }

    /// The full [RAW_RECORD_SIZE] bytes.
    pub fn as_bytes(&self) -> &[u8; RAW_RECORD_SIZE] {
        &self.0
    }

    /// Decodes the full record, parent included.
    pub fn decode(&self) -> Result<HeaderRecord, Error> {
        HeaderRecord::read(&mut &self.0[..])
    }
}

impl From<[u8; RAW_RECORD_SIZE]> for RawRecord {
    fn from(value: [u8; RAW_RECORD_SIZE]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for RawRecord {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for RawRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRecord")
            .field("parent", &self.parent())
            .field("digest", &self.digest())
            .finish()
    }
}

impl Write for RawRecord {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl Read for RawRecord {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        at_least(buf, RAW_RECORD_SIZE)?;
        let mut array = [0u8; RAW_RECORD_SIZE];
        buf.copy_to_slice(&mut array);
        Ok(Self(array))
    }
}

impl FixedSize for RawRecord {
    const SIZE: usize = RAW_RECORD_SIZE;
}
