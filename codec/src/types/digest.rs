//! A 32-byte content hash.

use crate::{at_least, Error, FixedSize, Read, Write};
use bytes::{Buf, BufMut};
use std::{
    fmt::{Debug, Display},
    ops::Deref,
};

/// Size of a [Digest] in bytes.
pub const DIGEST_LENGTH: usize = 32;

/// Content hash of a header record.
///
/// The all-zero digest doubles as the blank sentinel: an unwritten slot and the conventional
/// parent of a genesis record both read back as [Digest::EMPTY].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    /// The all-zero digest.
    pub const EMPTY: Self = Self([0u8; DIGEST_LENGTH]);

    /// Returns true if every byte is zero.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; DIGEST_LENGTH]
    }

    /// Copies a digest out of a slice of exactly [DIGEST_LENGTH] bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, Error> {
        let array: [u8; DIGEST_LENGTH] = slice
            .try_into()
            .map_err(|_| Error::InvalidData("Digest", "slice is not 32 bytes"))?;
        Ok(Self(array))
    }
}

impl From<[u8; DIGEST_LENGTH]> for Digest {
    fn from(value: [u8; DIGEST_LENGTH]) -> Self {
        Self(value)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Digest {
    type Target = [u8; DIGEST_LENGTH];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Write for Digest {
    fn write(&self, buf: &mut impl BufMut) {
        buf.put_slice(&self.0);
    }
}

impl Read for Digest {
    fn read(buf: &mut impl Buf) -> Result<Self, Error> {
        at_least(buf, DIGEST_LENGTH)?;
        let mut array = [0u8; DIGEST_LENGTH];
        buf.copy_to_slice(&mut array);
        Ok(Self(array))
    }
}

impl FixedSize for Digest {
    const SIZE: usize = DIGEST_LENGTH;
}

impl Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
