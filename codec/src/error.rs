//! Error types for codec operations

use thiserror::Error;

/// Error type for codec operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("extra data found: {0} bytes")]
    ExtraData(usize),
    #[error("chain work does not fit in 8 bytes: {0}")]
    ChainWorkOverflow(u128),
    #[error("invalid data in {0}: {1}")]
    InvalidData(&'static str, &'static str), // context, message
}
