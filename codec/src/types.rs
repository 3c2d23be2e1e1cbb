//! Codec implementations for chain types.

pub mod digest;
pub mod record;
