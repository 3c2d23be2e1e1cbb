//! Persist, window, and index a chain of block headers.
//!
//! Records flow through three stores, each usable on its own:
//!
//! * [log::DiskLog]: every record, appended in chain order to a single blob.
//! * [window::RamWindow]: a fixed-capacity in-memory slice of the most recent records, with
//!   snapshot persistence.
//! * [index::SparseHashIndex]: a compact map from record digest to chain position.
//!
//! [coordinator::Coordinator] keeps the three consistent while headers are downloaded and
//! reconciles them after a restart.
//!
//! # Status
//!
//! `headerchain-storage` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

pub mod coordinator;
pub mod index;
pub mod log;
pub mod window;
