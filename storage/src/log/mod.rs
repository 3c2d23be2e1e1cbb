//! An append-only log of header records.
//!
//! Records are stored back to back in a single blob (`headers`) within a caller-provided
//! `partition`. There is no header, footer, or checksum, so the number of records is always the
//! blob length divided by [RECORD_SIZE]:
//!
//! ```text
//! +----------+----------+----------+-----+------------+
//! | record_0 | record_1 | record_2 | ... | record_n-1 |
//! +----------+----------+----------+-----+------------+
//!
//! record_i occupies bytes [i * 92, i * 92 + 92)
//! ```
//!
//! # Chain Order
//!
//! Every appended record must name the digest of the previous record as its parent. The first
//! record names [Config::genesis_parent]. The log keeps the digest of its newest record in memory
//! and rejects any record that does not extend it with [Error::ChainOrder].
//!
//! # Buffering
//!
//! Appends are buffered in memory. The buffer is written when the next record would not fit, or
//! when `flush` is called. Buffered records can be read back but are lost if the process stops
//! before they are flushed. Flushed records are never rewritten.
//!
//! # Recovery
//!
//! On `init`, a trailing partial record (left by an interrupted write) is truncated and the digest
//! of the final complete record becomes the parent expected by the next append.
//!
//! # Example
//!
//! ```
//! use headerchain_codec::{Digest, HeaderRecord};
//! use headerchain_runtime::{memory, Context};
//! use headerchain_storage::log::{Config, DiskLog};
//!
//! let context = Context::new(memory::Storage::default());
//! let cfg = Config {
//!     partition: "log".into(),
//!     genesis_parent: Digest::EMPTY,
//!     write_buffer: 92_000,
//!     read_batch: 10_000,
//! };
//! let mut log = DiskLog::init(context, cfg).unwrap();
//!
//! let genesis = HeaderRecord {
//!     version: 1,
//!     merkle_root: Digest::from([1u8; 32]),
//!     time: 0,
//!     difficulty_target: 0x1d00_ffff,
//!     nonce: 0,
//!     height: 0,
//!     chain_work: 1,
//!     digest: Digest::from([2u8; 32]),
//!     parent: Digest::EMPTY,
//! };
//! assert_eq!(log.append(&genesis).unwrap(), 0);
//! log.flush().unwrap();
//! assert_eq!(log.read_hashes(0, 1).unwrap(), vec![genesis.digest]);
//! ```

mod storage;
pub use storage::DiskLog;

use headerchain_codec::{Digest, Error as CodecError};
use headerchain_runtime::Error as RError;
use thiserror::Error;

/// Name of the blob holding the records.
pub const BLOB_NAME: &[u8] = b"headers";

/// Errors that can occur when interacting with the log.
#[derive(Debug, Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(#[from] RError),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("record does not extend the log: expected parent {expected}, found {found}")]
    ChainOrder { expected: Digest, found: Digest },
    #[error("range {start}..{start}+{count} out of bounds (size {size})")]
    OutOfBounds { start: u64, count: u64, size: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Configuration for [DiskLog].
#[derive(Clone)]
pub struct Config {
    /// The `headerchain-runtime::Storage` partition to use for the log blob.
    pub partition: String,

    /// Parent digest of the record at position 0.
    pub genesis_parent: Digest,

    /// Size in bytes of the append buffer. Must hold at least one record.
    ///
    /// The buffer is written before an append that would overflow it.
    pub write_buffer: usize,

    /// Maximum number of records fetched per disk read by `read_hashes`.
    pub read_batch: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chain, record};
    use headerchain_codec::RECORD_SIZE;
    use headerchain_macros::test_traced;
    use headerchain_runtime::{fs, memory, Blob, Context, Metrics, Storage};

    fn config(partition: &str) -> Config {
        Config {
            partition: partition.into(),
            genesis_parent: Digest::EMPTY,
            write_buffer: 10 * RECORD_SIZE,
            read_batch: 7,
        }
    }

    #[test_traced]
    fn test_log_append_and_read() {
        let context = Context::new(memory::Storage::default());
        let mut log = DiskLog::init(context.clone(), config("test_partition")).unwrap();
        assert_eq!(log.size(), 0);
        assert_eq!(log.tip(), Digest::EMPTY);

        let records = chain(Digest::EMPTY, 25);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(log.append(record).unwrap(), i as u64);
        }
        assert_eq!(log.size(), 25);
        assert_eq!(log.tip(), records[24].digest);

        // Reads cover flushed and buffered records alike
        let hashes = log.read_hashes(0, 25).unwrap();
        let expected: Vec<Digest> = records.iter().map(|r| r.digest).collect();
        assert_eq!(hashes, expected);
        assert_eq!(log.read_hashes(18, 4).unwrap(), expected[18..22].to_vec());
        for (i, record) in records.iter().enumerate() {
            let raw = log.read_record(i as u64).unwrap();
            assert_eq!(raw.parent(), record.parent);
            assert_eq!(raw.decode().unwrap(), *record);
        }

        // Two automatic flushes of 10 records, 5 still buffered
        let buffer = context.encode();
        assert!(buffer.contains("tracked 25"));
        assert!(buffer.contains("synced_total 2"));
    }

    #[test_traced]
    fn test_log_chain_order() {
        let context = Context::new(memory::Storage::default());
        let mut log = DiskLog::init(context, config("test_partition")).unwrap();
        let records = chain(Digest::EMPTY, 3);
        log.append(&records[0]).unwrap();

        // Skipping a record breaks the chain
        let err = log.append(&records[2]).unwrap_err();
        assert!(matches!(
            err,
            Error::ChainOrder { expected, found }
                if expected == records[0].digest && found == records[1].digest
        ));

        // Nothing changed
        assert_eq!(log.size(), 1);
        assert_eq!(log.tip(), records[0].digest);
        log.append(&records[1]).unwrap();
        log.append(&records[2]).unwrap();
        assert_eq!(log.size(), 3);
    }

    #[test_traced]
    fn test_log_rejects_unencodable_record() {
        let context = Context::new(memory::Storage::default());
        let mut log = DiskLog::init(context, config("test_partition")).unwrap();
        let mut genesis = record(0, Digest::EMPTY);
        genesis.chain_work = u128::MAX;
        assert!(matches!(
            log.append(&genesis),
            Err(Error::Codec(CodecError::ChainWorkOverflow(_)))
        ));
        assert_eq!(log.size(), 0);
        assert_eq!(log.tip(), Digest::EMPTY);
    }

    #[test_traced]
    fn test_log_restart() {
        let context = Context::new(memory::Storage::default());
        let genesis_parent = Digest::from([9u8; 32]);
        let cfg = Config {
            genesis_parent,
            ..config("test_partition")
        };
        let records = chain(genesis_parent, 15);
        {
            let mut log = DiskLog::init(context.clone(), cfg.clone()).unwrap();
            for record in &records[..12] {
                log.append(record).unwrap();
            }
            log.close().unwrap();
        }

        // Re-initialize the log to simulate a restart
        let mut log = DiskLog::init(context.clone(), cfg.clone()).unwrap();
        assert_eq!(log.size(), 12);
        assert_eq!(log.tip(), records[11].digest);
        for record in &records[12..] {
            log.append(record).unwrap();
        }
        log.flush().unwrap();

        // Position 0 is prefixed by the configured genesis parent
        let raw = log.read_record(0).unwrap();
        assert_eq!(raw.parent(), genesis_parent);
        assert_eq!(raw.digest(), records[0].digest);

        let (_, len) = context.open("test_partition", BLOB_NAME).unwrap();
        assert_eq!(len, 15 * RECORD_SIZE as u64);
    }

    #[test_traced]
    fn test_log_flushes_before_buffering() {
        let context = Context::new(memory::Storage::default());
        let mut log = DiskLog::init(context.clone(), config("test_partition")).unwrap();
        let records = chain(Digest::EMPTY, 11);

        // A full buffer stays in memory until another record needs the room
        for record in &records[..10] {
            log.append(record).unwrap();
        }
        assert!(context.encode().contains("synced_total 0"));
        let (_, len) = context.open("test_partition", BLOB_NAME).unwrap();
        assert_eq!(len, 0);

        assert_eq!(log.append(&records[10]).unwrap(), 10);
        assert!(context.encode().contains("synced_total 1"));
        let (_, len) = context.open("test_partition", BLOB_NAME).unwrap();
        assert_eq!(len, 10 * RECORD_SIZE as u64);
        assert_eq!(log.size(), 11);
        assert_eq!(log.read_record(10).unwrap().decode().unwrap(), records[10]);
    }

    #[test_traced]
    fn test_log_unflushed_records_lost() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 14);
        {
            let mut log = DiskLog::init(context.clone(), config("test_partition")).unwrap();
            for record in &records {
                log.append(record).unwrap();
            }
            // Dropped without flushing
        }
        let log = DiskLog::init(context, config("test_partition")).unwrap();
        assert_eq!(log.size(), 10);
        assert_eq!(log.tip(), records[9].digest);
    }

    #[test_traced]
    fn test_log_truncates_partial_record() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 4);
        {
            let mut log = DiskLog::init(context.clone(), config("test_partition")).unwrap();
            for record in &records[..3] {
                log.append(record).unwrap();
            }
            log.close().unwrap();
        }

        // Simulate an interrupted write of the fourth record
        let (blob, len) = context.open("test_partition", BLOB_NAME).unwrap();
        let encoded = records[3].encode().unwrap();
        blob.write_at(&encoded[..40], len).unwrap();
        blob.sync().unwrap();

        let mut log = DiskLog::init(context.clone(), config("test_partition")).unwrap();
        assert_eq!(log.size(), 3);
        assert_eq!(log.tip(), records[2].digest);
        log.append(&records[3]).unwrap();
        log.flush().unwrap();
        assert_eq!(log.read_record(3).unwrap().decode().unwrap(), records[3]);

        let (_, len) = context.open("test_partition", BLOB_NAME).unwrap();
        assert_eq!(len, 4 * RECORD_SIZE as u64);
    }

    #[test_traced]
    fn test_log_out_of_bounds() {
        let context = Context::new(memory::Storage::default());
        let mut log = DiskLog::init(context, config("test_partition")).unwrap();
        assert!(matches!(
            log.read_record(0),
            Err(Error::OutOfBounds { start: 0, count: 1, size: 0 })
        ));
        for record in chain(Digest::EMPTY, 5) {
            log.append(&record).unwrap();
        }
        assert!(matches!(
            log.read_hashes(3, 3),
            Err(Error::OutOfBounds { start: 3, count: 3, size: 5 })
        ));
        assert!(matches!(
            log.read_hashes(u64::MAX, 2),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(log.read_hashes(5, 0).unwrap().is_empty());
    }

    #[test]
    fn test_log_invalid_config() {
        let context = Context::new(memory::Storage::default());
        let cfg = Config {
            write_buffer: RECORD_SIZE - 1,
            ..config("test_partition")
        };
        assert!(matches!(
            DiskLog::init(context.clone(), cfg),
            Err(Error::InvalidConfiguration(_))
        ));
        let cfg = Config {
            read_batch: 0,
            ..config("test_partition")
        };
        assert!(matches!(
            DiskLog::init(context, cfg),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test_traced]
    fn test_log_filesystem_layout() {
        let directory = tempfile::tempdir().unwrap();
        let context = Context::new(fs::Storage::new(fs::Config::new(directory.path())));
        let records = chain(Digest::EMPTY, 3);
        {
            let mut log = DiskLog::init(context.clone(), config("headers")).unwrap();
            for record in &records {
                log.append(record).unwrap();
            }
            log.close().unwrap();
        }

        // The file is nothing but the encoded records
        let path = directory
            .path()
            .join("headers")
            .join(hex::encode(BLOB_NAME));
        let bytes = std::fs::read(path).unwrap();
        let expected: Vec<u8> = records
            .iter()
            .flat_map(|r| r.encode().unwrap())
            .collect();
        assert_eq!(bytes, expected);

        let log = DiskLog::init(context, config("headers")).unwrap();
        assert_eq!(log.tip(), records[2].digest);
        log.destroy().unwrap();
        assert!(!directory
            .path()
            .join("headers")
            .join(hex::encode(BLOB_NAME))
            .exists());
    }
}
