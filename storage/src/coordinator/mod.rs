//! Keep a [DiskLog], [RamWindow], and [SparseHashIndex] consistent during a chain download.
//!
//! # Ingestion
//!
//! Every record passed to [Coordinator::put] is checked against the log's tip and the window's
//! newest record, then indexed (digest to height), copied into the window if it is recent
//! enough, and appended to the log.
//!
//! The coordinator is created with the expected length of the chain. Records at heights at or
//! above `offset = chain_length - trailing` land in window slot `height - offset`. When a height
//! would land past the end of the window, the window is shifted down by
//! `capacity - trailing` slots and the offset (and expected chain length) advance by the same
//! amount. Evicted records remain readable from the log.
//!
//! # Reload
//!
//! The index lives only in memory and the window snapshot may have been taken at a different
//! offset. [Coordinator::load] reconciles both with the log:
//!
//! 1. Every record the index has not seen is read back from the log (in batches) and indexed.
//!    An index that already holds more records than the log is left as is.
//! 2. If the log reaches past the end of the window, the offset advances as it would have
//!    during ingestion.
//! 3. The window is placed at the current offset. The height of a populated slot is resolved
//!    through the index and confirmed against the log, then the window is shifted down (it is
//!    behind) or up (it is ahead) until it lines up. A window that holds nothing is left alone.
//! 4. Blank slots whose heights the log holds are backfilled directly from the log.
//!
//! [DiskLog]: crate::log::DiskLog
//! [RamWindow]: crate::window::RamWindow
//! [SparseHashIndex]: crate::index::SparseHashIndex

mod storage;
pub use storage::Coordinator;

use crate::{index, log, window};
use headerchain_codec::{Digest, Error as CodecError};
use thiserror::Error;

/// Default number of records behind the expected tip held in the window.
pub const TRAILING: u64 = 48_000;

/// Number of digests read from the log per batch while reindexing.
pub const REINDEX_BATCH: u64 = 10_000;

/// Number of populated window slots tried when placing the window on reload.
pub const ALIGN_ATTEMPTS: usize = 16;

/// Errors that can occur when interacting with the coordinator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("log error: {0}")]
    Log(#[from] log::Error),
    #[error("window error: {0}")]
    Window(#[from] window::Error),
    #[error("index error: {0}")]
    Index(#[from] index::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("record does not extend the chain: expected parent {expected}, found {found}")]
    ChainOrder { expected: Digest, found: Digest },
    #[error("record has height {found}, expected {expected}")]
    UnexpectedHeight { expected: u64, found: i32 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

/// Configuration for [Coordinator].
#[derive(Clone)]
pub struct Config {
    pub log: log::Config,
    pub window: window::Config,
    pub index: index::Config,

    /// Number of records behind the expected tip held in the window.
    ///
    /// Must be positive and smaller than the window capacity.
    pub trailing: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        index::{Insert, Lookup},
        test_utils::{chain, record},
        window::RamWindow,
    };
    use headerchain_codec::{HeaderRecord, RECORD_SIZE};
    use headerchain_macros::test_traced;
    use headerchain_runtime::{fs, memory, Context, Metrics};

    fn config(capacity: usize, trailing: u64) -> Config {
        Config {
            log: log::Config {
                partition: "headers".into(),
                genesis_parent: Digest::EMPTY,
                write_buffer: 10 * RECORD_SIZE,
                read_batch: 100,
            },
            window: window::Config {
                partition: "window".into(),
                capacity,
            },
            index: index::Config::default(),
            trailing,
        }
    }

    fn ingest<E: headerchain_runtime::Storage + Metrics>(
        coordinator: &mut Coordinator<E>,
        records: &[HeaderRecord],
    ) {
        for record in records {
            coordinator.put(record).unwrap();
        }
    }

    #[test_traced("INFO")]
    fn test_coordinator_reload_full_chain() {
        let context = Context::new(memory::Storage::default());
        let cfg = Config {
            log: log::Config {
                partition: "headers".into(),
                genesis_parent: Digest::EMPTY,
                write_buffer: 92_000,
                read_batch: 10_000,
            },
            window: window::Config {
                partition: "window".into(),
                capacity: window::CAPACITY,
            },
            index: index::Config::default(),
            trailing: TRAILING,
        };
        let records = chain(Digest::EMPTY, 200_000);
        {
            let mut coordinator = Coordinator::init(context.clone(), cfg.clone(), 200_000).unwrap();
            assert_eq!(coordinator.offset(), 152_000);
            ingest(&mut coordinator, &records);
            coordinator.persist().unwrap();
        }

        let mut coordinator = Coordinator::init(context.clone(), cfg, 200_000).unwrap();
        coordinator.load().unwrap();
        let first = coordinator.window().get(0).unwrap().unwrap();
        assert_eq!(first.height, 152_000);
        assert_eq!(first, records[152_000]);
        assert_eq!(
            coordinator.window().last_hash(),
            Some(records[199_999].digest)
        );
        assert_eq!(coordinator.log().size(), 200_000);
        assert_eq!(coordinator.index().recorded(), 200_000);
        for record in &records {
            assert!(coordinator.index().contains(&record.digest).unwrap());
        }

        let buffer = context.encode();
        assert!(buffer.contains("reindexed_total 200000"));
        assert!(buffer.contains("backfilled_total 0"));
    }

    #[test_traced]
    fn test_coordinator_reload_single_record() {
        let context = Context::new(memory::Storage::default());
        let cfg = config(window::CAPACITY, TRAILING);
        let genesis = record(0, Digest::EMPTY);
        {
            let mut coordinator = Coordinator::init(context.clone(), cfg.clone(), 1).unwrap();
            assert_eq!(coordinator.offset(), -47_999);
            assert!(matches!(
                coordinator.put(&genesis).unwrap(),
                Insert::Inserted { .. }
            ));
            coordinator.persist().unwrap();
        }

        let mut coordinator = Coordinator::init(context, cfg, 1).unwrap();
        coordinator.load().unwrap();
        assert_eq!(coordinator.index().recorded(), 1);
        assert!(coordinator.index().contains(&genesis.digest).unwrap());
        assert_eq!(coordinator.window().get(47_999).unwrap(), Some(genesis.clone()));
        assert_eq!(coordinator.window().populated().count(), 1);
        assert_eq!(coordinator.log().read_record(0).unwrap().decode().unwrap(), genesis);
    }

    #[test_traced]
    fn test_coordinator_evicts_on_growth() {
        let context = Context::new(memory::Storage::default());
        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 6).unwrap();
        let records = chain(Digest::EMPTY, 20);
        ingest(&mut coordinator, &records);

        // Three evictions of 4 slots each
        assert_eq!(coordinator.offset(), 12);
        assert_eq!(coordinator.chain_length(), 18);
        for (i, record) in records[12..].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }
        assert_eq!(coordinator.window().digest_at(8).unwrap(), None);
        assert_eq!(coordinator.window().digest_at(9).unwrap(), None);

        // Evicted records stay in the log
        assert_eq!(coordinator.log().size(), 20);
        assert_eq!(coordinator.log().read_record(3).unwrap().decode().unwrap(), records[3]);
        assert!(context.encode().contains("evictions_total 3"));
    }

    #[test_traced]
    fn test_coordinator_restart_after_eviction() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 24);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 6).unwrap();
            ingest(&mut coordinator, &records[..20]);
            assert_eq!(coordinator.offset(), 12);
            coordinator.persist().unwrap();
        }

        // The expected chain length is stale and the log already reaches past the window
        let mut coordinator = Coordinator::init(context, config(10, 6), 6).unwrap();
        assert_eq!(coordinator.offset(), 0);
        coordinator.load().unwrap();
        assert_eq!(coordinator.offset(), 12);
        assert_eq!(coordinator.chain_length(), 18);
        for (i, record) in records[12..20].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }

        assert!(matches!(
            coordinator.put(&records[20]).unwrap(),
            Insert::Inserted { .. }
        ));
        assert_eq!(coordinator.index().recorded(), 21);
        assert_eq!(coordinator.log().size(), 21);
        assert_eq!(coordinator.window().get(8).unwrap(), Some(records[20].clone()));

        // Evictions continue from the restored offset
        ingest(&mut coordinator, &records[21..]);
        assert_eq!(coordinator.offset(), 16);
        assert_eq!(coordinator.chain_length(), 22);
        for (i, record) in records[16..].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }
    }

    #[test_traced]
    fn test_coordinator_restart_after_eviction_without_snapshot() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 21);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 6).unwrap();
            ingest(&mut coordinator, &records[..20]);
            coordinator.close().unwrap();
        }

        // The window is rebuilt from the log tail
        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 6).unwrap();
        coordinator.load().unwrap();
        assert_eq!(coordinator.offset(), 12);
        assert_eq!(coordinator.window().populated().count(), 8);
        assert!(context.encode().contains("backfilled_total 8"));
        coordinator.put(&records[20]).unwrap();
        assert_eq!(coordinator.window().last_hash(), Some(records[20].digest));
    }

    #[test_traced]
    fn test_coordinator_rejects_broken_window_link() {
        let context = Context::new(memory::Storage::default());
        let mut coordinator = Coordinator::init(context, config(10, 6), 6).unwrap();
        let records = chain(Digest::EMPTY, 6);
        ingest(&mut coordinator, &records[..5]);

        // Replace the window's newest record with one the log has never seen
        let mut foreign = record(4, records[3].digest);
        foreign.digest = Digest::from([0xAB; 32]);
        coordinator.window_mut().put(&foreign, 4).unwrap();

        assert!(matches!(
            coordinator.put(&records[5]),
            Err(Error::Window(window::Error::ChainOrder { position: 5, expected, found }))
                if expected == foreign.digest && found == records[4].digest
        ));
        assert_eq!(coordinator.index().recorded(), 5);
        assert!(!coordinator.index().contains(&records[5].digest).unwrap());
        assert_eq!(coordinator.log().size(), 5);
        assert_eq!(coordinator.window().digest_at(5).unwrap(), None);
    }

    #[test_traced]
    fn test_coordinator_reload_partial_index() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 30);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 30).unwrap();
            ingest(&mut coordinator, &records);
            coordinator.persist().unwrap();
        }

        // The index already knows the first 12 records
        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 30).unwrap();
        for (position, record) in records[..12].iter().enumerate() {
            coordinator
                .index_mut()
                .put(&record.digest, position as u64)
                .unwrap();
        }
        coordinator.load().unwrap();
        assert_eq!(coordinator.index().recorded(), 30);
        for (position, record) in records.iter().enumerate() {
            assert_eq!(
                coordinator.index().position(&record.digest).unwrap(),
                Lookup::Found(position as u32)
            );
        }
        assert!(context.encode().contains("reindexed_total 18"));
    }

    #[test_traced]
    fn test_coordinator_index_ahead_of_log() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 15);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 15).unwrap();
            ingest(&mut coordinator, &records[..12]);
            coordinator.persist().unwrap();
        }

        // Indexed but never appended
        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 15).unwrap();
        for (position, record) in records.iter().enumerate() {
            coordinator
                .index_mut()
                .put(&record.digest, position as u64)
                .unwrap();
        }

        // Reload leaves the index alone and still restores the window
        coordinator.load().unwrap();
        assert_eq!(coordinator.index().recorded(), 15);
        assert!(context.encode().contains("reindexed_total 0"));
        assert_eq!(coordinator.window().last_hash(), Some(records[11].digest));

        // Offering an extra record again marks its entry ambiguous
        assert!(matches!(
            coordinator.put(&records[12]).unwrap(),
            Insert::Collision {
                existing: Some(12),
                ..
            }
        ));
        assert_eq!(
            coordinator.index().position(&records[12].digest).unwrap(),
            Lookup::Ambiguous
        );
        assert_eq!(coordinator.log().size(), 13);
    }

    #[test_traced]
    fn test_coordinator_reload_window_ahead() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 21);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 20).unwrap();
            ingest(&mut coordinator, &records[..20]);
            coordinator.persist().unwrap();
        }

        // A shorter expected chain moves the offset from 14 to 11
        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 17).unwrap();
        coordinator.load().unwrap();
        for (i, record) in records[11..20].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }
        assert_eq!(coordinator.window().digest_at(9).unwrap(), None);
        let buffer = context.encode();
        assert!(buffer.contains("backfilled_total 3"));
        assert!(buffer.contains("window_shifts_total 1"));

        // Ingestion continues where the log left off
        coordinator.put(&records[20]).unwrap();
        assert_eq!(coordinator.window().last_hash(), Some(records[20].digest));
    }

    #[test_traced]
    fn test_coordinator_reload_window_behind() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 16);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 14).unwrap();
            ingest(&mut coordinator, &records);
            assert_eq!(coordinator.window().populated().count(), 8);
            coordinator.persist().unwrap();
        }

        // A longer expected chain moves the offset from 8 to 14
        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 20).unwrap();
        coordinator.load().unwrap();
        assert_eq!(coordinator.window().get(0).unwrap(), Some(records[14].clone()));
        assert_eq!(coordinator.window().get(1).unwrap(), Some(records[15].clone()));
        assert_eq!(coordinator.window().populated().count(), 2);
        assert!(context.encode().contains("backfilled_total 0"));
    }

    #[test_traced]
    fn test_coordinator_repairs_stale_window() {
        let context = Context::new(memory::Storage::default());
        let cfg = Config {
            log: log::Config {
                write_buffer: 2 * RECORD_SIZE,
                ..config(10, 6).log
            },
            ..config(10, 6)
        };
        let records = chain(Digest::EMPTY, 13);
        {
            let mut coordinator = Coordinator::init(context.clone(), cfg.clone(), 10).unwrap();
            ingest(&mut coordinator, &records[..8]);
            coordinator.persist().unwrap();

            // Flushed to the log (two at a time) but never snapshotted, the last one is lost
            ingest(&mut coordinator, &records[8..]);
        }

        let mut coordinator = Coordinator::init(context.clone(), cfg, 10).unwrap();
        coordinator.load().unwrap();
        assert_eq!(coordinator.log().size(), 12);
        for (i, record) in records[4..12].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }
        assert!(context.encode().contains("backfilled_total 4"));

        coordinator.put(&records[12]).unwrap();
        assert_eq!(coordinator.window().get(8).unwrap(), Some(records[12].clone()));
    }

    #[test_traced]
    fn test_coordinator_rebuilds_foreign_window() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 20);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 20).unwrap();
            ingest(&mut coordinator, &records);
            coordinator.persist().unwrap();
        }

        // Overwrite the snapshot with records the log has never seen
        {
            let mut parent = Digest::EMPTY;
            let foreign: Vec<HeaderRecord> = (0..6)
                .map(|height| {
                    let mut record = record(height, parent);
                    record.digest = Digest::from([0xAA ^ height as u8; 32]);
                    parent = record.digest;
                    record
                })
                .collect();
            let mut window = RamWindow::init(context.with_label("foreign"), config(10, 6).window)
                .unwrap();
            window.set_initial_parent(Digest::EMPTY);
            for (i, record) in foreign.iter().enumerate() {
                window.put(record, i).unwrap();
            }
            window.persist().unwrap();
        }

        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 20).unwrap();
        coordinator.load().unwrap();
        for (i, record) in records[14..].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }
        assert!(context.encode().contains("backfilled_total 6"));
    }

    #[test_traced]
    fn test_coordinator_blank_window() {
        let context = Context::new(memory::Storage::default());
        let records = chain(Digest::EMPTY, 26);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 30).unwrap();
            ingest(&mut coordinator, &records[..5]);
            coordinator.persist().unwrap();
        }

        // Nothing ever reached the window
        let mut coordinator = Coordinator::init(context, config(10, 6), 30).unwrap();
        coordinator.load().unwrap();
        assert_eq!(coordinator.window().first_hash(), Digest::EMPTY);
        assert_eq!(coordinator.window().first_populated(), None);
        assert_eq!(coordinator.index().recorded(), 5);

        ingest(&mut coordinator, &records[5..]);
        assert_eq!(coordinator.window().get(0).unwrap(), Some(records[24].clone()));
        assert_eq!(coordinator.window().get(1).unwrap(), Some(records[25].clone()));
    }

    #[test_traced]
    fn test_coordinator_rejects_without_side_effects() {
        let context = Context::new(memory::Storage::default());
        let mut coordinator = Coordinator::init(context, config(10, 6), 6).unwrap();
        let records = chain(Digest::EMPTY, 6);
        ingest(&mut coordinator, &records[..4]);

        // Skips a record
        assert!(matches!(
            coordinator.put(&records[5]),
            Err(Error::ChainOrder { expected, found })
                if expected == records[3].digest && found == records[4].digest
        ));

        // Links correctly but claims the wrong height
        let mut wrong_height = records[4].clone();
        wrong_height.height = 7;
        assert!(matches!(
            coordinator.put(&wrong_height),
            Err(Error::UnexpectedHeight { expected: 4, found: 7 })
        ));

        // Cannot be encoded
        let mut overflow = records[4].clone();
        overflow.chain_work = u128::MAX;
        assert!(matches!(
            coordinator.put(&overflow),
            Err(Error::Codec(CodecError::ChainWorkOverflow(_)))
        ));

        assert_eq!(coordinator.index().recorded(), 4);
        assert!(!coordinator.index().contains(&records[4].digest).unwrap());
        assert_eq!(coordinator.log().size(), 4);
        assert_eq!(coordinator.window().last_hash(), Some(records[3].digest));

        ingest(&mut coordinator, &records[4..]);
        assert_eq!(coordinator.log().tip(), records[5].digest);
    }

    #[test]
    fn test_coordinator_invalid_config() {
        let context = Context::new(memory::Storage::default());
        assert!(matches!(
            Coordinator::init(context.clone(), config(10, 10), 100),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Coordinator::init(context, config(10, 0), 100),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test_traced]
    fn test_coordinator_filesystem_restart() {
        let directory = tempfile::tempdir().unwrap();
        let context = Context::new(fs::Storage::new(fs::Config::new(directory.path())));
        let records = chain(Digest::EMPTY, 30);
        {
            let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 30).unwrap();
            ingest(&mut coordinator, &records[..20]);
            coordinator.persist().unwrap();
            coordinator.close().unwrap();
        }

        let mut coordinator = Coordinator::init(context.clone(), config(10, 6), 30).unwrap();
        coordinator.load().unwrap();
        assert_eq!(coordinator.log().size(), 20);
        ingest(&mut coordinator, &records[20..]);
        for (i, record) in records[24..].iter().enumerate() {
            assert_eq!(coordinator.window().get(i).unwrap(), Some(record.clone()));
        }
        coordinator.destroy().unwrap();
    }
}
