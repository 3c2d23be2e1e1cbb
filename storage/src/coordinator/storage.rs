use super::{Config, Error, ALIGN_ATTEMPTS, REINDEX_BATCH};
use crate::{
    index::{Insert, Lookup, SparseHashIndex},
    log::DiskLog,
    window::{self, RamWindow},
};
use headerchain_codec::HeaderRecord;
use headerchain_runtime::{Metrics, Storage};
use prometheus_client::metrics::counter::Counter;
use tracing::{debug, warn};

/// Sequences writes across the log, window, and index.
pub struct Coordinator<E: Storage + Metrics> {
    log: DiskLog<E>,
    window: RamWindow<E>,
    index: SparseHashIndex,

    trailing: u64,
    chain_length: u64,
    // Height held by window slot 0
    offset: i64,
    // Whether the window's initial parent is known
    anchored: bool,

    reindexed: Counter,
    backfilled: Counter,
    evictions: Counter,
}

impl<E: Storage + Metrics> Coordinator<E> {
    /// Initialize the log, window, and index for a chain expected to reach `chain_length`.
    ///
    /// Nothing is read back from storage until [Coordinator::load] is called, which must happen
    /// before any `put` when reopening existing data.
    pub fn init(context: E, cfg: Config, chain_length: u64) -> Result<Self, Error> {
        if cfg.trailing == 0 || cfg.trailing >= cfg.window.capacity as u64 {
            return Err(Error::InvalidConfiguration(
                "trailing must be positive and smaller than the window capacity",
            ));
        }
        let log = DiskLog::init(context.with_label("log"), cfg.log)?;
        let window = RamWindow::init(context.with_label("window"), cfg.window)?;
        let index = SparseHashIndex::init(context.with_label("index"), cfg.index)?;

        // Initialize metrics
        let reindexed = Counter::default();
        let backfilled = Counter::default();
        let evictions = Counter::default();
        context.register(
            "reindexed",
            "Number of log records indexed on reload",
            reindexed.clone(),
        );
        context.register(
            "backfilled",
            "Number of window slots restored from the log",
            backfilled.clone(),
        );
        context.register(
            "evictions",
            "Number of times the window advanced",
            evictions.clone(),
        );

        let offset = chain_length as i64 - cfg.trailing as i64;
        debug!(chain_length, offset, "initialized coordinator");
        Ok(Self {
            log,
            window,
            index,
            trailing: cfg.trailing,
            chain_length,
            offset,
            anchored: false,
            reindexed,
            backfilled,
            evictions,
        })
    }

    pub fn log(&self) -> &DiskLog<E> {
        &self.log
    }

    pub fn window(&self) -> &RamWindow<E> {
        &self.window
    }

    pub fn index(&self) -> &SparseHashIndex {
        &self.index
    }

    /// Expected chain length, advanced by every eviction.
    pub fn chain_length(&self) -> u64 {
        self.chain_length
    }

    /// Height held by window slot 0 (negative while the chain is shorter than `trailing`).
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn trailing(&self) -> u64 {
        self.trailing
    }

    #[cfg(test)]
    pub(super) fn index_mut(&mut self) -> &mut SparseHashIndex {
        &mut self.index
    }

    #[cfg(test)]
    pub(super) fn window_mut(&mut self) -> &mut RamWindow<E> {
        &mut self.window
    }

    /// Index, window, and append `record`.
    ///
    /// The record must extend the log's tip, carry the next height, be encodable, and extend the
    /// window's newest record. A record failing any of these checks changes nothing. A collision
    /// in the index is returned, not treated as an error.
    pub fn put(&mut self, record: &HeaderRecord) -> Result<Insert, Error> {
        let expected = self.log.tip();
        if record.parent != expected {
            return Err(Error::ChainOrder {
                expected,
                found: record.parent,
            });
        }
        let height = self.log.size();
        if record.height as i64 != height as i64 {
            return Err(Error::UnexpectedHeight {
                expected: height,
                found: record.height,
            });
        }
        record.encode()?;

        // Check the window link before anything is written
        let height = height as i64;
        let shifts = self.shifts_to_hold(height);
        let step = self.step();
        let offset = self.offset + shifts as i64 * step as i64;
        let position = (height >= offset).then(|| (height - offset) as usize);
        if let Some(position) = position.filter(|_| self.anchored) {
            let expected = self.window.parent_after_shifts(position, step, shifts)?;
            if record.parent != expected {
                return Err(Error::Window(window::Error::ChainOrder {
                    position,
                    expected,
                    found: record.parent,
                }));
            }
        }

        let insert = self.index.put(&record.digest, height as u64)?;
        if let Insert::Collision { existing, .. } = insert {
            debug!(height, ?existing, "index collision");
        }

        if let Some(position) = position {
            for _ in 0..shifts {
                self.window.shift_down(step);
                self.advance();
            }
            if !self.anchored {
                self.window.set_initial_parent(record.parent);
                self.anchored = true;
            }
            self.window.put(record, position)?;
        }

        self.log.append(record)?;
        Ok(insert)
    }

    /// Slots the window moves on each eviction.
    fn step(&self) -> usize {
        self.window.capacity() - self.trailing as usize
    }

    /// Number of evictions needed before the window holds `height`.
    fn shifts_to_hold(&self, height: i64) -> usize {
        let capacity = self.window.capacity() as i64;
        let beyond = height - self.offset - capacity;
        if beyond < 0 {
            return 0;
        }
        (beyond / self.step() as i64 + 1) as usize
    }

    fn advance(&mut self) {
        let step = self.step() as u64;
        self.offset += step as i64;
        self.chain_length += step;
        self.evictions.inc();
        debug!(
            offset = self.offset,
            chain_length = self.chain_length,
            "advanced window"
        );
    }

    /// Flush the log and snapshot the window.
    pub fn persist(&mut self) -> Result<(), Error> {
        self.log.flush()?;
        self.window.persist()?;
        debug!(size = self.log.size(), offset = self.offset, "persisted");
        Ok(())
    }

    /// Reconcile the index and window with the log.
    pub fn load(&mut self) -> Result<(), Error> {
        let restored = self.window.load()?;
        let size = self.log.size();
        self.reindex(size)?;

        // A log that outgrew the expected chain moves the window to its tail
        if size > 0 {
            for _ in 0..self.shifts_to_hold(size as i64 - 1) {
                self.advance();
            }
        }
        if restored {
            self.align(size)?;
        }

        // Drop slots the log cannot back
        let end = size as i64 - self.offset;
        if end < self.window.capacity() as i64 {
            self.window.truncate(end.max(0) as usize);
        }

        // The record before slot 0 (or the genesis parent) anchors the window
        self.anchored = size > 0 && self.offset < size as i64;
        if self.anchored {
            let first = self.offset.max(0) as u64;
            let parent = self.log.read_record(first)?.parent();
            self.window.set_initial_parent(parent);
        }

        self.backfill(size)?;
        debug!(size, offset = self.offset, "loaded");
        Ok(())
    }

    fn reindex(&mut self, size: u64) -> Result<(), Error> {
        let recorded = self.index.recorded();
        if recorded > size {
            warn!(recorded, size, "index is ahead of the log");
            return Ok(());
        }
        let mut start = recorded;
        while start < size {
            let count = (size - start).min(REINDEX_BATCH);
            let hashes = self.log.read_hashes(start, count)?;
            for (i, digest) in hashes.iter().enumerate() {
                let position = start + i as u64;
                if let Insert::Collision { existing, .. } = self.index.put(digest, position)? {
                    warn!(position, ?existing, "collision while reindexing");
                }
            }
            self.reindexed.inc_by(count);
            start += count;
        }
        if recorded < size {
            debug!(from = recorded, to = size, "reindexed log");
        }
        Ok(())
    }

    /// Shift the restored window so that slot 0 holds the record at the current offset.
    fn align(&mut self, size: u64) -> Result<(), Error> {
        if self.window.first_populated().is_none() {
            debug!("window holds no records");
            return Ok(());
        }

        // Find the height of a populated slot, checking every candidate against the log
        let mut stored = None;
        for (slot, digest) in self.window.populated().take(ALIGN_ATTEMPTS) {
            let Lookup::Found(position) = self.index.position(&digest)? else {
                continue;
            };
            let position = position as u64;
            if position >= size || self.log.read_hashes(position, 1)?[0] != digest {
                continue;
            }
            stored = Some(position as i64 - slot as i64);
            break;
        }
        let Some(stored) = stored else {
            warn!("window could not be placed, rebuilding from log");
            self.window.truncate(0);
            return Ok(());
        };

        let delta = self.offset - stored;
        if delta > 0 {
            self.window.shift_down(delta as usize);
        } else if delta < 0 {
            self.window.shift_up(delta.unsigned_abs() as usize);
        }
        debug!(stored, offset = self.offset, "aligned window");
        Ok(())
    }

    /// Fill every blank slot whose height the log holds.
    fn backfill(&mut self, size: u64) -> Result<(), Error> {
        let start = self.offset.max(0);
        let end = (size as i64).min(self.offset + self.window.capacity() as i64);
        let mut filled = 0;
        for height in start..end {
            let position = (height - self.offset) as usize;
            if self.window.digest_at(position)?.is_some() {
                continue;
            }
            let raw = self.log.read_record(height as u64)?;
            self.window.put_raw(&raw, position)?;
            filled += 1;
        }
        self.backfilled.inc_by(filled);
        if filled > 0 {
            debug!(filled, "backfilled window");
        }
        Ok(())
    }

    /// Flush the log and close the store.
    ///
    /// The window is not snapshotted. Call [Coordinator::persist] first to keep it.
    pub fn close(self) -> Result<(), Error> {
        self.log.close()?;
        Ok(())
    }

    /// Remove the log and the window snapshot.
    pub fn destroy(self) -> Result<(), Error> {
        self.log.destroy()?;
        self.window.destroy()?;
        Ok(())
    }
}
