use super::{Config, Error, SHIFT_CHUNK, SNAPSHOT_BLOB};
use headerchain_codec::{digest_of, Digest, HeaderRecord, RawRecord, RECORD_SIZE};
use headerchain_runtime::{Blob, Metrics, Storage};
use prometheus_client::metrics::counter::Counter;
use tracing::debug;

const BLANK: [u8; RECORD_SIZE] = [0; RECORD_SIZE];

/// Implementation of the record window.
pub struct RamWindow<E: Storage + Metrics> {
    context: E,
    cfg: Config,

    slots: Vec<[u8; RECORD_SIZE]>,
    initial_parent: Digest,

    blob: E::Blob,
    // Length of the snapshot blob
    persisted: u64,

    shifts: Counter,
    snapshots: Counter,
}

impl<E: Storage + Metrics> RamWindow<E> {
    /// Initialize a blank window.
    ///
    /// The snapshot blob is opened (and created if missing) but not read. Call
    /// [RamWindow::load] to restore a previous snapshot.
    pub fn init(context: E, cfg: Config) -> Result<Self, Error> {
        if cfg.capacity == 0 {
            return Err(Error::InvalidConfiguration("capacity must be positive"));
        }
        let (blob, persisted) = context.open(&cfg.partition, SNAPSHOT_BLOB)?;

        // Initialize metrics
        let shifts = Counter::default();
        let snapshots = Counter::default();
        context.register("shifts", "Number of window shifts", shifts.clone());
        context.register("snapshots", "Number of snapshots written", snapshots.clone());
        debug!(capacity = cfg.capacity, persisted, "initialized window");

        Ok(Self {
            context,
            slots: vec![BLANK; cfg.capacity],
            cfg,
            initial_parent: Digest::EMPTY,
            blob,
            persisted,
            shifts,
            snapshots,
        })
    }

    /// Number of slots in the window.
    pub fn capacity(&self) -> usize {
        self.cfg.capacity
    }

    /// Set the parent expected by slot 0 (and by any slot following a blank slot).
    pub fn set_initial_parent(&mut self, parent: Digest) {
        self.initial_parent = parent;
    }

    pub fn initial_parent(&self) -> Digest {
        self.initial_parent
    }

    fn check(&self, position: usize) -> Result<(), Error> {
        if position >= self.cfg.capacity {
            return Err(Error::OutOfBounds {
                position,
                capacity: self.cfg.capacity,
            });
        }
        Ok(())
    }

    /// Parent the record at `position` must name.
    pub fn parent_of(&self, position: usize) -> Result<Digest, Error> {
        self.parent_after_shifts(position, 0, 0)
    }

    /// Parent the record at `position` must name once the window has been shifted down `shifts`
    /// times by `step` slots, without shifting it.
    pub fn parent_after_shifts(
        &self,
        position: usize,
        step: usize,
        shifts: usize,
    ) -> Result<Digest, Error> {
        self.check(position)?;
        let capacity = self.cfg.capacity;
        let moved = step.saturating_mul(shifts);
        if position > 0 {
            let previous = (position - 1).saturating_add(moved);
            if previous < capacity && self.slots[previous] != BLANK {
                return Ok(digest_of(&self.slots[previous]));
            }
        }

        // The last shift to evict a populated slot re-anchors the window
        if step > 0 {
            for i in (1..=shifts).rev() {
                let slot = step.saturating_mul(i) - 1;
                if slot < capacity && self.slots[slot] != BLANK {
                    return Ok(digest_of(&self.slots[slot]));
                }
            }
        }
        Ok(self.initial_parent)
    }

    fn link(&self, position: usize, parent: Digest) -> Result<(), Error> {
        let expected = self.parent_of(position)?;
        if parent != expected {
            return Err(Error::ChainOrder {
                position,
                expected,
                found: parent,
            });
        }
        Ok(())
    }

    /// Store `record` at `position` after checking that it extends its predecessor.
    pub fn put(&mut self, record: &HeaderRecord, position: usize) -> Result<(), Error> {
        self.link(position, record.parent)?;
        self.slots[position] = record.encode()?;
        Ok(())
    }

    /// Store an already encoded record at `position`, checking its parent prefix.
    pub fn put_raw(&mut self, raw: &RawRecord, position: usize) -> Result<(), Error> {
        self.link(position, raw.parent())?;
        self.slots[position].copy_from_slice(raw.record());
        Ok(())
    }

    /// The record at `position`, or `None` if the slot is blank.
    pub fn get(&self, position: usize) -> Result<Option<HeaderRecord>, Error> {
        let parent = self.parent_of(position)?;
        let slot = &self.slots[position];
        if *slot == BLANK {
            return Ok(None);
        }
        Ok(Some(RawRecord::new(&parent, slot).decode()?))
    }

    /// Digest stored at `position`, or `None` if the slot is blank.
    pub fn digest_at(&self, position: usize) -> Result<Option<Digest>, Error> {
        self.check(position)?;
        let slot = &self.slots[position];
        Ok((*slot != BLANK).then(|| digest_of(slot)))
    }

    /// Digest in slot 0, or [Digest::EMPTY] if it is blank.
    pub fn first_hash(&self) -> Digest {
        if self.slots[0] == BLANK {
            return Digest::EMPTY;
        }
        digest_of(&self.slots[0])
    }

    /// Digest of the newest populated slot.
    pub fn last_hash(&self) -> Option<Digest> {
        self.slots
            .iter()
            .rev()
            .find(|slot| **slot != BLANK)
            .map(|slot| digest_of(slot))
    }

    /// Position and digest of the oldest populated slot.
    pub fn first_populated(&self) -> Option<(usize, Digest)> {
        self.populated().next()
    }

    /// Positions and digests of populated slots, oldest first.
    pub fn populated(&self) -> impl Iterator<Item = (usize, Digest)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| **slot != BLANK)
            .map(|(i, slot)| (i, digest_of(slot)))
    }

    /// Move every slot `k` positions toward the start, evicting the oldest `k` slots.
    ///
    /// If the slot preceding the new slot 0 was populated, its digest becomes the initial
    /// parent.
    pub fn shift_down(&mut self, k: usize) {
        if k == 0 {
            return;
        }
        let capacity = self.cfg.capacity;
        if k <= capacity && self.slots[k - 1] != BLANK {
            self.initial_parent = digest_of(&self.slots[k - 1]);
        }
        if k < capacity {
            let mut start = k;
            while start < capacity {
                let end = (start + SHIFT_CHUNK).min(capacity);
                self.slots.copy_within(start..end, start - k);
                start = end;
            }
        }
        let vacated = capacity.saturating_sub(k);
        self.slots[vacated..].fill(BLANK);
        self.shifts.inc();
        debug!(k, "shifted window down");
    }

    /// Move every slot `k` positions toward the end, dropping the newest `k` slots.
    ///
    /// The vacated head is left blank for the caller to refill.
    pub fn shift_up(&mut self, k: usize) {
        if k == 0 {
            return;
        }
        let capacity = self.cfg.capacity;
        if k < capacity {
            let mut end = capacity - k;
            while end > 0 {
                let start = end.saturating_sub(SHIFT_CHUNK);
                self.slots.copy_within(start..end, start + k);
                end = start;
            }
        }
        let vacated = k.min(capacity);
        self.slots[..vacated].fill(BLANK);
        self.shifts.inc();
        debug!(k, "shifted window up");
    }

    /// Blank every slot from `position` onward.
    pub fn truncate(&mut self, position: usize) {
        if position >= self.cfg.capacity {
            return;
        }
        self.slots[position..].fill(BLANK);
        debug!(position, "truncated window");
    }

    /// Write every slot to the snapshot blob and sync it.
    pub fn persist(&mut self) -> Result<(), Error> {
        let bytes = self.slots.as_flattened();
        self.blob.write_at(bytes, 0)?;
        self.blob.sync()?;
        self.persisted = bytes.len() as u64;
        self.snapshots.inc();
        debug!(bytes = self.persisted, "persisted window");
        Ok(())
    }

    /// Replace every slot with the contents of the snapshot blob.
    ///
    /// Returns `false` (leaving the window blank) if no snapshot was ever written.
    pub fn load(&mut self) -> Result<bool, Error> {
        if self.persisted == 0 {
            self.slots.fill(BLANK);
            debug!("no window snapshot found");
            return Ok(false);
        }
        let expected = (self.cfg.capacity * RECORD_SIZE) as u64;
        if self.persisted != expected {
            return Err(Error::SnapshotSize {
                expected,
                found: self.persisted,
            });
        }
        self.blob.read_at(self.slots.as_flattened_mut(), 0)?;
        debug!(bytes = self.persisted, "loaded window");
        Ok(true)
    }

    /// Remove the snapshot blob.
    pub fn destroy(self) -> Result<(), Error> {
        drop(self.blob);
        self.context
            .remove(&self.cfg.partition, Some(SNAPSHOT_BLOB))?;
        debug!("destroyed window");
        Ok(())
    }
}
