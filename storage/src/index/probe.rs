//! Pure probing routines over an immutable view of the table.

use super::{Bucket, Error, HELD_BACK_CAP, HELD_BACK_THRESHOLD, MAX_DISTANCE};
use headerchain_codec::Digest;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Alternate,
    Ascending,
    Descending,
}

/// Slots visited from a base bucket: `base, base+1, base-1, base+2, base-2, ...`, then one
/// direction only after either end of the table is reached.
pub(super) struct Sequence {
    base: usize,
    index: i64,
    step: i64,
    sign: i64,
    slots: i64,
    direction: Direction,
    started: bool,
}

impl Sequence {
    pub(super) fn new(base: usize, slots: usize) -> Self {
        Self {
            base,
            index: base as i64,
            step: 1,
            sign: 1,
            slots: slots as i64,
            direction: Direction::Alternate,
            started: false,
        }
    }

    /// Returns the next slot, or [Error::ProbeExhausted] once both ends have been passed.
    pub(super) fn next_slot(&mut self) -> Result<usize, Error> {
        if !self.started {
            self.started = true;
            return Ok(self.index as usize);
        }
        let next = match self.direction {
            Direction::Ascending => self.index + 1,
            Direction::Descending => self.index - 1,
            Direction::Alternate => self.index + self.step * self.sign,
        };
        if next >= self.slots {
            if self.direction == Direction::Ascending {
                return Err(Error::ProbeExhausted(self.base));
            }
            self.direction = Direction::Descending;
        }
        if next < 0 {
            if self.direction == Direction::Descending {
                return Err(Error::ProbeExhausted(self.base));
            }
            self.direction = Direction::Ascending;
        }
        match self.direction {
            Direction::Alternate => {
                self.index += self.step * self.sign;
                self.step += 1;
                self.sign = -self.sign;
            }
            Direction::Ascending => self.index += 1,
            Direction::Descending => self.index -= 1,
        }
        if self.index < 0 || self.index >= self.slots {
            return Err(Error::ProbeExhausted(self.base));
        }
        Ok(self.index as usize)
    }
}

/// Whether an insert may use `slot` under stride `held_back`.
#[inline]
pub(super) fn is_valid_spot(slot: usize, held_back: u32) -> bool {
    slot % held_back as usize != 0
}

/// The stride after an insert touched a slot `distance` away from its base.
#[inline]
pub(super) fn grow(held_back: u32, distance: usize) -> u32 {
    if distance >= HELD_BACK_THRESHOLD && held_back < HELD_BACK_CAP {
        held_back + held_back
    } else {
        held_back
    }
}

/// Where an insert resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Outcome {
    /// Store the new entry in this empty slot.
    Vacant(usize),
    /// This slot already holds the digest's sample.
    Collision(usize),
}

#[derive(Debug)]
pub(super) struct Placement {
    pub outcome: Outcome,
    /// Distance to record against the base bucket.
    pub distance: usize,
    /// Stride after the probe.
    pub held_back: u32,
}

/// Find where `digest` should be inserted.
///
/// The first valid empty slot wins unless it lies within the base bucket's recorded
/// `max_distance`. In that case, probing continues up to `max_distance` looking for a bucket
/// already holding the sample, since one may have been placed past a slot that the stride made
/// invalid at the time.
pub(super) fn place(
    buckets: &[Bucket],
    digest: &Digest,
    base: usize,
    max_distance: usize,
    held_back: u32,
) -> Result<Placement, Error> {
    let mut held_back = held_back;
    let mut vacancy: Option<(usize, usize)> = None;
    let mut sequence = Sequence::new(base, buckets.len());
    loop {
        let slot = match (sequence.next_slot(), vacancy) {
            (Ok(slot), _) => slot,
            (Err(_), Some((slot, distance))) => {
                return Ok(Placement {
                    outcome: Outcome::Vacant(slot),
                    distance,
                    held_back,
                })
            }
            (Err(err), None) => return Err(err),
        };
        let distance = slot.abs_diff(base);
        if vacancy.is_none() && distance > MAX_DISTANCE {
            return Err(Error::ProbeExhausted(base));
        }
        if !is_valid_spot(slot, held_back) {
            continue;
        }
        let bucket = &buckets[slot];
        match vacancy {
            Some((vacant, vacant_distance)) => {
                if distance > max_distance {
                    return Ok(Placement {
                        outcome: Outcome::Vacant(vacant),
                        distance: vacant_distance,
                        held_back,
                    });
                }
                if !bucket.is_empty() && bucket.matches(digest) {
                    return Ok(Placement {
                        outcome: Outcome::Collision(slot),
                        distance: vacant_distance,
                        held_back,
                    });
                }
            }
            None => {
                if !bucket.is_empty() {
                    if !bucket.matches(digest) {
                        continue;
                    }
                    return Ok(Placement {
                        outcome: Outcome::Collision(slot),
                        distance,
                        held_back: grow(held_back, distance),
                    });
                }
                held_back = grow(held_back, distance);
                if distance > max_distance {
                    return Ok(Placement {
                        outcome: Outcome::Vacant(slot),
                        distance,
                        held_back,
                    });
                }
                vacancy = Some((slot, distance));
            }
        }
    }
}

/// Find the slot holding the sample of `digest`, looking no further than `max_distance`.
pub(super) fn find(
    buckets: &[Bucket],
    digest: &Digest,
    base: usize,
    max_distance: usize,
) -> Result<Option<usize>, Error> {
    let mut sequence = Sequence::new(base, buckets.len());
    loop {
        // A small table can run out of slots before the distance bound
        let Ok(slot) = sequence.next_slot() else {
            return Ok(None);
        };
        if slot.abs_diff(base) > max_distance {
            return Ok(None);
        }
        let bucket = &buckets[slot];
        if !bucket.is_empty() && bucket.matches(digest) {
            return Ok(Some(slot));
        }
    }
}
