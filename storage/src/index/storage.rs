use super::{
    address,
    probe::{self, Outcome},
    scale, validate, Bucket, Config, Error, Insert, Lookup, AMBIGUOUS, INITIAL_HELD_BACK,
};
use headerchain_codec::Digest;
use headerchain_runtime::Metrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use tracing::{debug, trace};

/// An open-addressing table mapping digest samples to chain positions.
pub struct SparseHashIndex {
    buckets: Vec<Bucket>,
    // Largest distance any insert from each base bucket travelled
    distances: Vec<u8>,
    scale: f64,
    held_back: u32,
    recorded: u64,

    recorded_gauge: Gauge,
    held_back_gauge: Gauge,
    collisions: Counter,
}

impl SparseHashIndex {
    /// Allocate an empty table after validating `cfg`.
    pub fn init(context: impl Metrics, cfg: Config) -> Result<Self, Error> {
        validate(&cfg)?;

        let recorded_gauge = Gauge::default();
        let held_back_gauge = Gauge::default();
        let collisions = Counter::default();
        context.register(
            "recorded",
            "Number of digests offered to the index",
            recorded_gauge.clone(),
        );
        context.register(
            "held_back",
            "Stride of slots reserved from inserts",
            held_back_gauge.clone(),
        );
        context.register(
            "collisions",
            "Number of inserts that met an existing sample",
            collisions.clone(),
        );
        held_back_gauge.set(INITIAL_HELD_BACK as i64);
        debug!(slots = cfg.slots, "initialized index");

        Ok(Self {
            buckets: vec![Bucket::default(); cfg.slots],
            distances: vec![0; cfg.slots],
            scale: scale(cfg.slots),
            held_back: INITIAL_HELD_BACK,
            recorded: 0,
            recorded_gauge,
            held_back_gauge,
            collisions,
        })
    }

    /// The base bucket of `digest`.
    #[inline]
    pub fn bucket(&self, digest: &Digest) -> usize {
        (address(digest) as f64 * self.scale) as usize
    }

    /// Whether an insert may currently use `slot`.
    pub fn is_valid_spot(&self, slot: usize) -> bool {
        probe::is_valid_spot(slot, self.held_back)
    }

    /// Record `digest` at `position`.
    ///
    /// Each digest must be offered at most once: offering it again reports a collision with
    /// itself and leaves its entry ambiguous.
    pub fn put(&mut self, digest: &Digest, position: u64) -> Result<Insert, Error> {
        if position >= AMBIGUOUS as u64 {
            return Err(Error::ReservedPosition(position));
        }
        let base = self.bucket(digest);
        let max_distance = self.distances[base] as usize;
        let placement = probe::place(&self.buckets, digest, base, max_distance, self.held_back)?;

        if placement.held_back != self.held_back {
            debug!(
                from = self.held_back,
                to = placement.held_back,
                "growing held back stride"
            );
            self.held_back = placement.held_back;
            self.held_back_gauge.set(self.held_back as i64);
        }
        if placement.distance > max_distance {
            // Bounded by MAX_DISTANCE during probing
            self.distances[base] = placement.distance as u8;
        }
        self.recorded += 1;
        self.recorded_gauge.inc();

        let result = match placement.outcome {
            Outcome::Vacant(slot) => {
                self.buckets[slot] = Bucket::new(digest, position as u32);
                Insert::Inserted { slot }
            }
            Outcome::Collision(slot) => {
                let existing = self.buckets[slot].position();
                self.buckets[slot].mark_ambiguous();
                self.collisions.inc();
                debug!(slot, position, ?existing, "sample collision");
                Insert::Collision { slot, existing }
            }
        };
        trace!(%digest, position, base, distance = placement.distance, "indexed digest");
        Ok(result)
    }

    fn find(&self, digest: &Digest) -> Result<Option<usize>, Error> {
        let base = self.bucket(digest);
        probe::find(&self.buckets, digest, base, self.distances[base] as usize)
    }

    /// Whether a bucket with the sample of `digest` exists.
    pub fn contains(&self, digest: &Digest) -> Result<bool, Error> {
        Ok(self.find(digest)?.is_some())
    }

    /// The raw bucket holding the sample of `digest`, if any.
    pub fn get(&self, digest: &Digest) -> Result<Option<Bucket>, Error> {
        Ok(self.find(digest)?.map(|slot| self.buckets[slot]))
    }

    /// The position stored for the sample of `digest`.
    pub fn position(&self, digest: &Digest) -> Result<Lookup, Error> {
        Ok(match self.get(digest)? {
            None => Lookup::Missing,
            Some(bucket) => match bucket.position() {
                Some(position) => Lookup::Found(position),
                None => Lookup::Ambiguous,
            },
        })
    }

    /// Number of `put` calls that succeeded, collisions included.
    pub fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Current stride of slots reserved from inserts.
    pub fn held_back(&self) -> u32 {
        self.held_back
    }

    /// Largest distance an insert from `bucket` has travelled.
    pub fn max_distance(&self, bucket: usize) -> u8 {
        self.distances[bucket]
    }
}
