use super::{Config, Error, BLOB_NAME};
use headerchain_codec::{
    digest_of, Digest, HeaderRecord, RawRecord, DIGEST_LENGTH, RAW_RECORD_SIZE, RECORD_SIZE,
};
use headerchain_runtime::{Blob, Metrics, Storage};
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use tracing::{debug, trace, warn};

const RECORD_SIZE_U64: u64 = RECORD_SIZE as u64;

/// Implementation of the header log.
pub struct DiskLog<E: Storage + Metrics> {
    context: E,
    cfg: Config,

    blob: E::Blob,
    // Number of records written to the blob
    flushed: u64,
    // Encoded records not yet written, always a multiple of RECORD_SIZE
    buffer: Vec<u8>,
    tip: Digest,

    tracked: Gauge,
    synced: Counter,
}

impl<E: Storage + Metrics> DiskLog<E> {
    /// Initialize a new `DiskLog` instance.
    ///
    /// Opens (or creates) the log blob, truncating any partial record left by an unclean
    /// shutdown. The digest of the last complete record becomes the expected parent of the next
    /// append.
    pub fn init(context: E, cfg: Config) -> Result<Self, Error> {
        if cfg.write_buffer < RECORD_SIZE {
            return Err(Error::InvalidConfiguration(
                "write buffer must fit at least one record",
            ));
        }
        if cfg.read_batch == 0 {
            return Err(Error::InvalidConfiguration("read batch must be positive"));
        }

        let (blob, mut len) = context.open(&cfg.partition, BLOB_NAME)?;
        if len % RECORD_SIZE_U64 != 0 {
            warn!(
                invalid_len = len,
                "log length is not a multiple of record size, truncating"
            );
            len -= len % RECORD_SIZE_U64;
            blob.resize(len)?;
            blob.sync()?;
        }
        let flushed = len / RECORD_SIZE_U64;

        // Recover the newest digest
        let tip = if flushed == 0 {
            cfg.genesis_parent
        } else {
            let mut digest = [0u8; DIGEST_LENGTH];
            blob.read_at(&mut digest, len - DIGEST_LENGTH as u64)?;
            Digest::from(digest)
        };

        // Initialize metrics
        let tracked = Gauge::default();
        let synced = Counter::default();
        context.register("tracked", "Number of records", tracked.clone());
        context.register("synced", "Number of syncs", synced.clone());
        tracked.set(flushed as i64);
        debug!(records = flushed, %tip, "loaded log");

        Ok(Self {
            context,
            buffer: Vec::with_capacity(cfg.write_buffer),
            cfg,
            blob,
            flushed,
            tip,
            tracked,
            synced,
        })
    }

    /// Digest of the newest record, or the genesis parent if the log is empty.
    pub fn tip(&self) -> Digest {
        self.tip
    }

    /// The parent digest assigned to the record at position 0.
    pub fn genesis_parent(&self) -> Digest {
        self.cfg.genesis_parent
    }

    /// Number of records in the log, including those still buffered. The next appended record
    /// lands at this position.
    pub fn size(&self) -> u64 {
        self.flushed + (self.buffer.len() / RECORD_SIZE) as u64
    }

    /// Append a record, returning its position.
    ///
    /// The record must name the current [DiskLog::tip] as its parent. If the write buffer has no
    /// room for it, buffered records are flushed first. An error leaves the log unchanged, so the
    /// same record can be offered again.
    pub fn append(&mut self, record: &HeaderRecord) -> Result<u64, Error> {
        if record.parent != self.tip {
            return Err(Error::ChainOrder {
                expected: self.tip,
                found: record.parent,
            });
        }
        let encoded = record.encode()?;
        if self.buffer.len() + RECORD_SIZE > self.cfg.write_buffer {
            self.flush()?;
        }

        let position = self.size();
        self.buffer.extend_from_slice(&encoded);
        self.tip = record.digest;
        self.tracked.inc();
        trace!(position, digest = %record.digest, "appended record");
        Ok(position)
    }

    /// Write and sync any buffered records.
    pub fn flush(&mut self) -> Result<(), Error> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let records = (self.buffer.len() / RECORD_SIZE) as u64;
        self.blob
            .write_at(&self.buffer, self.flushed * RECORD_SIZE_U64)?;
        self.blob.sync()?;
        self.flushed += records;
        self.buffer.clear();
        self.synced.inc();
        debug!(records, size = self.flushed, "flushed log");
        Ok(())
    }

    /// Fill `buf` starting at byte `offset`, drawing from the blob and then the buffer.
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let boundary = self.flushed * RECORD_SIZE_U64;
        let from_blob = boundary.saturating_sub(offset).min(buf.len() as u64) as usize;
        if from_blob > 0 {
            self.blob.read_at(&mut buf[..from_blob], offset)?;
        }
        if from_blob < buf.len() {
            let start = (offset + from_blob as u64 - boundary) as usize;
            let end = start + (buf.len() - from_blob);
            buf[from_blob..].copy_from_slice(&self.buffer[start..end]);
        }
        Ok(())
    }

    fn check_range(&self, start: u64, count: u64) -> Result<(), Error> {
        let size = self.size();
        match start.checked_add(count) {
            Some(end) if end <= size => Ok(()),
            _ => Err(Error::OutOfBounds { start, count, size }),
        }
    }

    /// Digests of the `count` records starting at position `start`.
    ///
    /// Records are read from storage in batches of [Config::read_batch].
    pub fn read_hashes(&self, start: u64, count: u64) -> Result<Vec<Digest>, Error> {
        self.check_range(start, count)?;
        let mut hashes = Vec::with_capacity(count as usize);
        let mut batch = Vec::new();
        let mut next = start;
        let end = start + count;
        while next < end {
            let records = (end - next).min(self.cfg.read_batch);
            batch.resize(records as usize * RECORD_SIZE, 0);
            self.read_bytes(next * RECORD_SIZE_U64, &mut batch)?;
            hashes.extend(batch.chunks_exact(RECORD_SIZE).map(digest_of));
            next += records;
        }
        Ok(hashes)
    }

    /// The record at `position`, prefixed with its parent digest.
    ///
    /// Position 0 is prefixed with [Config::genesis_parent]. Every other record is prefixed with
    /// the digest stored in the record before it.
    pub fn read_record(&self, position: u64) -> Result<RawRecord, Error> {
        self.check_range(position, 1)?;
        if position == 0 {
            let mut encoded = [0u8; RECORD_SIZE];
            self.read_bytes(0, &mut encoded)?;
            return Ok(RawRecord::new(&self.cfg.genesis_parent, &encoded));
        }

        // The tail of the previous record is its digest
        let mut raw = [0u8; RAW_RECORD_SIZE];
        let offset = position * RECORD_SIZE_U64 - DIGEST_LENGTH as u64;
        self.read_bytes(offset, &mut raw)?;
        Ok(RawRecord::from(raw))
    }

    /// Flush buffered records and close the log.
    pub fn close(mut self) -> Result<(), Error> {
        self.flush()?;
        debug!(size = self.flushed, "closed log");
        Ok(())
    }

    /// Remove the log blob, discarding any buffered records.
    pub fn destroy(self) -> Result<(), Error> {
        drop(self.blob);
        self.context
            .remove(&self.cfg.partition, Some(BLOB_NAME))?;
        debug!("destroyed log");
        Ok(())
    }
}
