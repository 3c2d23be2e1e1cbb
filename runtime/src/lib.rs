//! Blob storage and metrics substrate for headerchain stores.
//!
//! Stores in `headerchain-storage` never touch the filesystem or a metrics registry directly.
//! They are generic over a context that implements [Storage] (named blobs grouped into
//! partitions) and [Metrics] (a labeled registry). [Context] combines both over any
//! [Storage] backend:
//! - [memory::Storage] keeps blobs in process memory and is used by tests.
//! - [fs::Storage] maps each partition to a directory and each blob to a file.
//!
//! All operations are synchronous and block the caller until they complete.
//!
//! # Example
//!
//! ```
//! use headerchain_runtime::{memory, Blob, Context, Metrics, Storage};
//!
//! let context = Context::new(memory::Storage::default());
//! let (blob, len) = context.open("partition", b"blob").unwrap();
//! assert_eq!(len, 0);
//! blob.write_at(b"hello", 0).unwrap();
//! blob.sync().unwrap();
//!
//! let mut buf = [0u8; 5];
//! blob.read_at(&mut buf, 0).unwrap();
//! assert_eq!(&buf, b"hello");
//! assert!(context.with_label("store").label() == "store");
//! ```

use prometheus_client::registry::Metric;
use std::io::Error as IoError;
use thiserror::Error;

mod context;
pub use context::Context;
mod storage;
pub use storage::{fs, memory};

/// Errors that can occur when interacting with the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("partition name invalid, must only contain alphanumeric, dash ('-'), or underscore ('_') characters: {0}")]
    PartitionNameInvalid(String),
    #[error("partition creation failed: {0}")]
    PartitionCreationFailed(String),
    #[error("partition missing: {0}")]
    PartitionMissing(String),
    #[error("blob open failed: {0}/{1} error: {2}")]
    BlobOpenFailed(String, String, IoError),
    #[error("blob missing: {0}/{1}")]
    BlobMissing(String, String),
    #[error("blob resize failed: {0}/{1} error: {2}")]
    BlobResizeFailed(String, String, IoError),
    #[error("blob sync failed: {0}/{1} error: {2}")]
    BlobSyncFailed(String, String, IoError),
    #[error("blob insufficient length")]
    BlobInsufficientLength,
    #[error("read failed: {0}")]
    ReadFailed(IoError),
    #[error("write failed: {0}")]
    WriteFailed(IoError),
    #[error("offset overflow")]
    OffsetOverflow,
    #[error("io error: {0}")]
    Io(#[from] IoError),
}

/// Interface to register and encode metrics.
pub trait Metrics: Clone + Send + Sync + 'static {
    /// Get the current label of the context.
    fn label(&self) -> String;

    /// Create a new instance of `Metrics` with the given label appended to the end
    /// of the current `Metrics` label.
    ///
    /// This is commonly used to create a nested context for `register`.
    fn with_label(&self, label: &str) -> Self;

    /// Register a metric.
    ///
    /// Any registered metric will include (as a prefix) the label of the current context.
    fn register<N: Into<String>, H: Into<String>>(&self, name: N, help: H, metric: impl Metric);

    /// Encode all metrics into a buffer.
    fn encode(&self) -> String;
}

/// Interface to interact with storage.
///
/// To support storage implementations that enable concurrent reads and
/// writes, blobs are responsible for maintaining synchronization.
///
/// Storage can be backed by a local filesystem or by process memory (for tests).
pub trait Storage: Clone + Send + Sync + 'static {
    /// The readable/writeable storage buffer that can be opened by this Storage.
    type Blob: Blob;

    /// Open an existing blob in a given partition or create a new one, returning
    /// the blob and its length.
    ///
    /// Blobs carry no header: the returned length is the number of bytes written to it.
    fn open(&self, partition: &str, name: &[u8]) -> Result<(Self::Blob, u64), Error>;

    /// Remove a blob from a given partition.
    ///
    /// If no `name` is provided, the entire partition is removed.
    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error>;

    /// Return all blobs in a given partition.
    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error>;
}

/// Interface to read and write to a blob.
///
/// Cloning a blob is similar to wrapping a single file descriptor in
/// a lock whereas opening a new blob (of the same name) is similar to
/// opening a new file descriptor.
///
/// When a blob is dropped, any unsynced changes may be discarded. Call `sync`
/// before dropping to ensure all changes are durably persisted.
pub trait Blob: Clone + Send + Sync + 'static {
    /// Fill `buf` from the blob starting at the given offset.
    ///
    /// Fails with [Error::BlobInsufficientLength] if the blob ends before `buf` is full.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error>;

    /// Write `buf` to the blob at the given offset, extending the blob if needed.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error>;

    /// Resize the blob to the given length.
    ///
    /// If the length is greater than the current length, the blob is extended with zeros.
    /// If the length is less than the current length, the blob is truncated.
    fn resize(&self, len: u64) -> Result<(), Error>;

    /// Ensure all pending data is durably persisted.
    fn sync(&self) -> Result<(), Error>;
}
