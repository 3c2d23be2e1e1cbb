use crate::Error;
use std::{
    fs::{self, File, OpenOptions},
    io::ErrorKind,
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tracing::debug;

fn sync_dir(path: &Path) -> Result<(), Error> {
    let dir = File::open(path).map_err(|e| {
        Error::BlobOpenFailed(
            path.to_string_lossy().to_string(),
            "directory".to_string(),
            e,
        )
    })?;
    dir.sync_all().map_err(|e| {
        Error::BlobSyncFailed(
            path.to_string_lossy().to_string(),
            "directory".to_string(),
            e,
        )
    })
}

/// Configuration for [Storage].
#[derive(Clone)]
pub struct Config {
    /// Directory under which each partition gets its own subdirectory.
    pub storage_directory: PathBuf,
}

impl Config {
    pub fn new(storage_directory: impl Into<PathBuf>) -> Self {
        Self {
            storage_directory: storage_directory.into(),
        }
    }
}

/// Storage backed by the local filesystem.
///
/// Blob names are hex-encoded to form file names.
#[derive(Clone)]
pub struct Storage {
    lock: Arc<Mutex<()>>,
    cfg: Config,
}

impl Storage {
    pub fn new(cfg: Config) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            cfg,
        }
    }
}

impl crate::Storage for Storage {
    type Blob = Blob;

    fn open(&self, partition: &str, name: &[u8]) -> Result<(Self::Blob, u64), Error> {
        super::validate_partition_name(partition)?;

        let _guard = self.lock.lock().unwrap();

        let directory = self.cfg.storage_directory.join(partition);
        let created = !directory.exists();
        fs::create_dir_all(&directory)
            .map_err(|_| Error::PartitionCreationFailed(partition.into()))?;
        if created {
            sync_dir(&self.cfg.storage_directory)?;
        }

        let path = directory.join(hex::encode(name));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::BlobOpenFailed(partition.into(), hex::encode(name), e))?;
        let len = file.metadata().map_err(Error::ReadFailed)?.len();

        // Make the new (empty) file durable before handing it out
        if len == 0 {
            file.sync_all()
                .map_err(|e| Error::BlobSyncFailed(partition.into(), hex::encode(name), e))?;
            sync_dir(&directory)?;
        }
        debug!(partition, name = hex::encode(name), len, "opened blob");

        Ok((Blob::new(partition.into(), name, file), len))
    }

    fn remove(&self, partition: &str, name: Option<&[u8]>) -> Result<(), Error> {
        super::validate_partition_name(partition)?;

        let _guard = self.lock.lock().unwrap();

        let directory = self.cfg.storage_directory.join(partition);
        match name {
            Some(name) => {
                let path = directory.join(hex::encode(name));
                fs::remove_file(&path).map_err(|e| match e.kind() {
                    ErrorKind::NotFound => {
                        Error::BlobMissing(partition.into(), hex::encode(name))
                    }
                    _ => Error::Io(e),
                })?;
                sync_dir(&directory)?;
            }
            None => {
                fs::remove_dir_all(&directory).map_err(|e| match e.kind() {
                    ErrorKind::NotFound => Error::PartitionMissing(partition.into()),
                    _ => Error::Io(e),
                })?;
                sync_dir(&self.cfg.storage_directory)?;
            }
        }
        Ok(())
    }

    fn scan(&self, partition: &str) -> Result<Vec<Vec<u8>>, Error> {
        super::validate_partition_name(partition)?;

        let _guard = self.lock.lock().unwrap();

        let directory = self.cfg.storage_directory.join(partition);
        let entries = fs::read_dir(&directory).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::PartitionMissing(partition.into()),
            _ => Error::Io(e),
        })?;

        let mut blobs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                return Err(Error::PartitionMissing(partition.into()));
            }
            // Skip anything we did not name
            let Some(name) = entry.file_name().to_str().and_then(|n| hex::decode(n).ok()) else {
                continue;
            };
            blobs.push(name);
        }
        blobs.sort();
        Ok(blobs)
    }
}

/// A blob backed by a file, accessed with positional reads and writes.
#[derive(Clone)]
pub struct Blob {
    partition: String,
    name: Vec<u8>,
    file: Arc<File>,
}

impl Blob {
    fn new(partition: String, name: &[u8], file: File) -> Self {
        Self {
            partition,
            name: name.into(),
            file: Arc::new(file),
        }
    }
}

impl crate::Blob for Blob {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), Error> {
        self.file.read_exact_at(buf, offset).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => Error::BlobInsufficientLength,
            _ => Error::ReadFailed(e),
        })
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), Error> {
        self.file
            .write_all_at(buf, offset)
            .map_err(Error::WriteFailed)
    }

    fn resize(&self, len: u64) -> Result<(), Error> {
        self.file.set_len(len).map_err(|e| {
            Error::BlobResizeFailed(self.partition.clone(), hex::encode(&self.name), e)
        })
    }

    fn sync(&self) -> Result<(), Error> {
        self.file.sync_all().map_err(|e| {
            Error::BlobSyncFailed(self.partition.clone(), hex::encode(&self.name), e)
        })
    }
}
