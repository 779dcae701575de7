//! Archive stores: where compressed WAL files and base backups end up
//!
//! Two interchangeable backends sit behind [`ArchiveStore`]:
//!
//! - [`FileStore`]: a directory on the local filesystem
//! - [`BucketStore`]: one bucket of an S3-compatible object store, reached
//!   through an [`ObjectStore`] client
//!
//! The contract for `put` is "durably store named bytes, or fail": a failed
//! write must not leave a partially visible object behind.

pub mod file;
pub mod memory;
pub mod object;
pub mod s3;

use std::io::{self, Read};
use std::sync::Arc;

use crate::config::{ArchiveTarget, Settings};
use crate::error::KeeperResult;

pub use file::FileStore;
pub use memory::MemoryObjectStore;
pub use object::{BucketStore, ObjectStore};
pub use s3::S3Client;

/// What the bytes handed to `put` are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// zstd-compressed, not encrypted
    Compressed,
    /// Compressed, then encrypted with gpg
    GpgEncrypted,
    /// Compressed, then sealed with the builtin AES-256-GCM stream format
    Sealed,
}

impl PayloadKind {
    pub const ALL: [PayloadKind; 3] = [Self::Compressed, Self::GpgEncrypted, Self::Sealed];

    /// Content type recorded on object-store uploads
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Compressed => "application/zstd",
            Self::GpgEncrypted => "application/pgp-encrypted",
            Self::Sealed => "application/x-walkeeper-sealed",
        }
    }

    /// Extra suffix appended to file-mode names
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Self::Compressed => "",
            Self::GpgEncrypted => ".gpg",
            Self::Sealed => ".sealed",
        }
    }

    pub fn is_encrypted(&self) -> bool {
        !matches!(self, Self::Compressed)
    }
}

/// An object listed from a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub name: String,
    pub size: u64,
}

/// Durable named-byte storage
pub trait ArchiveStore: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    /// Final stored name for a payload archived under `base`
    fn object_name(&self, base: &str, _kind: PayloadKind) -> String {
        base.to_string()
    }

    fn exists(&self, name: &str) -> KeeperResult<bool>;

    /// Store everything `data` yields under `name`; returns bytes stored
    fn put(&self, name: &str, data: &mut dyn Read, kind: PayloadKind) -> KeeperResult<u64>;

    /// All objects, sorted by name
    fn list(&self) -> KeeperResult<Vec<StoredObject>>;

    /// Fetch a (small) object in full
    fn read(&self, name: &str) -> KeeperResult<Vec<u8>>;

    fn remove(&self, name: &str) -> KeeperResult<()>;
}

/// The WAL store and backup store selected by the settings
pub struct Stores {
    pub wal: Box<dyn ArchiveStore>,
    pub backups: Box<dyn ArchiveStore>,
}

impl Stores {
    pub fn from_settings(settings: &Settings) -> KeeperResult<Self> {
        match settings.archive_to {
            ArchiveTarget::File => {
                let layout = settings.layout();
                Ok(Self {
                    wal: Box::new(FileStore::new(layout.wal_dir())),
                    backups: Box::new(FileStore::new(layout.backup_dir())),
                })
            }
            ArchiveTarget::S3 => {
                let client: Arc<dyn ObjectStore> = Arc::new(S3Client::from_settings(settings)?);
                Ok(Self {
                    wal: Box::new(BucketStore::new(
                        Arc::clone(&client),
                        &settings.s3_bucket_wal,
                        &settings.s3_location,
                    )),
                    backups: Box::new(BucketStore::new(
                        client,
                        &settings.s3_bucket_backup,
                        &settings.s3_location,
                    )),
                })
            }
        }
    }
}

/// Reader wrapper counting the bytes pulled through it
pub struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
