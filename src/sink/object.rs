//! Object-store archive sink
//!
//! [`BucketStore`] maps the archive contract onto one bucket. The bucket is
//! created on first upload if it is missing; after that the sink remembers it
//! and skips the check.
//!
//! `put` does not re-check object existence right before uploading. The
//! pipeline's earlier existence check is the only guard, so two archivers
//! racing on the same WAL name can both upload; the later one wins.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::{ArchiveStore, PayloadKind, StoredObject};
use crate::error::KeeperResult;

/// Minimal object-store client surface used by walkeeper
pub trait ObjectStore: Send + Sync {
    fn bucket_exists(&self, bucket: &str) -> KeeperResult<bool>;

    fn create_bucket(&self, bucket: &str, location: &str) -> KeeperResult<()>;

    /// Missing buckets report `false`, not an error
    fn object_exists(&self, bucket: &str, key: &str) -> KeeperResult<bool>;

    /// Stream `data` into one object; returns bytes uploaded
    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &mut dyn Read,
        content_type: &str,
    ) -> KeeperResult<u64>;

    fn get_object(&self, bucket: &str, key: &str) -> KeeperResult<Vec<u8>>;

    fn list_objects(&self, bucket: &str) -> KeeperResult<Vec<StoredObject>>;

    fn delete_object(&self, bucket: &str, key: &str) -> KeeperResult<()>;
}

/// Archive store backed by one object-store bucket
pub struct BucketStore {
    client: Arc<dyn ObjectStore>,
    bucket: String,
    location: String,
    bucket_ready: AtomicBool,
}

impl BucketStore {
    pub fn new(client: Arc<dyn ObjectStore>, bucket: &str, location: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            location: location.to_string(),
            bucket_ready: AtomicBool::new(false),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Make sure the bucket exists, creating it if needed
    pub fn ensure_bucket(&self) -> KeeperResult<()> {
        if self.bucket_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        if self.client.bucket_exists(&self.bucket)? {
            debug!(bucket = %self.bucket, "bucket already exists, using it");
        } else {
            self.client.create_bucket(&self.bucket, &self.location)?;
            info!(bucket = %self.bucket, location = %self.location, "bucket created");
        }

        self.bucket_ready.store(true, Ordering::Release);
        Ok(())
    }
}

impl ArchiveStore for BucketStore {
    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }

    fn exists(&self, name: &str) -> KeeperResult<bool> {
        self.client.object_exists(&self.bucket, name)
    }

    fn put(&self, name: &str, data: &mut dyn Read, kind: PayloadKind) -> KeeperResult<u64> {
        self.ensure_bucket()?;

        let written = self
            .client
            .put_object(&self.bucket, name, data, kind.content_type())?;
        info!(
            bucket = %self.bucket,
            key = name,
            bytes = written,
            "uploaded object"
        );
        Ok(written)
    }

    fn list(&self) -> KeeperResult<Vec<StoredObject>> {
        if !self.bucket_ready.load(Ordering::Acquire) && !self.client.bucket_exists(&self.bucket)? {
            return Ok(Vec::new());
        }

        let mut objects = self.client.list_objects(&self.bucket)?;
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }

    fn read(&self, name: &str) -> KeeperResult<Vec<u8>> {
        self.client.get_object(&self.bucket, name)
    }

    fn remove(&self, name: &str) -> KeeperResult<()> {
        self.client.delete_object(&self.bucket, name)
    }
}
