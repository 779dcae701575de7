//! In-memory object store
//!
//! Speaks the same [`ObjectStore`] surface as the S3 client and records how
//! it was called, so archive and cleanup logic can be exercised without a
//! network service.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::object::ObjectStore;
use super::StoredObject;
use crate::error::{KeeperError, KeeperResult};

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    content_type: String,
}

type Bucket = BTreeMap<String, MemoryObject>;

/// Object store held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    bucket_exists_calls: AtomicUsize,
    create_bucket_calls: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that already has an empty bucket named `bucket`
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::new();
        if let Ok(mut buckets) = store.buckets.lock() {
            buckets.insert(bucket.to_string(), Bucket::new());
        }
        store
    }

    pub fn bucket_exists_calls(&self) -> usize {
        self.bucket_exists_calls.load(Ordering::SeqCst)
    }

    pub fn create_bucket_calls(&self) -> usize {
        self.create_bucket_calls.load(Ordering::SeqCst)
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.with_buckets(|buckets| {
            Ok(buckets
                .get(bucket)
                .and_then(|b| b.get(key))
                .map(|o| o.data.clone()))
        })
        .ok()
        .flatten()
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.with_buckets(|buckets| {
            Ok(buckets
                .get(bucket)
                .and_then(|b| b.get(key))
                .map(|o| o.content_type.clone()))
        })
        .ok()
        .flatten()
    }

    fn with_buckets<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, Bucket>) -> KeeperResult<T>,
    ) -> KeeperResult<T> {
        let mut buckets = self
            .buckets
            .lock()
            .map_err(|_| KeeperError::ObjectStore("memory store lock poisoned".into()))?;
        f(&mut buckets)
    }
}

fn no_such_bucket(bucket: &str) -> KeeperError {
    KeeperError::ObjectStore(format!("NoSuchBucket: {}", bucket))
}

impl ObjectStore for MemoryObjectStore {
    fn bucket_exists(&self, bucket: &str) -> KeeperResult<bool> {
        self.bucket_exists_calls.fetch_add(1, Ordering::SeqCst);
        self.with_buckets(|buckets| Ok(buckets.contains_key(bucket)))
    }

    fn create_bucket(&self, bucket: &str, _location: &str) -> KeeperResult<()> {
        self.create_bucket_calls.fetch_add(1, Ordering::SeqCst);
        self.with_buckets(|buckets| {
            if buckets.contains_key(bucket) {
                return Err(KeeperError::ObjectStore(format!(
                    "BucketAlreadyOwnedByYou: {}",
                    bucket
                )));
            }
            buckets.insert(bucket.to_string(), Bucket::new());
            Ok(())
        })
    }

    fn object_exists(&self, bucket: &str, key: &str) -> KeeperResult<bool> {
        self.with_buckets(|buckets| {
            Ok(buckets.get(bucket).map_or(false, |b| b.contains_key(key)))
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: &mut dyn Read,
        content_type: &str,
    ) -> KeeperResult<u64> {
        // Read everything first; a failing stream must not leave an object behind.
        let mut body = Vec::new();
        data.read_to_end(&mut body)
            .map_err(|e| KeeperError::ObjectStore(format!("upload of {} aborted: {}", key, e)))?;
        let size = body.len() as u64;

        self.with_buckets(|buckets| {
            let objects = buckets.get_mut(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            objects.insert(
                key.to_string(),
                MemoryObject {
                    data: body,
                    content_type: content_type.to_string(),
                },
            );
            Ok(size)
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> KeeperResult<Vec<u8>> {
        self.with_buckets(|buckets| {
            buckets
                .get(bucket)
                .ok_or_else(|| no_such_bucket(bucket))?
                .get(key)
                .map(|o| o.data.clone())
                .ok_or_else(|| KeeperError::object_not_found(key))
        })
    }

    fn list_objects(&self, bucket: &str) -> KeeperResult<Vec<StoredObject>> {
        self.with_buckets(|buckets| {
            let objects = buckets.get(bucket).ok_or_else(|| no_such_bucket(bucket))?;
            Ok(objects
                .iter()
                .map(|(name, o)| StoredObject {
                    name: name.clone(),
                    size: o.data.len() as u64,
                })
                .collect())
        })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> KeeperResult<()> {
        self.with_buckets(|buckets| {
            buckets
                .get_mut(bucket)
                .ok_or_else(|| no_such_bucket(bucket))?
                .remove(key)
                .map(|_| ())
                .ok_or_else(|| KeeperError::object_not_found(key))
        })
    }
}
