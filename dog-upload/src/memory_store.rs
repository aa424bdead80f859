use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::{AclPolicy, BlobStore, BucketIdentity, StoreError, StoreResult, StoredObject};

#[derive(Default)]
struct MemoryState {
    buckets: HashSet<String>,
    objects: HashMap<(String, String), Bytes>,
}

/// In-process blob store for tests and local development
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    state: Arc<Mutex<MemoryState>>,
    create_attempts: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `create_bucket` calls, successful or not
    pub fn create_attempts(&self) -> usize {
        self.create_attempts.load(Ordering::SeqCst)
    }

    /// Number of `put` calls that reached the store
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Resolve a public URL produced by the orchestrator back to its bytes
    pub fn fetch_url(&self, domain_root: &str, url: &str) -> StoreResult<Bytes> {
        let path = url
            .strip_prefix(domain_root)
            .ok_or_else(|| StoreError::invalid(format!("URL outside {domain_root}: {url}")))?;
        let (bucket, key) = path
            .split_once('/')
            .ok_or_else(|| StoreError::invalid(format!("URL has no object path: {url}")))?;
        self.read(bucket, key)
    }

    fn read(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let state = self.lock()?;
        state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("{bucket}/{key}")))
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::backend("memory store lock poisoned"))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _acl: &AclPolicy,
    ) -> StoreResult<StoredObject> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.lock()?;
        // Buckets are addressed by name even when creation was never observed
        state.buckets.insert(bucket.to_string());
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), body);

        Ok(StoredObject {
            bucket_name: bucket.to_string(),
            object_name: key.to_string(),
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        self.read(bucket, key)
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        Ok(self.lock()?.buckets.contains(bucket))
    }

    async fn create_bucket(&self, bucket: &BucketIdentity, _acl: &AclPolicy) -> StoreResult<()> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        let name = bucket.name();
        if self.lock()?.buckets.insert(name.clone()) {
            Ok(())
        } else {
            Err(StoreError::conflict(name))
        }
    }
}
