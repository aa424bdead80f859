use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::{AclPolicy, BlobStore, BucketIdentity, StoreResult, StoredObject};

/// Backoff schedule for [`RetryingStore`]
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Delay before retry number `retry` (1-based), doubling up to the cap
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Blob store decorator retrying transient failures.
///
/// Object keys are deterministic, so repeating a put overwrites the same object.
/// Bucket creation is passed through untouched: its failures are expected.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: BlobStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn run<T, F, Fut>(&self, op: &str, mut attempt: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut retry = 0;
        loop {
            match attempt().await {
                Err(e) if e.is_retryable() && retry + 1 < self.policy.max_attempts => {
                    retry += 1;
                    let delay = self.policy.backoff(retry);
                    warn!(op, retry, ?delay, error = %e, "retrying store operation");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl<S: BlobStore> BlobStore for RetryingStore<S> {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        acl: &AclPolicy,
    ) -> StoreResult<StoredObject> {
        self.run("put", || self.inner.put(bucket, key, body.clone(), acl))
            .await
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        self.run("get", || self.inner.get(bucket, key)).await
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        self.run("bucket_exists", || self.inner.bucket_exists(bucket))
            .await
    }

    async fn create_bucket(&self, bucket: &BucketIdentity, acl: &AclPolicy) -> StoreResult<()> {
        self.inner.create_bucket(bucket, acl).await
    }
}
