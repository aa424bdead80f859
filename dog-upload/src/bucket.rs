use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::{BucketConfig, DEFAULT_ENVIRONMENT_INFIX};
use crate::metadata::{MetadataClient, BACKEND_NAME_KEY, PROJECT_KEY};
use crate::{AclPolicy, BlobStore};

/// Deployment identity a bucket is named after
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketIdentity {
    pub project_id: String,
    pub environment_infix: String,
    pub suffix: String,
}

impl BucketIdentity {
    pub fn new<P, E, S>(project_id: P, environment_infix: E, suffix: S) -> Self
    where
        P: Into<String>,
        E: Into<String>,
        S: Into<String>,
    {
        Self {
            project_id: project_id.into(),
            environment_infix: environment_infix.into(),
            suffix: suffix.into(),
        }
    }

    /// `<project>-<infix>-<suffix>`
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.project_id, self.environment_infix, self.suffix)
    }
}

/// Lazily resolves the target bucket and makes sure it exists.
///
/// The first caller performs the metadata lookups and the single creation
/// attempt while holding the lock; everyone else waits and reads the cache.
pub struct BucketResolver {
    store: Arc<dyn BlobStore>,
    metadata: MetadataClient,
    config: BucketConfig,
    acl: AclPolicy,
    cached: Mutex<Option<BucketIdentity>>,
}

impl BucketResolver {
    pub fn new(store: Arc<dyn BlobStore>, metadata: MetadataClient, config: BucketConfig) -> Self {
        Self {
            store,
            metadata,
            config,
            acl: AclPolicy::public_read(),
            cached: Mutex::new(None),
        }
    }

    /// Use a different ACL for bucket creation
    pub fn with_acl(mut self, acl: AclPolicy) -> Self {
        self.acl = acl;
        self
    }

    pub fn acl(&self) -> &AclPolicy {
        &self.acl
    }

    /// Resolve the bucket identity, creating the bucket on first use
    #[instrument(skip(self))]
    pub async fn resolve_bucket(&self) -> BucketIdentity {
        let mut cached = self.cached.lock().await;
        if let Some(identity) = cached.as_ref() {
            return identity.clone();
        }

        let identity = self.discover().await;
        self.ensure_exists(&identity).await;

        info!(bucket = %identity.name(), "bucket resolved");
        *cached = Some(identity.clone());
        identity
    }

    /// Drop the cached identity; the next resolve starts over
    pub async fn reset(&self) {
        self.cached.lock().await.take();
    }

    /// Cached identity, if already resolved
    pub async fn cached(&self) -> Option<BucketIdentity> {
        self.cached.lock().await.clone()
    }

    async fn discover(&self) -> BucketIdentity {
        let project_id = self
            .metadata
            .attribute(PROJECT_KEY, &self.config.fallback_project_id)
            .await;
        let environment_infix = self
            .metadata
            .attribute(BACKEND_NAME_KEY, DEFAULT_ENVIRONMENT_INFIX)
            .await;

        BucketIdentity::new(project_id, environment_infix, self.config.suffix.clone())
    }

    /// Creation failure is the steady state after the first deployment and is never surfaced
    async fn ensure_exists(&self, identity: &BucketIdentity) {
        match self.store.create_bucket(identity, &self.acl).await {
            Ok(()) => info!(bucket = %identity.name(), "bucket created"),
            Err(e) if e.is_conflict() => {
                debug!(bucket = %identity.name(), "bucket already exists")
            }
            // TODO: treat permission and quota failures as fatal once adapters report them distinctly
            Err(e) => {
                warn!(bucket = %identity.name(), error = %e, "bucket creation failed, addressing by name")
            }
        }
    }
}
