use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{BucketIdentity, StoreResult};

/// Blob storage operations the orchestrator depends on.
///
/// Implementations own transport, auth and retries; the orchestrator never retries.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a complete buffer under `key` in `bucket`
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        acl: &AclPolicy,
    ) -> StoreResult<StoredObject>;

    /// Read an object back
    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes>;

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool>;

    /// Create the bucket with `acl` on the bucket and its default object ACL.
    ///
    /// Returns [`StoreError::Conflict`](crate::StoreError::Conflict) when it already exists.
    async fn create_bucket(&self, bucket: &BucketIdentity, acl: &AclPolicy) -> StoreResult<()>;
}

/// Names under which an object was stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub bucket_name: String,
    pub object_name: String,
}

/// Principal class an ACL grant applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AclEntity {
    #[serde(rename = "allUsers")]
    AllUsers,
    #[serde(rename = "allAuthenticatedUsers")]
    AllAuthenticatedUsers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AclRole {
    Reader,
    Writer,
    Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGrant {
    pub entity: AclEntity,
    pub role: AclRole,
}

/// Grants applied to a bucket and to its default object ACL
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AclPolicy {
    pub grants: Vec<AclGrant>,
}

impl AclPolicy {
    /// Anyone may read, any authenticated principal may write
    pub fn public_read() -> Self {
        Self::default()
            .grant(AclEntity::AllUsers, AclRole::Reader)
            .grant(AclEntity::AllAuthenticatedUsers, AclRole::Writer)
    }

    pub fn grant(mut self, entity: AclEntity, role: AclRole) -> Self {
        self.grants.push(AclGrant { entity, role });
        self
    }

    /// Whether unauthenticated principals can read objects
    pub fn is_public_read(&self) -> bool {
        self.grants
            .iter()
            .any(|g| g.entity == AclEntity::AllUsers && g.role != AclRole::Writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_read_policy_grants_readers_and_writers() {
        let acl = AclPolicy::public_read();
        assert_eq!(acl.grants.len(), 2);
        assert!(acl.is_public_read());
        assert_eq!(
            serde_json::to_value(&acl.grants).unwrap(),
            serde_json::json!([
                {"entity": "allUsers", "role": "READER"},
                {"entity": "allAuthenticatedUsers", "role": "WRITER"}
            ])
        );
    }

    #[test]
    fn empty_policy_is_private() {
        assert!(!AclPolicy::default().is_public_read());
    }
}
