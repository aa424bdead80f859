use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream as AwsByteStream;
use aws_sdk_s3::types::{BucketCannedAcl, ObjectCannedAcl};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::env;

use crate::{AclPolicy, BlobStore, BucketIdentity, StoreError, StoreResult, StoredObject};

/// S3-compatible endpoint settings
#[derive(Clone)]
pub struct S3Config {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    /// Path-style addressing, required by most self-hosted stores
    pub force_path_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

impl S3Config {
    /// `S3_REGION`, `S3_ACCESS_KEY_ID`, `S3_SECRET_ACCESS_KEY`, optional `S3_ENDPOINT_URL`
    pub fn from_env() -> StoreResult<Self> {
        fn get_env(key: &str) -> StoreResult<String> {
            env::var(key).map_err(|_| StoreError::invalid(format!("{} environment variable required", key)))
        }

        let endpoint_url = env::var("S3_ENDPOINT_URL").ok().filter(|v| !v.is_empty());
        Ok(Self {
            region: get_env("S3_REGION")?,
            access_key_id: get_env("S3_ACCESS_KEY_ID")?,
            secret_access_key: get_env("S3_SECRET_ACCESS_KEY")?,
            force_path_style: endpoint_url.is_some(),
            endpoint_url,
        })
    }
}

/// Blob store backed by any S3-compatible service
#[derive(Clone)]
pub struct S3CompatibleStore {
    client: Client,
}

impl S3CompatibleStore {
    pub async fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "dog-upload",
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);
        if let Some(endpoint) = config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let aws_config = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(config.force_path_style)
                .build(),
        );
        Self { client }
    }

    pub async fn from_env() -> StoreResult<Self> {
        Ok(Self::new(S3Config::from_env()?).await)
    }
}

fn object_acl(acl: &AclPolicy) -> ObjectCannedAcl {
    if acl.is_public_read() {
        ObjectCannedAcl::PublicRead
    } else {
        ObjectCannedAcl::Private
    }
}

fn bucket_acl(acl: &AclPolicy) -> BucketCannedAcl {
    if acl.is_public_read() {
        BucketCannedAcl::PublicRead
    } else {
        BucketCannedAcl::Private
    }
}

/// SDK failures are classified by their service error code
fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    use aws_sdk_s3::error::SdkError;

    match &err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => StoreError::transient(err),
        SdkError::ServiceError(service) => match service.err().code() {
            Some("SlowDown") | Some("InternalError") | Some("ServiceUnavailable") => {
                StoreError::transient(err)
            }
            _ => StoreError::backend(err),
        },
        _ => StoreError::backend(err),
    }
}

#[async_trait]
impl BlobStore for S3CompatibleStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        acl: &AclPolicy,
    ) -> StoreResult<StoredObject> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .acl(object_acl(acl))
            .body(AwsByteStream::from(body))
            .send()
            .await
            .map_err(map_sdk_error)?;

        Ok(StoredObject {
            bucket_name: bucket.to_string(),
            object_name: key.to_string(),
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(service) if service.is_no_such_key() => {
                    StoreError::not_found(format!("{bucket}/{key}"))
                }
                _ => map_sdk_error(e),
            })?;

        let data = output.body.collect().await.map_err(StoreError::transient)?;
        Ok(data.into_bytes())
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|s| s.is_not_found()) => Ok(false),
            Err(e) => Err(map_sdk_error(e)),
        }
    }

    async fn create_bucket(&self, bucket: &BucketIdentity, acl: &AclPolicy) -> StoreResult<()> {
        let name = bucket.name();
        match self
            .client
            .create_bucket()
            .bucket(&name)
            .acl(bucket_acl(acl))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error().is_some_and(|s| {
                    s.is_bucket_already_exists() || s.is_bucket_already_owned_by_you()
                }) =>
            {
                Err(StoreError::conflict(name))
            }
            Err(e) => Err(map_sdk_error(e)),
        }
    }
}
