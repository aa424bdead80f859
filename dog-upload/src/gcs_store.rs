use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{BucketConfig, DEFAULT_METADATA_HOST};
use crate::error::status_error;
use crate::metadata::MetadataClient;
use crate::{AclGrant, AclPolicy, BlobStore, BucketIdentity, StoreError, StoreResult, StoredObject};

/// Public Google Cloud Storage endpoint
pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// How requests to the JSON API are authorized
#[derive(Clone, PartialEq, Eq)]
pub enum GcsAuth {
    /// No credentials; for emulators such as fake-gcs-server
    Anonymous,
    /// A fixed OAuth2 access token
    Bearer(String),
    /// The instance service account token from the metadata service
    MetadataServer,
}

impl std::fmt::Debug for GcsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GcsAuth::Anonymous => write!(f, "Anonymous"),
            GcsAuth::Bearer(_) => write!(f, "Bearer([REDACTED])"),
            GcsAuth::MetadataServer => write!(f, "MetadataServer"),
        }
    }
}

/// Google Cloud Storage connection settings
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub endpoint_url: String,
    pub auth: GcsAuth,
    pub metadata_host: String,
    pub timeout: Duration,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_GCS_ENDPOINT.to_string(),
            auth: GcsAuth::Anonymous,
            metadata_host: DEFAULT_METADATA_HOST.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl GcsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// `GCS_ENDPOINT_URL`, `GCS_ACCESS_TOKEN`; on-platform deployments
    /// (`IS_APP_ENGINE`) without a token use the metadata service account
    pub fn from_env() -> Self {
        let var = |key: &str| env::var(key).ok().filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(endpoint) = var("GCS_ENDPOINT_URL") {
            config.endpoint_url = endpoint;
        }
        if let Some(host) = var("GCE_METADATA_HOST") {
            config.metadata_host = if host.contains("://") { host } else { format!("http://{host}") };
        }
        config.auth = match (var("GCS_ACCESS_TOKEN"), var("IS_APP_ENGINE")) {
            (Some(token), _) => GcsAuth::Bearer(token),
            (None, Some(_)) => GcsAuth::MetadataServer,
            (None, None) => GcsAuth::Anonymous,
        };
        config
    }

    pub fn with_endpoint_url<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint_url = endpoint.into();
        self
    }

    pub fn with_auth(mut self, auth: GcsAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_metadata_host<S: Into<String>>(mut self, host: S) -> Self {
        self.metadata_host = host.into();
        self
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketInsert<'a> {
    name: &'a str,
    acl: &'a [AclGrant],
    default_object_acl: &'a [AclGrant],
}

#[derive(Deserialize)]
struct ObjectResource {
    name: String,
    bucket: String,
}

/// Blob store backed by the Cloud Storage JSON API
pub struct GcsBlobStore {
    client: Client,
    endpoint: String,
    auth: GcsAuth,
    metadata: MetadataClient,
    token: Mutex<Option<CachedToken>>,
}

impl GcsBlobStore {
    pub fn new(config: GcsConfig) -> StoreResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(StoreError::backend)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: GcsConfig) -> Self {
        let metadata_config = BucketConfig::new()
            .on_platform()
            .with_metadata_host(config.metadata_host.clone());
        Self {
            metadata: MetadataClient::new(client.clone(), &metadata_config),
            client,
            endpoint: config.endpoint_url.trim_end_matches('/').to_string(),
            auth: config.auth,
            token: Mutex::new(None),
        }
    }

    pub fn from_env() -> StoreResult<Self> {
        Self::new(GcsConfig::from_env())
    }

    async fn authorize(&self, request: RequestBuilder) -> StoreResult<RequestBuilder> {
        match &self.auth {
            GcsAuth::Anonymous => Ok(request),
            GcsAuth::Bearer(token) => Ok(request.bearer_auth(token)),
            GcsAuth::MetadataServer => Ok(request.bearer_auth(self.service_account_token().await?)),
        }
    }

    /// Cached until a minute before expiry
    async fn service_account_token(&self) -> StoreResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at - ChronoDuration::seconds(60) > Utc::now() {
                return Ok(token.value.clone());
            }
        }

        let fresh = self
            .metadata
            .access_token()
            .await
            .ok_or_else(|| StoreError::transient("metadata service returned no access token"))?;
        debug!(expires_in = fresh.expires_in, "refreshed service account token");

        let token = CachedToken {
            value: fresh.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(fresh.expires_in),
        };
        *cached = Some(token.clone());
        Ok(token.value)
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<reqwest::Response> {
        self.authorize(request)
            .await?
            .send()
            .await
            .map_err(StoreError::transient)
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/storage/v1/b/{}/o/{}",
            self.endpoint,
            urlencoding::encode(bucket),
            urlencoding::encode(key)
        )
    }
}

/// Content type inferred from the object key's extension
fn content_type_for(key: &str) -> &'static str {
    image::ImageFormat::from_path(key)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    /// Objects inherit the bucket's default object ACL
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        _acl: &AclPolicy,
    ) -> StoreResult<StoredObject> {
        let url = format!(
            "{}/upload/storage/v1/b/{}/o",
            self.endpoint,
            urlencoding::encode(bucket)
        );
        let request = self
            .client
            .post(url)
            .query(&[("uploadType", "media"), ("name", key)])
            .header(reqwest::header::CONTENT_TYPE, content_type_for(key))
            .body(body);

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(status_error(response.status(), "object upload"));
        }

        let object: ObjectResource = response.json().await.map_err(StoreError::transient)?;
        Ok(StoredObject {
            bucket_name: object.bucket,
            object_name: object.name,
        })
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<Bytes> {
        let request = self
            .client
            .get(self.object_url(bucket, key))
            .query(&[("alt", "media")]);

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StoreError::not_found(format!("{bucket}/{key}"))),
            status if status.is_success() => {
                response.bytes().await.map_err(StoreError::transient)
            }
            status => Err(status_error(status, "object download")),
        }
    }

    async fn bucket_exists(&self, bucket: &str) -> StoreResult<bool> {
        let url = format!("{}/storage/v1/b/{}", self.endpoint, urlencoding::encode(bucket));
        let response = self.send(self.client.get(url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(status_error(status, "bucket lookup")),
        }
    }

    async fn create_bucket(&self, bucket: &BucketIdentity, acl: &AclPolicy) -> StoreResult<()> {
        let name = bucket.name();
        let body = BucketInsert {
            name: &name,
            acl: &acl.grants,
            default_object_acl: &acl.grants,
        };
        let request = self
            .client
            .post(format!("{}/storage/v1/b", self.endpoint))
            .query(&[("project", bucket.project_id.as_str())])
            .json(&body);

        let response = self.send(request).await?;
        match response.status() {
            StatusCode::CONFLICT => Err(StoreError::conflict(name)),
            status if status.is_success() => Ok(()),
            status => Err(status_error(status, "bucket creation")),
        }
    }
}
