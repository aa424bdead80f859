use bytes::Bytes;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::context::{object_key, resolve_context};
use crate::metadata::MetadataClient;
use crate::source::{collect_capped, fetch_stream, filename_from_url, read_file};
use crate::{
    BlobStore, BucketResolver, ImageNormalizer, UploadConfig, UploadCtx, UploadError,
    UploadOutcome, UploadPayload, UploadRequest, UploadResult, UploadSource,
};

/// Which inbound hook a request arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Image,
    File,
}

impl UploadKind {
    fn label(self) -> &'static str {
        match self {
            UploadKind::Image => "image",
            UploadKind::File => "file",
        }
    }
}

/// Validates uploads, prepares their bytes and hands them to the blob store
pub struct UploadOrchestrator {
    store: Arc<dyn BlobStore>,
    buckets: BucketResolver,
    normalizer: ImageNormalizer,
    http: Client,
    config: UploadConfig,
}

impl UploadOrchestrator {
    /// Create an orchestrator with its own HTTP client and bucket resolver
    pub fn new<S: BlobStore + 'static>(store: S, config: UploadConfig) -> UploadOutcome<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(UploadError::storage)?;
        Ok(Self::with_client(Arc::new(store), http, config))
    }

    /// Create an orchestrator sharing an existing store handle and HTTP client
    pub fn with_client(store: Arc<dyn BlobStore>, http: Client, config: UploadConfig) -> Self {
        let metadata = MetadataClient::new(http.clone(), &config.bucket);
        let buckets = BucketResolver::new(Arc::clone(&store), metadata, config.bucket.clone());
        Self {
            store,
            buckets,
            normalizer: ImageNormalizer::new(),
            http,
            config,
        }
    }

    /// Replace the image normalizer
    pub fn with_normalizer(mut self, normalizer: ImageNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Upload an image from a local file or a remote URL
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn upload_image(
        &self,
        ctx: &UploadCtx,
        request: UploadRequest,
    ) -> UploadOutcome<UploadResult> {
        self.upload(ctx, request, UploadKind::Image).await
    }

    /// Upload a local file
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn upload_file(
        &self,
        ctx: &UploadCtx,
        request: UploadRequest,
    ) -> UploadOutcome<UploadResult> {
        self.upload(ctx, request, UploadKind::File).await
    }

    async fn upload(
        &self,
        ctx: &UploadCtx,
        request: UploadRequest,
        kind: UploadKind,
    ) -> UploadOutcome<UploadResult> {
        debug!(kind = kind.label(), "validating");
        let payload = self.validate(&request, kind)?;

        let (filename, buffer) = match &payload.source {
            UploadSource::File { path: Some(path) } => {
                debug!(path = %path.display(), "reading");
                let buffer = ctx.guard(read_file(path)).await?;
                (payload.name.clone(), buffer)
            }
            UploadSource::Url { url } => {
                debug!(%url, "fetching and resizing");
                let filename = filename_from_url(url)?;
                let buffer = ctx.guard(self.fetch_and_resize(url)).await?;
                (filename, buffer)
            }
            UploadSource::File { path: None } => {
                return Err(UploadError::invalid(format!("invalid {} path", kind.label())))
            }
        };

        let context = resolve_context(request.context.as_deref(), request.uploader_id.as_deref());
        let key = object_key(&context, &filename)?;
        let bucket = ctx.guard(async { Ok(self.buckets.resolve_bucket().await) }).await?;

        debug!(bucket = %bucket.name(), %key, bytes = buffer.len(), "uploading");
        let stored = ctx
            .guard(async {
                self.store
                    .put(&bucket.name(), &key, buffer, self.buckets.acl())
                    .await
                    .map_err(UploadError::from)
            })
            .await?;

        let url = format!(
            "{}{}/{}",
            self.config.domain_root, stored.bucket_name, stored.object_name
        );
        info!(%url, "upload stored");

        Ok(UploadResult {
            name: filename,
            url,
        })
    }

    /// Checks run in order; the first failure wins
    fn validate<'a>(
        &self,
        request: &'a UploadRequest,
        kind: UploadKind,
    ) -> UploadOutcome<&'a UploadPayload> {
        let payload = request
            .payload
            .as_ref()
            .ok_or_else(|| UploadError::invalid(format!("invalid {}", kind.label())))?;

        let has_local_source = match &payload.source {
            UploadSource::File { path } => path.as_ref().is_some_and(|p| !p.as_os_str().is_empty()),
            UploadSource::Url { .. } => kind == UploadKind::Image,
        };
        if !has_local_source {
            return Err(UploadError::invalid(format!("invalid {} path", kind.label())));
        }

        if payload.size > self.config.max_file_size_bytes() {
            tracing::error!(
                size = payload.size,
                limit_kb = self.config.max_file_size_kb,
                "error:file-too-big"
            );
            return Err(UploadError::too_big(self.config.max_file_size_kb));
        }

        Ok(payload)
    }

    async fn fetch_and_resize(&self, url: &str) -> UploadOutcome<Bytes> {
        let stream = fetch_stream(&self.http, url).await?;
        let body = collect_capped(stream, self.config.max_file_size_kb).await?;
        self.normalizer
            .normalize_bytes(body, self.config.image_dimension)
            .await
    }

    /// Bucket resolver shared by every upload through this orchestrator
    pub fn buckets(&self) -> &BucketResolver {
        &self.buckets
    }

    /// Get configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }
}
