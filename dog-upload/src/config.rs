use std::env;
use std::time::Duration;

/// Public URL prefix for Google Cloud Storage objects
pub const DEFAULT_DOMAIN_ROOT: &str = "https://storage.googleapis.com/";

/// Host of the platform metadata service
pub const DEFAULT_METADATA_HOST: &str = "http://metadata.google.internal";

/// Bucket suffix used when no deployment override is configured
pub const DEFAULT_BUCKET_SUFFIX: &str = "nodebb-debug";

/// Infix used when the backend name cannot be discovered
pub const DEFAULT_ENVIRONMENT_INFIX: &str = "default";

/// Bounding dimension for remote profile images
pub const DEFAULT_IMAGE_DIMENSION: u32 = 128;

/// Configuration for upload orchestration
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum accepted upload size in kilobytes
    pub max_file_size_kb: u64,

    /// Target shorter-edge size for images fetched by URL
    pub image_dimension: u32,

    /// Prefix of every returned URL; the bucket name follows directly
    pub domain_root: String,

    pub bucket: BucketConfig,

    /// Timeout applied by the HTTP transport (metadata, remote images)
    pub http_timeout: Duration,
}

/// Where the bucket identity comes from
#[derive(Debug, Clone)]
pub struct BucketConfig {
    /// Set when running on the target cloud platform; enables metadata lookups
    pub on_platform: bool,

    /// Project id used when metadata is unavailable
    pub fallback_project_id: String,

    pub suffix: String,

    pub metadata_host: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_kb: 2048,
            image_dimension: DEFAULT_IMAGE_DIMENSION,
            domain_root: DEFAULT_DOMAIN_ROOT.to_string(),
            bucket: BucketConfig::default(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            on_platform: false,
            fallback_project_id: String::new(),
            suffix: DEFAULT_BUCKET_SUFFIX.to_string(),
            metadata_host: DEFAULT_METADATA_HOST.to_string(),
        }
    }
}

impl UploadConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from the process environment.
    ///
    /// Recognised variables:
    /// - `IS_APP_ENGINE`: any non-empty value enables metadata lookups
    /// - `GCLOUD_PROJECT`: fallback project id
    /// - `GCLOUD_BUCKET_SUFFIX`: bucket suffix
    /// - `UPLOAD_DOMAIN_ROOT`, `UPLOAD_MAX_FILE_SIZE_KB`, `UPLOAD_IMAGE_DIMENSION`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        Self {
            max_file_size_kb: non_empty("UPLOAD_MAX_FILE_SIZE_KB")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_file_size_kb),
            image_dimension: non_empty("UPLOAD_IMAGE_DIMENSION")
                .and_then(|v| v.parse().ok())
                .filter(|d| *d > 0)
                .unwrap_or(defaults.image_dimension),
            domain_root: non_empty("UPLOAD_DOMAIN_ROOT").unwrap_or(defaults.domain_root),
            bucket: BucketConfig {
                on_platform: non_empty("IS_APP_ENGINE").is_some(),
                fallback_project_id: lookup("GCLOUD_PROJECT").unwrap_or_default(),
                suffix: non_empty("GCLOUD_BUCKET_SUFFIX")
                    .unwrap_or_else(|| DEFAULT_BUCKET_SUFFIX.to_string()),
                metadata_host: non_empty("GCE_METADATA_HOST")
                    .map(|h| if h.contains("://") { h } else { format!("http://{h}") })
                    .unwrap_or(defaults.bucket.metadata_host),
            },
            http_timeout: defaults.http_timeout,
        }
    }

    /// Set max upload size in kilobytes
    pub fn with_max_file_size_kb(mut self, kb: u64) -> Self {
        self.max_file_size_kb = kb;
        self
    }

    /// Set target image dimension
    pub fn with_image_dimension(mut self, dimension: u32) -> Self {
        self.image_dimension = dimension;
        self
    }

    /// Set URL prefix for returned objects
    pub fn with_domain_root<S: Into<String>>(mut self, root: S) -> Self {
        self.domain_root = root.into();
        self
    }

    /// Set bucket configuration
    pub fn with_bucket(mut self, bucket: BucketConfig) -> Self {
        self.bucket = bucket;
        self
    }

    /// Set the HTTP transport timeout
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Size limit in bytes
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_kb.saturating_mul(1024)
    }
}

impl BucketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable metadata lookups against the platform metadata service
    pub fn on_platform(mut self) -> Self {
        self.on_platform = true;
        self
    }

    pub fn with_fallback_project<S: Into<String>>(mut self, project_id: S) -> Self {
        self.fallback_project_id = project_id.into();
        self
    }

    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Override the metadata host, e.g. for an emulator
    pub fn with_metadata_host<S: Into<String>>(mut self, host: S) -> Self {
        self.metadata_host = host.into();
        self
    }
}
