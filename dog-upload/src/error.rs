use thiserror::Error;

/// Identity tag prefixed to every storage failure surfaced to callers
pub const COMPONENT: &str = env!("CARGO_PKG_NAME");

/// Result type for orchestrator operations
pub type UploadOutcome<T> = Result<T, UploadError>;

/// Result type for blob store adapter operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced to the caller of an upload
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("{message}")]
    InvalidInput { message: String },

    /// Rendered as the host's translation key so the limit can be displayed
    #[error("[[error:file-too-big, {limit_kb}]]")]
    FileTooBig { limit_kb: u64 },

    #[error("{component} :: {source}")]
    Storage {
        component: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    /// Create an invalid input error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a size policy error carrying the configured limit
    pub fn too_big(limit_kb: u64) -> Self {
        Self::FileTooBig { limit_kb }
    }

    /// Wrap any failure as a storage error tagged with the component identity
    pub fn storage<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let err = Self::Storage {
            component: COMPONENT,
            source: error.into(),
        };
        tracing::error!("{}", err);
        err
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        Self::storage(err)
    }
}

/// Errors produced by blob store adapters
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object not found: {key}")]
    NotFound { key: String },

    /// The bucket already exists; expected in steady state
    #[error("Bucket already exists: {bucket}")]
    Conflict { bucket: String },

    #[error("Invalid request: {message}")]
    Invalid { message: String },

    #[error("Storage backend error: {source}")]
    Backend {
        retryable: bool,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Create a non-retryable backend error from any error type
    pub fn backend<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend {
            retryable: false,
            source: error.into(),
        }
    }

    /// Create a backend error the retry layer may attempt again
    pub fn transient<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend {
            retryable: true,
            source: error.into(),
        }
    }

    pub fn invalid<S: Into<String>>(message: S) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound { key: key.into() }
    }

    pub fn conflict<S: Into<String>>(bucket: S) -> Self {
        Self::Conflict {
            bucket: bucket.into(),
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Backend { retryable, .. } => *retryable,
            Self::Io { source } => matches!(
                source.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Classify an HTTP status from a storage backend.
///
/// 408, 429 and 5xx are retryable; everything else is final.
pub(crate) fn status_error(status: reqwest::StatusCode, context: &str) -> StoreError {
    let message = format!("{context}: HTTP {status}");
    if status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        StoreError::transient(message)
    } else {
        StoreError::backend(message)
    }
}
