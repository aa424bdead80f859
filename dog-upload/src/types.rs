use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{UploadError, UploadOutcome};

/// Stream of bytes for upload content
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Where the bytes of an upload come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadSource {
    /// A local file written by the host; the path may be missing on malformed requests
    File { path: Option<PathBuf> },
    /// A remote resource, fetched and normalized before upload
    Url { url: String },
}

/// The payload half of an upload request
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub source: UploadSource,
    pub name: String,
    /// Declared size in bytes
    pub size: u64,
}

impl UploadPayload {
    pub fn file<P: Into<PathBuf>, S: Into<String>>(path: P, name: S, size: u64) -> Self {
        Self {
            source: UploadSource::File {
                path: Some(path.into()),
            },
            name: name.into(),
            size,
        }
    }

    pub fn url<U: Into<String>>(url: U, size: u64) -> Self {
        Self {
            source: UploadSource::Url { url: url.into() },
            name: String::new(),
            size,
        }
    }
}

/// Request to upload an image or file; built per call, never persisted
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub payload: Option<UploadPayload>,
    pub context: Option<String>,
    pub uploader_id: Option<String>,
}

impl UploadRequest {
    pub fn new(payload: UploadPayload) -> Self {
        Self {
            payload: Some(payload),
            context: None,
            uploader_id: None,
        }
    }

    /// Use a caller-supplied context; an empty string still counts as supplied
    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_uploader<S: Into<String>>(mut self, uploader_id: S) -> Self {
        self.uploader_id = Some(uploader_id.into());
        self
    }
}

/// Successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub name: String,
    pub url: String,
}

/// Storage path prefix grouping related uploads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedContext(String);

impl ResolvedContext {
    pub(crate) fn new(prefix: String) -> Self {
        Self(prefix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResolvedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution context for a single upload call
#[derive(Debug, Clone)]
pub struct UploadCtx {
    pub request_id: String,
    cancel: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Default for UploadCtx {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadCtx {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            cancel: None,
            deadline: None,
        }
    }

    pub fn with_request_id<S: Into<String>>(mut self, request_id: S) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: std::time::Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run one I/O step, aborting it if the token fires or the deadline passes
    pub async fn guard<F, T>(&self, step: F) -> UploadOutcome<T>
    where
        F: Future<Output = UploadOutcome<T>>,
    {
        if self.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = step => result,
            _ = cancelled => Err(UploadError::Cancelled),
            _ = expired => Err(UploadError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_passes_through_completed_step() {
        let ctx = UploadCtx::new();
        let value = ctx.guard(async { Ok::<_, UploadError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn guard_rejects_already_cancelled_context() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = UploadCtx::new().with_cancellation(token);
        let result = ctx.guard(async { Ok::<_, UploadError>(()) }).await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }

    #[tokio::test]
    async fn guard_aborts_pending_step_on_cancel() {
        let token = CancellationToken::new();
        let ctx = UploadCtx::new().with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });

        let result = ctx
            .guard(async {
                std::future::pending::<()>().await;
                Ok::<_, UploadError>(())
            })
            .await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn guard_aborts_on_deadline() {
        let ctx = UploadCtx::new().with_timeout(Duration::from_secs(5));
        let result = ctx
            .guard(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, UploadError>(())
            })
            .await;
        assert!(matches!(result, Err(UploadError::Cancelled)));
    }
}
