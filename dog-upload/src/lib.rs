//! # dog-upload: context-scoped blob uploads
//!
//! `dog-upload` takes an image or file handed over by a forum host, optionally
//! resizes it, stores it under a deterministic key in a lazily resolved bucket
//! and returns a stable public URL.
//!
//! ## Key Features
//!
//! - **Deterministic URLs**: `<domain root><bucket>/uploads/<context>/<filename>`
//! - **Lazy bucket resolution**: project and environment discovered from the
//!   platform metadata service once, bucket created once, conflicts ignored
//! - **Image normalization**: remote images are scaled so the shorter edge
//!   fills the configured dimension
//! - **Storage agnostic**: Google Cloud Storage, S3-compatible stores (feature
//!   `s3`), in-memory, or any [`BlobStore`] implementation
//! - **Cancellable**: every I/O step honours the caller's [`UploadCtx`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dog_upload::prelude::*;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadOutcome<()> {
//! let store = MemoryBlobStore::new();
//! let uploads = UploadOrchestrator::new(store, UploadConfig::from_env())?;
//!
//! let request = UploadRequest::new(UploadPayload::file("/tmp/upload-1", "notes.txt", 16))
//!     .with_uploader("42");
//!
//! let result = uploads.upload_file(&UploadCtx::new(), request).await?;
//! println!("{} -> {}", result.name, result.url);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  UploadPlugin (host) │  ← host JSON, lifecycle hooks
//! ├──────────────────────┤
//! │  UploadOrchestrator  │  ← validation, context, resize, key, URL
//! ├──────────────────────┤
//! │  BucketResolver      │  ← metadata lookup, create-once
//! ├──────────────────────┤
//! │  BlobStore           │  ← storage primitives
//! └──────────────────────┘
//! ```

mod bucket;
pub mod config;
mod context;
mod error;
mod gcs_store;
mod memory_store;
pub mod metadata;
mod normalize;
mod orchestrator;
pub mod plugin;
mod retry;
#[cfg(feature = "s3")]
mod s3_store;
pub mod source;
mod store;
mod types;

pub use bucket::{BucketIdentity, BucketResolver};
pub use config::{BucketConfig, UploadConfig};
pub use context::{object_key, resolve_context};
pub use error::{StoreError, StoreResult, UploadError, UploadOutcome, COMPONENT};
pub use gcs_store::{GcsAuth, GcsBlobStore, GcsConfig};
pub use memory_store::MemoryBlobStore;
pub use metadata::MetadataClient;
pub use normalize::{fill_dimensions, ImageNormalizer};
pub use orchestrator::UploadOrchestrator;
pub use plugin::{HostSettings, HostUploadData, UploadPlugin};
pub use retry::{RetryPolicy, RetryingStore};
#[cfg(feature = "s3")]
pub use s3_store::{S3CompatibleStore, S3Config};
pub use store::{AclEntity, AclGrant, AclPolicy, AclRole, BlobStore, StoredObject};
pub use types::{
    ByteStream, ResolvedContext, UploadCtx, UploadPayload, UploadRequest, UploadResult,
    UploadSource,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobStore, MemoryBlobStore, UploadConfig, UploadCtx, UploadError, UploadOrchestrator,
        UploadOutcome, UploadPayload, UploadRequest, UploadResult,
    };
}
