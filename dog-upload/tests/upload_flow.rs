use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use image::{DynamicImage, GenericImageView, ImageBuffer, ImageFormat, Rgba};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use dog_upload::{
    BucketConfig, HostSettings, HostUploadData, MemoryBlobStore, UploadConfig, UploadCtx, UploadError,
    UploadOrchestrator, UploadPayload, UploadPlugin, UploadRequest,
};

const DOMAIN_ROOT: &str = "https://storage.googleapis.com/";

/// Serve `router` on an ephemeral local port and return its base URL
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_pixel(width, height, Rgba([20u8, 120, 220, 255]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

/// Remote image host serving good, missing, oversized and stalled images
fn image_host() -> Router {
    Router::new()
        .route("/y/photo.JPG", get(|| async { png(400, 300) }))
        .route("/y/missing.png", get(|| async { StatusCode::NOT_FOUND }))
        .route("/y/huge.png", get(|| async { vec![0u8; 64 * 1024] }))
        .route(
            "/y/slow.png",
            get(|| async {
                std::future::pending::<()>().await;
                StatusCode::OK
            }),
        )
}

fn config() -> UploadConfig {
    UploadConfig::new().with_bucket(BucketConfig::new().with_fallback_project("forum"))
}

fn orchestrator(store: &MemoryBlobStore) -> UploadOrchestrator {
    UploadOrchestrator::new(store.clone(), config()).unwrap()
}

#[tokio::test]
async fn remote_image_is_resized_and_stored_under_generated_context() {
    let base = serve(image_host()).await;
    let store = MemoryBlobStore::new();
    let uploads = orchestrator(&store);

    let request = UploadRequest::new(UploadPayload::url(format!("{base}/y/photo.JPG"), 4096))
        .with_uploader("7");
    let result = uploads.upload_image(&UploadCtx::new(), request).await.unwrap();

    assert_eq!(result.name, "photo.JPG");
    let prefix = format!("{DOMAIN_ROOT}forum-default-nodebb-debug/uploads/uuid/7/");
    assert!(result.url.starts_with(&prefix), "unexpected url {}", result.url);
    assert!(result.url.ends_with("/photo.JPG"));

    let stored = store.fetch_url(DOMAIN_ROOT, &result.url).unwrap();
    let decoded = image::load_from_memory(&stored).unwrap();
    assert_eq!(decoded.dimensions(), (171, 128));
}

#[tokio::test]
async fn local_file_round_trips_through_its_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload-1");
    tokio::fs::write(&path, b"minutes of the meeting").await.unwrap();

    let store = MemoryBlobStore::new();
    let request = UploadRequest::new(UploadPayload::file(&path, "notes.txt", 22))
        .with_context("/topic/5");
    let result = orchestrator(&store)
        .upload_file(&UploadCtx::new(), request)
        .await
        .unwrap();

    assert_eq!(result.name, "notes.txt");
    assert_eq!(
        result.url,
        format!("{DOMAIN_ROOT}forum-default-nodebb-debug/uploads/topic/5/notes.txt")
    );
    assert_eq!(
        &store.fetch_url(DOMAIN_ROOT, &result.url).unwrap()[..],
        b"minutes of the meeting"
    );
}

#[tokio::test]
async fn empty_context_stores_directly_under_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload-2");
    tokio::fs::write(&path, b"x").await.unwrap();

    let store = MemoryBlobStore::new();
    let request = UploadRequest::new(UploadPayload::file(&path, "a.txt", 1)).with_context("");
    let result = orchestrator(&store)
        .upload_file(&UploadCtx::new(), request)
        .await
        .unwrap();

    assert_eq!(
        result.url,
        format!("{DOMAIN_ROOT}forum-default-nodebb-debug/uploads/a.txt")
    );
}

#[tokio::test]
async fn concurrent_uploads_share_one_bucket_creation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload-3");
    tokio::fs::write(&path, b"payload").await.unwrap();

    let store = MemoryBlobStore::new();
    let uploads = Arc::new(orchestrator(&store));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let uploads = Arc::clone(&uploads);
            let path = path.clone();
            tokio::spawn(async move {
                let request = UploadRequest::new(UploadPayload::file(path, "same.txt", 7))
                    .with_uploader(i.to_string());
                uploads.upload_file(&UploadCtx::new(), request).await
            })
        })
        .collect();

    let mut urls = std::collections::HashSet::new();
    for handle in handles {
        urls.insert(handle.await.unwrap().unwrap().url);
    }

    assert_eq!(urls.len(), 16);
    assert_eq!(store.create_attempts(), 1);
    assert_eq!(store.put_count(), 16);
}

#[tokio::test]
async fn failed_fetch_is_a_tagged_storage_error() {
    let base = serve(image_host()).await;
    let store = MemoryBlobStore::new();

    let request = UploadRequest::new(UploadPayload::url(format!("{base}/y/missing.png"), 10));
    let err = orchestrator(&store)
        .upload_image(&UploadCtx::new(), request)
        .await
        .unwrap_err();

    assert!(err.is_storage());
    assert!(err.to_string().starts_with("dog-upload :: "));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn cancelling_a_stalled_fetch_aborts_the_upload() {
    let base = serve(image_host()).await;
    let store = MemoryBlobStore::new();
    let uploads = orchestrator(&store);

    let token = CancellationToken::new();
    let ctx = UploadCtx::new().with_cancellation(token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let request = UploadRequest::new(UploadPayload::url(format!("{base}/y/slow.png"), 10));
    let err = uploads.upload_image(&ctx, request).await.unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn plugin_forwards_host_data_and_resets_on_deactivate() {
    let base = serve(image_host()).await;
    let store = MemoryBlobStore::new();
    let plugin = UploadPlugin::new(orchestrator(&store));
    plugin.load();
    assert!(plugin.is_active());

    let data = HostUploadData::from_value(json!({
        "image": { "url": format!("{base}/y/photo.JPG"), "name": "ignored.png", "size": 512 },
        "context": "profile/42",
        "uid": 42
    }))
    .unwrap();
    let result = plugin.upload_image(data).await.unwrap();
    assert_eq!(result.name, "photo.JPG");
    assert!(result.url.ends_with("/uploads/profile/42/photo.JPG"));
    assert_eq!(store.create_attempts(), 1);

    plugin.deactivate().await;
    assert!(!plugin.is_active());
    assert!(plugin.orchestrator().buckets().cached().await.is_none());

    plugin.activate();
    let data = HostUploadData::from_value(json!({
        "image": { "url": format!("{base}/y/photo.JPG"), "size": 512 }
    }))
    .unwrap();
    plugin.upload_image(data).await.unwrap();

    // The second attempt hits an existing bucket and still succeeds
    assert_eq!(store.create_attempts(), 2);
}

#[tokio::test]
async fn plugin_rejects_oversized_files_with_host_message() {
    let store = MemoryBlobStore::new();
    let uploads = UploadOrchestrator::new(store.clone(), config().with_max_file_size_kb(1)).unwrap();
    let plugin = UploadPlugin::new(uploads);

    let data = HostUploadData::from_value(json!({
        "file": { "path": "/tmp/upload-big", "name": "big.bin", "size": "4096" }
    }))
    .unwrap();
    let err = plugin.upload_file(data).await.unwrap_err();

    assert_eq!(err.to_string(), "[[error:file-too-big, 1]]");
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn remote_body_larger_than_limit_is_rejected_despite_declared_size() {
    let base = serve(image_host()).await;
    let store = MemoryBlobStore::new();
    let uploads = UploadOrchestrator::new(store.clone(), config().with_max_file_size_kb(16)).unwrap();

    let request = UploadRequest::new(UploadPayload::url(format!("{base}/y/huge.png"), 10));
    let err = uploads.upload_image(&UploadCtx::new(), request).await.unwrap_err();

    assert!(matches!(err, UploadError::FileTooBig { limit_kb: 16 }));
    assert_eq!(store.put_count(), 0);
}

#[tokio::test]
async fn traversal_filenames_never_reach_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload-4");
    tokio::fs::write(&path, b"x").await.unwrap();

    let store = MemoryBlobStore::new();
    let uploads = orchestrator(&store);

    for (name, context) in [("../../evil.png", "c"), ("a.png", "profile/../../..")] {
        let request = UploadRequest::new(UploadPayload::file(&path, name, 1)).with_context(context);
        let err = uploads.upload_file(&UploadCtx::new(), request).await.unwrap_err();
        assert!(matches!(err, UploadError::InvalidInput { .. }), "{name} in {context}");
    }

    assert_eq!(store.put_count(), 0);
    assert_eq!(store.create_attempts(), 0);
}

#[tokio::test]
async fn plugin_uploads_local_file_when_url_is_also_sent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("upload-5");
    tokio::fs::write(&path, b"abc").await.unwrap();

    let store = MemoryBlobStore::new();
    let plugin = UploadPlugin::new(orchestrator(&store));

    let data = HostUploadData::from_value(json!({
        "file": { "path": path.to_str().unwrap(), "url": "http://x/y/a.txt", "name": "a.txt", "size": 3 },
        "context": 5
    }))
    .unwrap();
    let result = plugin.upload_file(data).await.unwrap();

    assert_eq!(result.name, "a.txt");
    assert_eq!(
        result.url,
        format!("{DOMAIN_ROOT}forum-default-nodebb-debug/uploads/5/a.txt")
    );
    assert_eq!(&store.fetch_url(DOMAIN_ROOT, &result.url).unwrap()[..], b"abc");
}

#[tokio::test]
async fn host_settings_drive_limit_and_dimension() {
    let base = serve(image_host()).await;
    let settings: HostSettings = serde_json::from_value(json!({
        "maximumFileSize": "1",
        "profileImageDimension": "64"
    }))
    .unwrap();
    let store = MemoryBlobStore::new();
    let uploads = UploadOrchestrator::new(store.clone(), settings.apply(config())).unwrap();

    let request = UploadRequest::new(UploadPayload::url(format!("{base}/y/photo.JPG"), 2048));
    let err = uploads.upload_image(&UploadCtx::new(), request).await.unwrap_err();
    assert_eq!(err.to_string(), "[[error:file-too-big, 1]]");

    let settings: HostSettings =
        serde_json::from_value(json!({ "profileImageDimension": "64" })).unwrap();
    let uploads = UploadOrchestrator::new(store.clone(), settings.apply(config())).unwrap();
    let request = UploadRequest::new(UploadPayload::url(format!("{base}/y/photo.JPG"), 100));
    let result = uploads.upload_image(&UploadCtx::new(), request).await.unwrap();

    let stored = store.fetch_url(DOMAIN_ROOT, &result.url).unwrap();
    assert_eq!(image::load_from_memory(&stored).unwrap().dimensions(), (85, 64));
}
