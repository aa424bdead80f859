use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Url};
use std::path::Path;
use tracing::warn;

use crate::{ByteStream, UploadError, UploadOutcome};

/// Read a host-written upload fully into memory
pub async fn read_file(path: &Path) -> UploadOutcome<Bytes> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(UploadError::storage)
}

/// Final path segment of a remote resource, kept encoded, used as the stored filename
pub fn filename_from_url(url: &str) -> UploadOutcome<String> {
    let parsed = Url::parse(url)
        .map_err(|e| UploadError::invalid(format!("invalid image url: {e}")))?;

    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| UploadError::invalid(format!("invalid image url: {url} has no filename")))
}

/// Open a remote resource as a byte stream
pub async fn fetch_stream(client: &Client, url: &str) -> UploadOutcome<ByteStream> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(UploadError::storage)?;

    let stream = response.bytes_stream().map_err(std::io::Error::other);
    Ok(Box::pin(stream))
}

/// Buffer a remote body, stopping as soon as it exceeds `limit_kb`.
///
/// The declared size of a URL upload is only a hint; this bounds what is actually read.
pub async fn collect_capped(mut stream: ByteStream, limit_kb: u64) -> UploadOutcome<Bytes> {
    let limit = limit_kb.saturating_mul(1024);
    let mut buf = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(UploadError::storage)?;
        if (buf.len() + chunk.len()) as u64 > limit {
            warn!(limit_kb, "remote body exceeds upload limit");
            return Err(UploadError::too_big(limit_kb));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
