use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

use crate::{ByteStream, UploadError, UploadOutcome};

/// Decodes an image and scales it so its shorter edge fills the target dimension
#[derive(Debug, Clone)]
pub struct ImageNormalizer {
    filter: FilterType,
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ImageNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Consume `source` completely and return the resized, re-encoded image
    pub async fn normalize(&self, mut source: ByteStream, target: u32) -> UploadOutcome<Bytes> {
        if target == 0 {
            return Err(UploadError::storage("target dimension must be positive"));
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = source.next().await {
            buf.extend_from_slice(&chunk.map_err(UploadError::storage)?);
        }
        self.normalize_bytes(buf.freeze(), target).await
    }

    /// Resize an already buffered image
    pub async fn normalize_bytes(&self, input: Bytes, target: u32) -> UploadOutcome<Bytes> {
        if target == 0 {
            return Err(UploadError::storage("target dimension must be positive"));
        }
        debug!(bytes = input.len(), target, "normalizing image");

        let filter = self.filter;
        tokio::task::spawn_blocking(move || resize_to_fill(&input, target, filter))
            .await
            .map_err(UploadError::storage)?
    }
}

/// Dimensions after scaling so the shorter edge equals `target`
pub fn fill_dimensions(width: u32, height: u32, target: u32) -> (u32, u32) {
    let shorter = width.min(height).max(1) as f64;
    let scale = target as f64 / shorter;
    let scaled = |edge: u32| ((edge as f64 * scale).round() as u32).max(target);
    if width <= height {
        (target, scaled(height))
    } else {
        (scaled(width), target)
    }
}

fn resize_to_fill(input: &[u8], target: u32, filter: FilterType) -> UploadOutcome<Bytes> {
    let format = image::guess_format(input).map_err(UploadError::storage)?;
    let img = image::load_from_memory_with_format(input, format).map_err(UploadError::storage)?;

    let (width, height) = fill_dimensions(img.width(), img.height(), target);
    let resized = img.resize_exact(width, height, filter);

    encode(&resized, output_format(format))
}

/// Formats the encoder can't write back fall back to PNG
fn output_format(source: ImageFormat) -> ImageFormat {
    match source {
        ImageFormat::Png
        | ImageFormat::Jpeg
        | ImageFormat::Gif
        | ImageFormat::WebP
        | ImageFormat::Bmp
        | ImageFormat::Tiff => source,
        _ => ImageFormat::Png,
    }
}

fn encode(img: &DynamicImage, format: ImageFormat) -> UploadOutcome<Bytes> {
    // JPEG has no alpha channel
    let img = if format == ImageFormat::Jpeg {
        DynamicImage::ImageRgb8(img.to_rgb8())
    } else {
        img.clone()
    };

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).map_err(UploadError::storage)?;
    Ok(Bytes::from(out.into_inner()))
}
