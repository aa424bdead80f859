use uuid::Uuid;

use crate::{ResolvedContext, UploadError, UploadOutcome};

/// Resolve the storage path prefix for an upload.
///
/// A supplied hint (even an empty one) is used verbatim minus leading slashes.
/// Without a hint a fresh prefix `uuid/<uploader or 0>/<uuid v4>` is generated.
pub fn resolve_context(hint: Option<&str>, uploader_id: Option<&str>) -> ResolvedContext {
    match hint {
        Some(hint) => ResolvedContext::new(hint.trim_start_matches('/').to_string()),
        None => {
            let uploader = uploader_id.filter(|id| !id.is_empty()).unwrap_or("0");
            ResolvedContext::new(format!("uuid/{}/{}", uploader, Uuid::new_v4()))
        }
    }
}

/// Destination object key: `uploads/<context>/<filename>` with empty segments dropped.
///
/// Dot segments, literal or percent-encoded, are rejected so a key can never
/// resolve outside its context once the public URL is normalized.
pub fn object_key(context: &ResolvedContext, filename: &str) -> UploadOutcome<String> {
    let segments: Vec<&str> = std::iter::once("uploads")
        .chain(context.as_str().split('/'))
        .chain(filename.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect();

    if let Some(segment) = segments.iter().find(|s| is_dot_segment(s)) {
        return Err(UploadError::invalid(format!(
            "invalid upload path segment: {segment}"
        )));
    }
    Ok(segments.join("/"))
}

fn is_dot_segment(segment: &str) -> bool {
    let decoded = urlencoding::decode(segment)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    decoded == "." || decoded == ".."
}
