//! Forum host glue.
//!
//! The host hands uploads over as loosely typed JSON:
//!
//! ```json
//! { "image": { "url": "https://cdn/x/avatar.png", "name": "avatar.png", "size": 1234 },
//!   "context": "profile/42", "uid": 42 }
//! ```
//!
//! [`UploadPlugin`] turns that into an [`UploadRequest`] and forwards it to the
//! orchestrator. Errors come back through the returned `Result`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::config::DEFAULT_IMAGE_DIMENSION;
use crate::{
    UploadConfig, UploadCtx, UploadError, UploadOrchestrator, UploadOutcome, UploadPayload, UploadRequest,
    UploadResult, UploadSource,
};

/// An upload as described by the host
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostUploadData {
    #[serde(default)]
    pub image: Option<HostUploadItem>,
    #[serde(default)]
    pub file: Option<HostUploadItem>,
    #[serde(default, deserialize_with = "loose_context")]
    pub context: Option<String>,
    #[serde(default, deserialize_with = "loose_string")]
    pub uid: Option<String>,
}

/// The `image` / `file` member of [`HostUploadData`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostUploadItem {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "loose_u64")]
    pub size: u64,
}

impl HostUploadData {
    pub fn from_value(value: Value) -> UploadOutcome<Self> {
        serde_json::from_value(value)
            .map_err(|e| UploadError::invalid(format!("invalid upload data: {e}")))
    }

    pub fn into_image_request(mut self) -> UploadRequest {
        let payload = self.image.take().map(HostUploadItem::into_image_payload);
        self.into_request(payload)
    }

    pub fn into_file_request(mut self) -> UploadRequest {
        let payload = self.file.take().map(HostUploadItem::into_file_payload);
        self.into_request(payload)
    }

    fn into_request(self, payload: Option<UploadPayload>) -> UploadRequest {
        UploadRequest {
            payload,
            context: self.context,
            uploader_id: self.uid,
        }
    }
}

impl HostUploadItem {
    /// A URL wins over a path for images
    fn into_image_payload(self) -> UploadPayload {
        match self.url.clone().filter(|u| !u.is_empty()) {
            Some(url) => UploadPayload {
                source: UploadSource::Url { url },
                name: self.name,
                size: self.size,
            },
            None => self.into_file_payload(),
        }
    }

    /// Files only ever come from the local path; `url` is ignored
    fn into_file_payload(self) -> UploadPayload {
        UploadPayload {
            source: UploadSource::File {
                path: self.path.filter(|p| !p.is_empty()).map(PathBuf::from),
            },
            name: self.name,
            size: self.size,
        }
    }
}

/// Host settings arrive as strings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettings {
    #[serde(default)]
    pub maximum_file_size: Option<String>,
    #[serde(default)]
    pub profile_image_dimension: Option<String>,
}

impl HostSettings {
    /// Upload limit in kilobytes
    pub fn max_file_size_kb(&self) -> Option<u64> {
        self.maximum_file_size.as_deref()?.trim().parse().ok()
    }

    /// Falls back to 128 when missing, zero or unparsable
    pub fn image_dimension(&self) -> u32 {
        self.profile_image_dimension
            .as_deref()
            .and_then(|d| d.trim().parse().ok())
            .filter(|d| *d > 0)
            .unwrap_or(DEFAULT_IMAGE_DIMENSION)
    }

    /// Overlay the host's settings onto an upload configuration
    pub fn apply(&self, mut config: UploadConfig) -> UploadConfig {
        if let Some(kb) = self.max_file_size_kb() {
            config.max_file_size_kb = kb;
        }
        config.image_dimension = self.image_dimension();
        config
    }
}

/// Lifecycle and upload hooks exposed to the forum host
pub struct UploadPlugin {
    orchestrator: Arc<UploadOrchestrator>,
    active: AtomicBool,
}

impl UploadPlugin {
    pub fn new(orchestrator: UploadOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            active: AtomicBool::new(false),
        }
    }

    /// Called once when the host loads the plugin
    pub fn load(&self) {
        self.activate();
    }

    pub fn activate(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!("upload plugin activated");
    }

    /// Forget the resolved bucket so a later activation starts fresh
    pub async fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.orchestrator.buckets().reset().await;
        info!("upload plugin deactivated");
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn orchestrator(&self) -> &UploadOrchestrator {
        &self.orchestrator
    }

    pub async fn upload_image(&self, data: HostUploadData) -> UploadOutcome<UploadResult> {
        self.orchestrator
            .upload_image(&UploadCtx::new(), data.into_image_request())
            .await
    }

    pub async fn upload_file(&self, data: HostUploadData) -> UploadOutcome<UploadResult> {
        self.orchestrator
            .upload_file(&UploadCtx::new(), data.into_file_request())
            .await
    }
}

/// Accepts a string or a number
fn loose_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Strings pass through (even empty); falsy values read as absent, other scalars are stringified
fn loose_context<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some(n.to_string()),
        Some(Value::Bool(true)) => Some("true".to_string()),
        _ => None,
    })
}

/// Accepts a number or a numeric string; anything else reads as zero
fn loose_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn image_url_data_becomes_url_request() {
        let data = HostUploadData::from_value(json!({
            "image": {"url": "http://x/y/photo.JPG", "name": "photo.JPG", "size": "2048"},
            "uid": 42
        }))
        .unwrap();

        let request = data.into_image_request();
        let payload = request.payload.unwrap();
        assert_eq!(
            payload.source,
            UploadSource::Url {
                url: "http://x/y/photo.JPG".into()
            }
        );
        assert_eq!(payload.size, 2048);
        assert_eq!(request.uploader_id.as_deref(), Some("42"));
        assert!(request.context.is_none());
    }

    #[test]
    fn empty_context_is_preserved() {
        let data = HostUploadData::from_value(json!({
            "file": {"path": "/tmp/upload-1", "name": "a.txt", "size": 3},
            "context": ""
        }))
        .unwrap();
        assert_eq!(data.into_file_request().context.as_deref(), Some(""));
    }

    #[test]
    fn file_requests_ignore_url() {
        let data = HostUploadData::from_value(json!({
            "file": {"path": "/tmp/upload-1", "url": "http://x/y/a.txt", "name": "a.txt", "size": 3},
            "context": "c"
        }))
        .unwrap();
        let payload = data.into_file_request().payload.unwrap();
        assert_eq!(
            payload.source,
            UploadSource::File {
                path: Some(PathBuf::from("/tmp/upload-1"))
            }
        );
        assert_eq!(payload.name, "a.txt");
    }

    #[test]
    fn image_requests_prefer_url() {
        let data = HostUploadData::from_value(json!({
            "image": {"path": "/tmp/upload-1", "url": "http://x/y/a.png", "name": "a.png"}
        }))
        .unwrap();
        assert!(matches!(
            data.into_image_request().payload.unwrap().source,
            UploadSource::Url { .. }
        ));
    }

    #[test]
    fn non_string_context_is_coerced() {
        let context = |value: Value| {
            HostUploadData::from_value(json!({ "context": value }))
                .unwrap()
                .context
        };
        assert_eq!(context(json!(5)), Some("5".to_string()));
        assert_eq!(context(json!("/topic/5")), Some("/topic/5".to_string()));
        assert_eq!(context(json!(0)), None);
        assert_eq!(context(json!(false)), None);
        assert_eq!(context(Value::Null), None);
    }

    #[test]
    fn missing_member_yields_no_payload() {
        let data = HostUploadData::from_value(json!({"uid": "7"})).unwrap();
        assert!(data.into_image_request().payload.is_none());
    }

    #[test]
    fn settings_parse_host_strings() {
        let settings: HostSettings = serde_json::from_value(json!({
            "maximumFileSize": "2048",
            "profileImageDimension": "abc"
        }))
        .unwrap();
        assert_eq!(settings.max_file_size_kb(), Some(2048));
        assert_eq!(settings.image_dimension(), 128);
        assert_eq!(HostSettings::default().max_file_size_kb(), None);

        let config = settings.apply(UploadConfig::new().with_image_dimension(256));
        assert_eq!(config.max_file_size_kb, 2048);
        assert_eq!(config.image_dimension, 128);
    }
}
