use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::BucketConfig;

const ATTRIBUTES_PATH: &str = "/computeMetadata/v1/instance/attributes/";
const TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

/// Project id attribute
pub const PROJECT_KEY: &str = "gae_project";

/// Deployment (backend) name attribute
pub const BACKEND_NAME_KEY: &str = "gae_backend_name";

/// Client for the platform metadata service.
///
/// Lookups never fail: off-platform, on transport errors, on non-200 statuses
/// and on empty bodies the supplied fallback is returned.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
    host: String,
    enabled: bool,
    requests: Arc<AtomicUsize>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct AccessToken {
    pub access_token: String,
    pub expires_in: i64,
}

impl MetadataClient {
    pub fn new(client: Client, config: &BucketConfig) -> Self {
        Self {
            client,
            host: config.metadata_host.trim_end_matches('/').to_string(),
            enabled: config.on_platform,
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of requests issued to the metadata service so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Look up an instance attribute, resolving to `fallback` when unavailable
    pub async fn attribute(&self, key: &str, fallback: &str) -> String {
        if !self.enabled {
            return fallback.to_string();
        }

        let url = format!("{}{}{}", self.host, ATTRIBUTES_PATH, key);
        match self.fetch(&url).await {
            Some(value) if !value.is_empty() => value,
            _ => {
                debug!(key, fallback, "metadata attribute unavailable, using fallback");
                fallback.to_string()
            }
        }
    }

    /// Default service account token, if the platform provides one
    pub(crate) async fn access_token(&self) -> Option<AccessToken> {
        if !self.enabled {
            return None;
        }
        let url = format!("{}{}", self.host, TOKEN_PATH);
        let body = self.fetch(&url).await?;
        serde_json::from_str(&body).ok()
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let response = match self
            .client
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(url, error = %e, "metadata request failed");
                return None;
            }
        };

        if response.status() != StatusCode::OK {
            debug!(url, status = %response.status(), "metadata request rejected");
            return None;
        }

        response.text().await.ok()
    }
}
