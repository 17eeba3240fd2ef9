//! HTTP Source Adapter
//!
//! Fetches resources over HTTP. The resource id is either a full URL or a
//! path appended to a configured base URL.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::domain::ports::{FetchResult, Headers, Payload, Response, Source, SourceError};
use crate::error::{Error, Result};

/// Configuration for the HTTP source
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Prefix for ids that are not absolute URLs
    pub base_url: Option<String>,

    /// Request timeout
    pub timeout: Duration,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// `Source` backed by `reqwest`.
///
/// Non-2xx responses become a [`SourceError`] carrying the code under
/// `status`, so 403 and 404 are cacheable with the default status fields.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    config: HttpSourceConfig,
}

impl HttpSource {
    pub fn new(config: HttpSourceConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Upstream(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url_for(&self, resource_id: &str) -> String {
        match &self.config.base_url {
            Some(base) if url::Url::parse(resource_id).is_err() => {
                format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    resource_id.trim_start_matches('/')
                )
            }
            _ => resource_id.to_string(),
        }
    }
}

fn collect_headers(map: &reqwest::header::HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_ascii_lowercase(), Value::from(value));
        }
    }
    headers
}

#[async_trait]
impl Source for HttpSource {
    #[instrument(skip(self), fields(url = tracing::field::Empty))]
    async fn fetch(&self, resource_id: &str) -> FetchResult {
        let url = self.url_for(resource_id);
        tracing::Span::current().record("url", url.as_str());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::new(e.to_string()))?;

        let status = response.status();
        let headers = collect_headers(response.headers());
        debug!(status = status.as_u16(), "Upstream responded");

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Upstream error");
            return Err(SourceError::new(reason)
                .with_status("status", status.as_u16())
                .with_headers(headers));
        }

        let is_json = headers
            .get("content-type")
            .and_then(Value::as_str)
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false);

        let body = response
            .bytes()
            .await
            .map_err(|e| SourceError::new(e.to_string()))?;

        let payload = if is_json {
            match serde_json::from_slice::<Value>(&body) {
                Ok(value) => Payload::Json(value),
                Err(_) => Payload::Bytes(body),
            }
        } else {
            Payload::Bytes(body)
        };

        Ok(Response::new(payload).with_headers(headers))
    }
}
