//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building the HTTP client with the configured identity headers
//! - Spacing requests by a minimum interval
//! - GET requests for pages and image bytes
//! - Error classification
//!
//! Fetches are not retried. A failed page is reported to the caller, which
//! decides whether to skip it.

use crate::config::RequestConfig;
use crate::extract::Document;
use crate::{ConfigError, FetchError, GalleryError};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use reqwest::{Client, Response};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The request configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(GalleryError)` - Invalid header value or client build failure
pub fn build_http_client(config: &RequestConfig) -> Result<Client, GalleryError> {
    let mut headers = HeaderMap::new();
    if !config.referer.is_empty() {
        let value = HeaderValue::from_str(&config.referer).map_err(|e| {
            ConfigError::Validation(format!("referer is not a valid header value: {}", e))
        })?;
        headers.insert(REFERER, value);
    }

    let connect_timeout = std::cmp::min(config.timeout(), Duration::from_secs(10));

    let client = Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(config.timeout())
        .connect_timeout(connect_timeout)
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// Fetches pages and image bytes with a shared politeness interval
pub struct Fetcher {
    client: Client,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl Fetcher {
    /// Creates a fetcher from the request configuration
    pub fn new(config: &RequestConfig) -> Result<Self, GalleryError> {
        let client = build_http_client(config)?;
        Ok(Self::with_client(client, config.min_interval()))
    }

    /// Creates a fetcher around an existing client
    pub fn with_client(client: Client, min_interval: Duration) -> Self {
        Self {
            client,
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// Fetches a page and decodes its body as text
    ///
    /// The returned document carries the final URL after redirects.
    pub async fn fetch(&self, url: &Url) -> Result<Document, FetchError> {
        let response = self.get(url).await?;
        let final_url = response.url().clone();

        let body = response.text().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

        tracing::debug!("Fetched {} ({} bytes)", final_url, body.len());
        Ok(Document::new(final_url, body))
    }

    /// Fetches raw bytes, used for images
    pub async fn fetch_bytes(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        let response = self.get(url).await?;

        let bytes = response.bytes().await.map_err(|e| FetchError::Body {
            url: url.to_string(),
            cause: e.to_string(),
        })?;

        tracing::debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }

    async fn get(&self, url: &Url) -> Result<Response, FetchError> {
        self.pace().await;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    /// Waits until at least `min_interval` has passed since the previous request
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;

        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
    }
}

fn classify_error(url: &Url, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Network {
            url: url.to_string(),
            cause: "Connection refused".to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            cause: error.to_string(),
        }
    }
}
