//! Lightweight HTTP fetching for pages that are usable as served.

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use std::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use super::PageFetcher;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::registry::FetchMode;

/// `reqwest` client configured with a desktop browser identity.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-IN,en;q=0.9"));

        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: format!("failed to build http client: {e}"),
            })?;
        Ok(Self {
            client,
            timeout_secs: config.http_timeout_secs,
        })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: &Url, _mode: FetchMode) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e, self.timeout_secs))?;
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e, self.timeout_secs))?;
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "GET ok"
        );
        Ok(body)
    }
}
