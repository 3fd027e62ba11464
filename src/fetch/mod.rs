//! Page acquisition.
//!
//! # Architecture
//!
//! - [`PageFetcher`]: core trait, fetch one URL in a given [`FetchMode`]
//! - [`HttpFetcher`]: plain GET with a desktop user agent
//! - [`WebDriverEngine`]: full rendering through a W3C WebDriver endpoint
//! - [`FetchLayer`]: dispatches between the two by fetch mode
//! - [`RetryFetch`]: decorator adding bounded exponential backoff to any fetcher
//!
//! [`fetch_source`] walks a source's endpoints with any [`PageFetcher`]; an
//! endpoint failure is logged and the source only fails when every endpoint
//! failed.

pub mod browser;
pub mod http;
pub mod retry;

use std::time::Instant;
use tracing::{info, instrument, warn};
use url::Url;

pub use browser::WebDriverEngine;
pub use http::HttpFetcher;
pub use retry::RetryFetch;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::registry::{FetchMode, SourceDescriptor};

/// Raw content of one fetched endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub url: Url,
    pub body: String,
}

/// Anything that can turn a URL into page content.
pub trait PageFetcher {
    /// Bring up whatever engine the fetcher needs. Called once per cycle.
    async fn prepare(&self) -> Result<(), FetchError> {
        Ok(())
    }

    /// Fetch one URL.
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint to fetch
    /// * `mode` - Whether the page must be rendered by a browser
    ///
    /// # Returns
    ///
    /// The page body (rendered DOM for [`FetchMode::Rendered`]).
    async fn fetch_page(&self, url: &Url, mode: FetchMode) -> Result<String, FetchError>;

    /// Release every resource still held. Called once per cycle, on every exit path.
    async fn release(&self) {}
}

/// Dispatches static fetches to HTTP and rendered fetches to WebDriver.
#[derive(Debug)]
pub struct FetchLayer {
    http: HttpFetcher,
    browser: Option<WebDriverEngine>,
}

impl FetchLayer {
    pub fn new(http: HttpFetcher, browser: Option<WebDriverEngine>) -> Self {
        Self { http, browser }
    }

    /// Build both fetchers from configuration.
    pub fn from_config(config: &FetchConfig) -> Result<Self, FetchError> {
        let http = HttpFetcher::new(config)?;
        let browser = match &config.webdriver_url {
            Some(url) => Some(WebDriverEngine::new(url, config)?),
            None => None,
        };
        Ok(Self::new(http, browser))
    }

    /// Wrap in the retry decorator configured by `config`.
    pub fn with_retry(self, config: &FetchConfig) -> RetryFetch<Self> {
        RetryFetch::from_config(self, config)
    }
}

impl PageFetcher for FetchLayer {
    async fn prepare(&self) -> Result<(), FetchError> {
        match &self.browser {
            Some(engine) => engine.ready().await,
            None => {
                warn!("No WebDriver endpoint configured; rendered sources will fail");
                Ok(())
            }
        }
    }

    async fn fetch_page(&self, url: &Url, mode: FetchMode) -> Result<String, FetchError> {
        match (mode, &self.browser) {
            (FetchMode::Static, _) => self.http.fetch_page(url, mode).await,
            (FetchMode::Rendered, Some(engine)) => engine.fetch_page(url, mode).await,
            (FetchMode::Rendered, None) => Err(FetchError::EngineUnavailable(
                "no WebDriver endpoint configured".to_string(),
            )),
        }
    }

    async fn release(&self) {
        if let Some(engine) = &self.browser {
            engine.sweep().await;
        }
    }
}

/// Fetch every endpoint of `source`, in order.
///
/// # Errors
///
/// [`FetchError::NoEndpoints`] for a source without endpoints, otherwise the
/// last endpoint error when no endpoint succeeded.
#[instrument(level = "info", skip_all, fields(source = %source.name, mode = %source.fetch_mode))]
pub async fn fetch_source<F: PageFetcher>(
    fetcher: &F,
    source: &SourceDescriptor,
) -> Result<Vec<RawPage>, FetchError> {
    let t0 = Instant::now();
    let mut pages = Vec::with_capacity(source.endpoints.len());
    let mut last_error = None;

    for url in &source.endpoints {
        match fetcher.fetch_page(url, source.fetch_mode).await {
            Ok(body) => pages.push(RawPage {
                url: url.clone(),
                body,
            }),
            Err(e) => {
                warn!(%url, error = %e, "endpoint fetch failed");
                last_error = Some(e);
            }
        }
    }

    if pages.is_empty() {
        return Err(last_error.unwrap_or_else(|| FetchError::NoEndpoints {
            source_name: source.name.clone(),
        }));
    }
    info!(
        pages = pages.len(),
        failed = source.endpoints.len() - pages.len(),
        bytes = pages.iter().map(|p| p.body.len()).sum::<usize>(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Fetched source"
    );
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use std::collections::HashMap;

    struct MapFetcher(HashMap<String, Result<String, u16>>);

    impl PageFetcher for MapFetcher {
        async fn fetch_page(&self, url: &Url, _mode: FetchMode) -> Result<String, FetchError> {
            match self.0.get(url.as_str()) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::Status {
                    url: url.to_string(),
                    status: *status,
                }),
                None => Err(FetchError::Network {
                    url: url.to_string(),
                    message: "unreachable".into(),
                }),
            }
        }
    }

    fn source() -> SourceDescriptor {
        let yaml = r#"
sources:
  - name: multi
    endpoints: ["https://a.example/", "https://b.example/"]
    strategy: { type: feed }
"#;
        SourceRegistry::from_yaml_str(yaml, "test")
            .unwrap()
            .get("multi")
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_one_endpoint_failing_is_tolerated() {
        let fetcher = MapFetcher(HashMap::from([
            ("https://a.example/".to_string(), Err(404)),
            ("https://b.example/".to_string(), Ok("<rss/>".to_string())),
        ]));
        let pages = fetch_source(&fetcher, &source()).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url.as_str(), "https://b.example/");
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_fails_the_source() {
        let fetcher = MapFetcher(HashMap::new());
        let err = fetch_source(&fetcher, &source()).await.unwrap_err();
        assert!(matches!(err, FetchError::Network { url, .. } if url == "https://b.example/"));
    }

    #[tokio::test]
    async fn test_rendered_fetch_without_engine_is_unavailable() {
        let layer = FetchLayer::from_config(&FetchConfig::default()).unwrap();
        layer.prepare().await.unwrap();
        let url = Url::parse("https://a.example/").unwrap();
        let err = layer.fetch_page(&url, FetchMode::Rendered).await.unwrap_err();
        assert!(matches!(err, FetchError::EngineUnavailable(_)));
        assert!(!err.is_retryable());
    }
}
