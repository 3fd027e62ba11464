//! Browser rendering over the W3C WebDriver protocol.
//!
//! The engine talks JSON over HTTP to a WebDriver server (chromedriver or a
//! Selenium grid). Every rendered fetch:
//!
//! 1. opens a fresh headless session (one tab) with the configured user agent
//! 2. blocks styles, fonts and images through chromedriver's CDP passthrough
//! 3. navigates with a bounded page-load timeout
//! 4. auto-scrolls and clicks "load more" controls a bounded number of times
//! 5. reads the rendered DOM
//! 6. deletes the session
//!
//! Step 6 runs on every exit path: explicitly after the bounded drive, from
//! [`RenderPage`]'s `Drop` when the fetch future is cancelled, and finally
//! from [`WebDriverEngine::sweep`] at the end of each cycle for anything
//! still registered as open.

use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::PageFetcher;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::registry::FetchMode;

/// Pause after each successful "load more" click.
const LOAD_MORE_SETTLE: Duration = Duration::from_secs(2);
/// Headroom added to HTTP timeouts for WebDriver round-trips.
const COMMAND_SLACK: Duration = Duration::from_secs(10);

const SCROLL_SCRIPT: &str = r#"
const step = arguments[0];
const max = arguments[1];
const done = arguments[arguments.length - 1];
let total = 0;
const timer = setInterval(() => {
  window.scrollBy(0, step);
  total += step;
  if (total >= document.body.scrollHeight || total >= max) {
    clearInterval(timer);
    done(total);
  }
}, 100);
"#;

const LOAD_MORE_SCRIPT: &str = r#"
const selectors = arguments[0];
for (const sel of selectors) {
  let el = null;
  try { el = document.querySelector(sel); } catch (e) { continue; }
  if (el && el.offsetParent !== null && !el.disabled) {
    el.scrollIntoView({ block: "center" });
    el.click();
    return true;
  }
}
return false;
"#;

/// Settings for one rendered fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub user_agent: String,
    pub navigation_timeout: Duration,
    pub render_budget: Duration,
    pub blocked_url_patterns: Vec<String>,
    pub load_more_attempts: u32,
    pub load_more_selectors: Vec<String>,
    pub max_scroll_px: u32,
    pub scroll_step_px: u32,
}

impl RenderSettings {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            navigation_timeout: config.navigation_timeout(),
            render_budget: config.render_budget(),
            blocked_url_patterns: config
                .blocked_url_patterns()
                .into_iter()
                .map(String::from)
                .collect(),
            load_more_attempts: config.load_more_attempts,
            load_more_selectors: config.load_more_selectors.clone(),
            max_scroll_px: config.max_scroll_px,
            scroll_step_px: config.scroll_step_px.max(1),
        }
    }
}

/// Body of `POST /session`.
pub fn session_request(settings: &RenderSettings) -> Value {
    let timeout_ms = settings.navigation_timeout.as_millis() as u64;
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "pageLoadStrategy": "normal",
                "timeouts": { "pageLoad": timeout_ms, "script": timeout_ms },
                "goog:chromeOptions": {
                    "args": [
                        "--headless=new",
                        "--no-sandbox",
                        "--disable-dev-shm-usage",
                        "--disable-gpu",
                        "--window-size=1366,768",
                        format!("--user-agent={}", settings.user_agent),
                    ]
                }
            }
        }
    })
}

/// Body of a CDP passthrough command blocking `patterns`.
pub fn blocked_urls_command(patterns: &[String]) -> Value {
    json!({ "cmd": "Network.setBlockedURLs", "params": { "urls": patterns } })
}

/// Unwrap a WebDriver response, turning `{"value": {"error": ..}}` into an error.
pub fn unwrap_value(command: &str, mut body: Value) -> Result<Value, FetchError> {
    let value = body
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if let Some(kind) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(FetchError::WebDriver {
            command: command.to_string(),
            message: format!("{kind}: {message}"),
        });
    }
    Ok(value)
}

/// Session id from a `POST /session` response value.
pub fn parse_session_id(value: &Value) -> Result<String, FetchError> {
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| FetchError::WebDriver {
            command: "new session".into(),
            message: "response carried no sessionId".into(),
        })
}

fn is_timeout(e: &FetchError) -> bool {
    matches!(e, FetchError::WebDriver { message, .. } if message.starts_with("timeout"))
}

type OpenSessions = Arc<Mutex<HashSet<String>>>;

fn forget(open: &OpenSessions, id: &str) {
    if let Ok(mut set) = open.lock() {
        set.remove(id);
    }
}

async fn delete_session(client: &reqwest::Client, base: &Url, id: &str) -> Result<(), FetchError> {
    let url = format!("{}/session/{id}", base.as_str().trim_end_matches('/'));
    client
        .delete(&url)
        .send()
        .await
        .map_err(|e| FetchError::from_reqwest(&url, e, 0))?;
    Ok(())
}

/// One open WebDriver session.
pub struct RenderPage {
    client: reqwest::Client,
    base: Url,
    id: String,
    open: OpenSessions,
    closed: bool,
}

impl RenderPage {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Delete the session; errors are logged, the session is forgotten either way.
    pub async fn close(mut self) {
        if let Err(e) = delete_session(&self.client, &self.base, &self.id).await {
            warn!(session = %self.id, error = %e, "failed to delete webdriver session");
        }
        forget(&self.open, &self.id);
        self.closed = true;
    }
}

impl Drop for RenderPage {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Cancelled mid-fetch: delete in the background if a runtime is still around;
        // otherwise the id stays registered for the end-of-cycle sweep.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            let base = self.base.clone();
            let id = self.id.clone();
            let open = self.open.clone();
            handle.spawn(async move {
                if delete_session(&client, &base, &id).await.is_ok() {
                    forget(&open, &id);
                }
            });
        }
    }
}

impl fmt::Debug for RenderPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderPage")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Shared rendering engine; one instance serves every rendered source of a cycle.
pub struct WebDriverEngine {
    client: reqwest::Client,
    base: Url,
    settings: RenderSettings,
    open: OpenSessions,
}

impl fmt::Debug for WebDriverEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebDriverEngine")
            .field("base", &self.base.as_str())
            .field("settings", &self.settings)
            .finish()
    }
}

impl WebDriverEngine {
    pub fn new(webdriver_url: &str, config: &FetchConfig) -> Result<Self, FetchError> {
        let base = Url::parse(webdriver_url)
            .map_err(|e| FetchError::InvalidUrl(format!("{webdriver_url}: {e}")))?;
        let settings = RenderSettings::from_config(config);
        let client = reqwest::Client::builder()
            .timeout(settings.navigation_timeout.max(Duration::from_secs(30)) + COMMAND_SLACK)
            .build()
            .map_err(|e| FetchError::EngineUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base,
            settings,
            open: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base.as_str().trim_end_matches('/'))
    }

    async fn command(
        &self,
        name: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, FetchError> {
        let url = self.endpoint(path);
        let mut req = self.client.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let timeout_secs = self.settings.navigation_timeout.as_secs();
        let resp = req
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(&url, e, timeout_secs))?;
        let json: Value = resp.json().await.map_err(|e| FetchError::WebDriver {
            command: name.to_string(),
            message: format!("unreadable response: {e}"),
        })?;
        unwrap_value(name, json)
    }

    /// Readiness probe (`GET /status`); this is the engine's initialisation step.
    #[instrument(level = "info", skip_all, fields(base = %self.base))]
    pub async fn ready(&self) -> Result<(), FetchError> {
        let value = self
            .command("status", reqwest::Method::GET, "/status", None)
            .await
            .map_err(|e| FetchError::EngineUnavailable(e.to_string()))?;
        if value.get("ready").and_then(Value::as_bool) == Some(false) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("not ready");
            return Err(FetchError::EngineUnavailable(message.to_string()));
        }
        info!("WebDriver endpoint ready");
        Ok(())
    }

    /// Open a session and register it as in flight.
    pub async fn open_page(&self) -> Result<RenderPage, FetchError> {
        let value = self
            .command(
                "new session",
                reqwest::Method::POST,
                "/session",
                Some(session_request(&self.settings)),
            )
            .await?;
        let id = parse_session_id(&value)?;
        if let Ok(mut set) = self.open.lock() {
            set.insert(id.clone());
        }
        debug!(session = %id, "opened webdriver session");
        Ok(RenderPage {
            client: self.client.clone(),
            base: self.base.clone(),
            id,
            open: self.open.clone(),
            closed: false,
        })
    }

    async fn block_resources(&self, page: &RenderPage) -> Result<(), FetchError> {
        if self.settings.blocked_url_patterns.is_empty() {
            return Ok(());
        }
        let path = format!("/session/{}/goog/cdp/execute", page.id);
        self.command(
            "cdp Network.enable",
            reqwest::Method::POST,
            &path,
            Some(json!({ "cmd": "Network.enable", "params": {} })),
        )
        .await?;
        self.command(
            "cdp Network.setBlockedURLs",
            reqwest::Method::POST,
            &path,
            Some(blocked_urls_command(&self.settings.blocked_url_patterns)),
        )
        .await?;
        Ok(())
    }

    async fn auto_scroll(&self, page: &RenderPage) -> Result<u64, FetchError> {
        let value = self
            .command(
                "execute async (scroll)",
                reqwest::Method::POST,
                &format!("/session/{}/execute/async", page.id),
                Some(json!({
                    "script": SCROLL_SCRIPT,
                    "args": [self.settings.scroll_step_px, self.settings.max_scroll_px],
                })),
            )
            .await?;
        Ok(value.as_u64().unwrap_or_default())
    }

    async fn click_load_more(&self, page: &RenderPage) -> Result<bool, FetchError> {
        let value = self
            .command(
                "execute sync (load more)",
                reqwest::Method::POST,
                &format!("/session/{}/execute/sync", page.id),
                Some(json!({
                    "script": LOAD_MORE_SCRIPT,
                    "args": [self.settings.load_more_selectors],
                })),
            )
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Navigate, expand and read one page inside an open session.
    async fn drive(&self, page: &RenderPage, url: &Url) -> Result<String, FetchError> {
        if let Err(e) = self.block_resources(page).await {
            debug!(error = %e, "resource blocking unavailable; continuing");
        }

        self.command(
            "navigate",
            reqwest::Method::POST,
            &format!("/session/{}/url", page.id),
            Some(json!({ "url": url.as_str() })),
        )
        .await
        .map_err(|e| {
            if is_timeout(&e) {
                FetchError::Timeout {
                    url: url.to_string(),
                    secs: self.settings.navigation_timeout.as_secs(),
                }
            } else {
                e
            }
        })?;

        match self.auto_scroll(page).await {
            Ok(px) => debug!(px, "auto-scrolled"),
            Err(e) => debug!(error = %e, "auto-scroll failed; continuing"),
        }

        let mut clicks = 0;
        for _ in 0..self.settings.load_more_attempts {
            match self.click_load_more(page).await {
                Ok(true) => {
                    clicks += 1;
                    sleep(LOAD_MORE_SETTLE).await;
                }
                Ok(false) => break,
                Err(e) => {
                    debug!(error = %e, "load-more click failed; stopping");
                    break;
                }
            }
        }
        if clicks > 0 {
            debug!(clicks, "expanded page via load-more");
        }

        let source = self
            .command(
                "page source",
                reqwest::Method::GET,
                &format!("/session/{}/source", page.id),
                None,
            )
            .await?;
        source
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FetchError::WebDriver {
                command: "page source".into(),
                message: "source was not a string".into(),
            })
    }

    /// Delete every session still registered as open.
    #[instrument(level = "info", skip_all)]
    pub async fn sweep(&self) {
        let leftover: Vec<String> = match self.open.lock() {
            Ok(mut set) => set.drain().collect(),
            Err(_) => return,
        };
        if leftover.is_empty() {
            return;
        }
        warn!(count = leftover.len(), "deleting leftover webdriver sessions");
        for id in leftover {
            if let Err(e) = delete_session(&self.client, &self.base, &id).await {
                warn!(session = %id, error = %e, "failed to delete leftover session");
            }
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.open.lock().map(|s| s.len()).unwrap_or_default()
    }
}

impl PageFetcher for WebDriverEngine {
    async fn prepare(&self) -> Result<(), FetchError> {
        self.ready().await
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: &Url, _mode: FetchMode) -> Result<String, FetchError> {
        let t0 = Instant::now();
        let page = self.open_page().await?;
        let outcome = timeout(self.settings.render_budget, self.drive(&page, url)).await;
        page.close().await;

        let body = match outcome {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                    secs: self.settings.render_budget.as_secs(),
                });
            }
        };
        debug!(
            bytes = body.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "rendered page"
        );
        Ok(body)
    }

    async fn release(&self) {
        self.sweep().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RenderSettings {
        RenderSettings::from_config(&FetchConfig::default())
    }

    #[test]
    fn test_session_request_shape() {
        let body = session_request(&settings());
        let caps = &body["capabilities"]["alwaysMatch"];
        assert_eq!(caps["browserName"], "chrome");
        assert_eq!(caps["timeouts"]["pageLoad"], 30_000);
        let args = caps["goog:chromeOptions"]["args"].as_array().unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert!(
            args.iter()
                .any(|a| a.as_str().unwrap().starts_with("--user-agent=Mozilla/5.0"))
        );
    }

    #[test]
    fn test_blocked_urls_follow_resource_types() {
        let s = settings();
        assert!(s.blocked_url_patterns.contains(&"*.css".to_string()));
        assert!(s.blocked_url_patterns.contains(&"*.woff2".to_string()));
        assert!(s.blocked_url_patterns.contains(&"*.png".to_string()));
        let cmd = blocked_urls_command(&s.blocked_url_patterns);
        assert_eq!(cmd["cmd"], "Network.setBlockedURLs");
        assert_eq!(
            cmd["params"]["urls"].as_array().unwrap().len(),
            s.blocked_url_patterns.len()
        );
    }

    #[test]
    fn test_unwrap_value_and_session_id() {
        let ok = json!({ "value": { "sessionId": "abc123", "capabilities": {} } });
        let value = unwrap_value("new session", ok).unwrap();
        assert_eq!(parse_session_id(&value).unwrap(), "abc123");

        let err = json!({ "value": { "error": "timeout", "message": "page load", "stacktrace": "" } });
        let e = unwrap_value("navigate", err).unwrap_err();
        assert!(is_timeout(&e));
        assert_eq!(e.to_string(), "webdriver navigate failed: timeout: page load");

        assert!(parse_session_id(&json!({})).is_err());
    }

    #[test]
    fn test_invalid_webdriver_url() {
        let e = WebDriverEngine::new("not a url", &FetchConfig::default()).unwrap_err();
        assert!(matches!(e, FetchError::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_open_is_noop() {
        let engine = WebDriverEngine::new("http://127.0.0.1:9", &FetchConfig::default()).unwrap();
        assert_eq!(engine.open_sessions(), 0);
        engine.sweep().await;
        assert_eq!(engine.open_sessions(), 0);
    }
}
