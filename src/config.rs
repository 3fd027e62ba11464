//! Application configuration.
//!
//! Settings come from an optional YAML file; every field has a default so an
//! empty (or absent) file yields a working setup. Command-line flags are
//! applied on top by [`AppConfig::apply_cli`].
//!
//! ```yaml
//! data_dir: ./data
//! scheduler:
//!   cycle_interval_mins: 180
//!   batch_size: 3
//! fetch:
//!   webdriver_url: http://localhost:9515
//! alerts:
//!   low_yield_after_cycles: 3
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

use crate::cli::Cli;
use crate::dedup::{DEFAULT_FUZZY_PREFIX, DEFAULT_KEY_LEN};
use crate::error::ConfigError;

/// Desktop Chrome user agent presented by both fetch strategies.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub sources_file: Option<PathBuf>,
    pub scheduler: SchedulerConfig,
    pub fetch: FetchConfig,
    pub retention: RetentionConfig,
    pub dedup: DedupConfig,
    pub alerts: AlertConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            sources_file: None,
            scheduler: SchedulerConfig::default(),
            fetch: FetchConfig::default(),
            retention: RetentionConfig::default(),
            dedup: DedupConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub cycle_interval_mins: u64,
    pub retention_interval_mins: u64,
    pub status_interval_mins: u64,
    /// Sources fetched concurrently within one batch.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_cooldown_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval_mins: 180,
            retention_interval_mins: 720,
            status_interval_mins: 60,
            batch_size: 3,
            batch_cooldown_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_mins.max(1) * 60)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_mins.max(1) * 60)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_mins.max(1) * 60)
    }

    pub fn batch_cooldown(&self) -> Duration {
        Duration::from_secs(self.batch_cooldown_secs)
    }
}

/// Resource types suppressed during browser rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Stylesheet,
    Font,
    Image,
    Media,
}

impl ResourceType {
    /// URL patterns for chromedriver's `Network.setBlockedURLs`.
    pub fn url_patterns(&self) -> &'static [&'static str] {
        match self {
            ResourceType::Stylesheet => &["*.css", "*.css?*"],
            ResourceType::Font => &["*.woff", "*.woff2", "*.ttf", "*.otf", "*.eot"],
            ResourceType::Image => &[
                "*.png", "*.jpg", "*.jpeg", "*.gif", "*.svg", "*.webp", "*.ico", "*.avif",
            ],
            ResourceType::Media => &["*.mp4", "*.webm", "*.mp3", "*.m3u8"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Retries after the first attempt, per endpoint.
    pub retry_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_jitter_ms: u64,
    /// chromedriver (or any W3C WebDriver) endpoint; rendered sources fail without it.
    pub webdriver_url: Option<String>,
    pub navigation_timeout_secs: u64,
    /// Upper bound on one whole rendered fetch, scrolling and clicking included.
    pub render_budget_secs: u64,
    pub blocked_resources: Vec<ResourceType>,
    pub load_more_attempts: u32,
    pub load_more_selectors: Vec<String>,
    pub max_scroll_px: u32,
    pub scroll_step_px: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 15,
            retry_attempts: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
            retry_jitter_ms: 250,
            webdriver_url: None,
            navigation_timeout_secs: 30,
            render_budget_secs: 90,
            blocked_resources: vec![
                ResourceType::Stylesheet,
                ResourceType::Font,
                ResourceType::Image,
            ],
            load_more_attempts: 5,
            load_more_selectors: [
                "button[aria-label*=\"load more\"]",
                "button[data-testid*=\"load-more\"]",
                ".load-more",
                ".show-more",
                ".load-more-button",
                "[aria-label*=\"Load more\"]",
                "[data-cy*=\"load-more\"]",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            max_scroll_px: 10_000,
            scroll_step_px: 100,
        }
    }
}

impl FetchConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn render_budget(&self) -> Duration {
        Duration::from_secs(self.render_budget_secs)
    }

    pub fn blocked_url_patterns(&self) -> Vec<&'static str> {
        self.blocked_resources
            .iter()
            .flat_map(|r| r.url_patterns().iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Listings not refreshed for this many days are deactivated.
    pub window_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { window_days: 45 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub identity_key_len: usize,
    pub fuzzy_title_prefix: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            identity_key_len: DEFAULT_KEY_LEN,
            fuzzy_title_prefix: DEFAULT_FUZZY_PREFIX,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Warn about a source after this many consecutive zero-candidate cycles.
    /// Unset disables the alert.
    pub low_yield_after_cycles: Option<u32>,
}

impl AppConfig {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })
    }

    /// Load from `path`, or return the defaults when no path is given.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("No config file given; using defaults");
            return Ok(Self::default());
        };
        let yaml = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::from_yaml_str(&yaml, &path.display().to_string())?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Overlay command-line flags (which win over the file).
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.data_dir {
            self.data_dir = dir.clone();
        }
        if let Some(url) = &cli.webdriver_url {
            self.fetch.webdriver_url = Some(url.clone());
        }
        if let Some(file) = &cli.sources {
            self.sources_file = Some(file.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_empty_document_yields_defaults() {
        let c = AppConfig::from_yaml_str("", "test").unwrap();
        assert_eq!(c, AppConfig::default());
        assert_eq!(c.scheduler.batch_size, 3);
        assert_eq!(c.fetch.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(c.alerts.low_yield_after_cycles, None);
        assert_eq!(c.retention.window_days, 45);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let yaml = r#"
scheduler:
  batch_size: 5
fetch:
  webdriver_url: "http://localhost:9515"
  blocked_resources: [image]
alerts:
  low_yield_after_cycles: 3
"#;
        let c = AppConfig::from_yaml_str(yaml, "test").unwrap();
        assert_eq!(c.scheduler.batch_size, 5);
        assert_eq!(c.scheduler.cycle_interval_mins, 180);
        assert_eq!(c.fetch.webdriver_url.as_deref(), Some("http://localhost:9515"));
        assert_eq!(c.fetch.http_timeout_secs, 15);
        assert!(c.fetch.blocked_url_patterns().contains(&"*.png"));
        assert!(!c.fetch.blocked_url_patterns().contains(&"*.css"));
        assert_eq!(c.alerts.low_yield_after_cycles, Some(3));
    }

    #[test]
    fn test_bad_yaml_is_reported() {
        let err = AppConfig::from_yaml_str("scheduler: [1, 2", "bad.yaml").unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_cli_flags_override_file() {
        let mut c = AppConfig::default();
        let cli = Cli::parse_from([
            "opportunity_aggregator",
            "--data-dir",
            "/var/lib/opps",
            "--webdriver-url",
            "http://driver:4444",
            "once",
        ]);
        c.apply_cli(&cli);
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/opps"));
        assert_eq!(c.fetch.webdriver_url.as_deref(), Some("http://driver:4444"));
        assert_eq!(c.sources_file, None);
    }
}
