//! Immutable source registry.
//!
//! Sources are declared in YAML (the built-in `config/sources.yaml`, or an
//! operator-supplied file) and compiled once at startup into
//! [`SourceDescriptor`] values: URLs parsed, search templates expanded and
//! CSS selectors compiled. The resulting [`SourceRegistry`] is passed by
//! reference to the orchestrator; nothing mutates it afterwards, so adding,
//! disabling or reprioritising a source is purely a data change.
//!
//! # Example
//!
//! ```yaml
//! sources:
//!   - name: internshala
//!     endpoints: ["https://internshala.com/internships/"]
//!     fetch: rendered
//!     priority: 9
//!     max_results: 200
//!     default_kind: internship
//!     strategy:
//!       type: selectors
//!       containers: [".individual_internship"]
//!       title: [".job-internship-name", "h3"]
//!       link: ["a.job-title-href", "h3 a"]
//! ```

use once_cell::sync::Lazy;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, instrument};
use url::Url;

use crate::error::{ConfigError, ExtractionError};
use crate::models::ListingKind;

/// Registry compiled into the binary.
pub const BUILTIN_SOURCES: &str = include_str!("../config/sources.yaml");

const DEFAULT_MAX_RESULTS: usize = 100;
const DEFAULT_PRIORITY: u8 = 5;
const DEFAULT_MIN_TITLE_LEN: usize = 6;

/// How page content is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Plain HTTP GET; the markup is usable as served.
    #[default]
    Static,
    /// Full browser rendering through WebDriver.
    Rendered,
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchMode::Static => f.write_str("static"),
            FetchMode::Rendered => f.write_str("rendered"),
        }
    }
}

/// Vocabulary used by the generic fallback strategy to spot listing containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordSet {
    Jobs,
    Internships,
    Hackathons,
    Events,
}

fn compile_static(list: &[&str]) -> Vec<Selector> {
    list.iter()
        .map(|s| Selector::parse(s).expect("static container selector"))
        .collect()
}

static JOB_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile_static(&[".job", ".position", ".role", ".opening", ".vacancy", "article", ".listing"])
});
static INTERNSHIP_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile_static(&[".internship", ".intern", ".trainee", ".position", "article", ".listing"])
});
static HACKATHON_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile_static(&[".hackathon", ".challenge", ".competition", ".event", "article", ".listing"])
});
static EVENT_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    compile_static(&[".event", ".event-card", ".event-item", ".news-item", "article", ".listing"])
});

impl KeywordSet {
    /// Container selectors tried, in order, on pages without a dedicated selector set.
    pub fn containers(&self) -> &'static [Selector] {
        match self {
            KeywordSet::Jobs => &JOB_CONTAINERS,
            KeywordSet::Internships => &INTERNSHIP_CONTAINERS,
            KeywordSet::Hackathons => &HACKATHON_CONTAINERS,
            KeywordSet::Events => &EVENT_CONTAINERS,
        }
    }

    /// Containers whose text is shorter than this are navigation noise.
    pub fn min_text_len(&self) -> usize {
        match self {
            KeywordSet::Jobs => 50,
            KeywordSet::Internships => 30,
            KeywordSet::Hackathons | KeywordSet::Events => 20,
        }
    }

    pub fn default_kind(&self) -> ListingKind {
        match self {
            KeywordSet::Jobs => ListingKind::Job,
            KeywordSet::Internships => ListingKind::Internship,
            KeywordSet::Hackathons => ListingKind::Hackathon,
            KeywordSet::Events => ListingKind::Event,
        }
    }
}

/// Prioritised CSS selector candidates per field, as written in YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectorSpec {
    pub containers: Vec<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub organization: Vec<String>,
    #[serde(default)]
    pub location: Vec<String>,
    #[serde(default)]
    pub compensation: Vec<String>,
    #[serde(default)]
    pub deadline: Vec<String>,
    #[serde(default)]
    pub posted: Vec<String>,
    #[serde(default)]
    pub description: Vec<String>,
    #[serde(default)]
    pub link: Vec<String>,
}

/// Compiled form of [`SelectorSpec`].
#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub containers: Vec<Selector>,
    pub title: Vec<Selector>,
    pub organization: Vec<Selector>,
    pub location: Vec<Selector>,
    pub compensation: Vec<Selector>,
    pub deadline: Vec<Selector>,
    pub posted: Vec<Selector>,
    pub description: Vec<Selector>,
    pub link: Vec<Selector>,
}

fn compile_list(list: &[String]) -> Result<Vec<Selector>, ExtractionError> {
    list.iter()
        .map(|s| {
            Selector::parse(s).map_err(|e| ExtractionError::InvalidSelector {
                selector: s.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

impl SelectorSet {
    pub fn compile(spec: &SelectorSpec) -> Result<Self, ExtractionError> {
        Ok(Self {
            containers: compile_list(&spec.containers)?,
            title: compile_list(&spec.title)?,
            organization: compile_list(&spec.organization)?,
            location: compile_list(&spec.location)?,
            compensation: compile_list(&spec.compensation)?,
            deadline: compile_list(&spec.deadline)?,
            posted: compile_list(&spec.posted)?,
            description: compile_list(&spec.description)?,
            link: compile_list(&spec.link)?,
        })
    }
}

/// Extraction strategy as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategySpec {
    Selectors(SelectorSpec),
    Generic { keyword_set: KeywordSet },
    Feed,
}

/// How candidates are pulled out of a fetched page.
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    /// Source-specific selectors; first non-empty match per field wins.
    SelectorBased { selectors: SelectorSet },
    /// Vocabulary-driven container detection plus free-text heuristics.
    GenericFallback { keyword_set: KeywordSet },
    /// RSS 2.0 feed.
    Feed,
}

impl ExtractionStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionStrategy::SelectorBased { .. } => "selectors",
            ExtractionStrategy::GenericFallback { .. } => "generic",
            ExtractionStrategy::Feed => "feed",
        }
    }
}

/// Search endpoint template; `{query}` is replaced by each URL-encoded term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpec {
    pub template: String,
    pub terms: Vec<String>,
}

/// One source as written in YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub search: Option<SearchSpec>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub fetch: FetchMode,
    pub strategy: StrategySpec,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default_kind: Option<ListingKind>,
    /// Organization used when the markup names none (company career pages).
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_min_title_len")]
    pub min_title_len: usize,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

fn default_enabled() -> bool {
    true
}

fn default_min_title_len() -> usize {
    DEFAULT_MIN_TITLE_LEN
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    sources: Vec<SourceSpec>,
}

/// A compiled, validated source.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub name: String,
    pub endpoints: Vec<Url>,
    pub base_url: Url,
    pub fetch_mode: FetchMode,
    pub strategy: ExtractionStrategy,
    pub max_results: usize,
    pub priority: u8,
    pub enabled: bool,
    pub default_kind: ListingKind,
    pub default_organization: Option<String>,
    pub min_title_len: usize,
}

impl SourceDescriptor {
    /// Compile one YAML entry.
    pub fn compile(spec: &SourceSpec) -> Result<Self, ConfigError> {
        let invalid = |message: String| ConfigError::InvalidSource {
            source_name: spec.name.clone(),
            message,
        };

        if spec.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if spec.max_results == 0 {
            return Err(invalid("max_results must be at least 1".into()));
        }

        let mut raw_endpoints = spec.endpoints.clone();
        if let Some(search) = &spec.search {
            if !search.template.contains("{query}") {
                return Err(invalid(format!(
                    "search template {} has no {{query}} placeholder",
                    search.template
                )));
            }
            raw_endpoints.extend(search.terms.iter().map(|term| {
                search
                    .template
                    .replace("{query}", &urlencoding::encode(term.trim()))
            }));
        }
        if raw_endpoints.is_empty() {
            return Err(invalid("no endpoints or search terms".into()));
        }

        let endpoints = raw_endpoints
            .iter()
            .map(|raw| match Url::parse(raw) {
                Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(u),
                Ok(u) => Err(invalid(format!("unsupported scheme in {u}"))),
                Err(e) => Err(invalid(format!("invalid endpoint {raw}: {e}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let base_url = match &spec.base_url {
            Some(raw) => {
                Url::parse(raw).map_err(|e| invalid(format!("invalid base_url {raw}: {e}")))?
            }
            None => endpoints[0].clone(),
        };

        let (strategy, strategy_kind) = match &spec.strategy {
            StrategySpec::Selectors(sel) => {
                if sel.containers.is_empty() {
                    return Err(invalid("selector strategy needs at least one container".into()));
                }
                (
                    ExtractionStrategy::SelectorBased {
                        selectors: SelectorSet::compile(sel)?,
                    },
                    None,
                )
            }
            StrategySpec::Generic { keyword_set } => (
                ExtractionStrategy::GenericFallback {
                    keyword_set: *keyword_set,
                },
                Some(keyword_set.default_kind()),
            ),
            StrategySpec::Feed => (ExtractionStrategy::Feed, None),
        };

        Ok(Self {
            name: spec.name.trim().to_string(),
            endpoints,
            base_url,
            fetch_mode: spec.fetch,
            strategy,
            max_results: spec.max_results,
            priority: spec.priority,
            enabled: spec.enabled,
            default_kind: spec
                .default_kind
                .or(strategy_kind)
                .unwrap_or(ListingKind::Job),
            default_organization: spec.organization.clone(),
            min_title_len: spec.min_title_len,
        })
    }
}

/// Ordered, read-only collection of compiled sources.
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<SourceDescriptor>,
}

impl SourceRegistry {
    /// Build a registry from already-compiled descriptors.
    ///
    /// Descriptors are ordered by priority (highest first), keeping declaration
    /// order among equal priorities. Names must be unique.
    pub fn new(mut sources: Vec<SourceDescriptor>) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for s in &sources {
            if !seen.insert(s.name.clone()) {
                return Err(ConfigError::DuplicateSource(s.name.clone()));
            }
        }
        sources.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(Self { sources })
    }

    /// Parse and compile a registry document.
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: RegistryFile = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            source: e,
        })?;
        let compiled = file
            .sources
            .iter()
            .map(SourceDescriptor::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(compiled)
    }

    /// The registry compiled into the binary.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_yaml_str(BUILTIN_SOURCES, "config/sources.yaml (built-in)")
    }

    /// Load from `path`, or fall back to the built-in registry.
    #[instrument(level = "info", skip_all)]
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let registry = match path {
            Some(p) => {
                let yaml = std::fs::read_to_string(p).map_err(|e| ConfigError::Read {
                    path: p.display().to_string(),
                    source: e,
                })?;
                Self::from_yaml_str(&yaml, &p.display().to_string())?
            }
            None => Self::builtin()?,
        };
        info!(
            total = registry.len(),
            enabled = registry.enabled().count(),
            rendered = registry
                .enabled()
                .filter(|s| s.fetch_mode == FetchMode::Rendered)
                .count(),
            "Loaded source registry"
        );
        Ok(registry)
    }

    pub fn all(&self) -> &[SourceDescriptor] {
        &self.sources
    }

    /// Enabled sources in scheduling order.
    pub fn enabled(&self) -> impl Iterator<Item = &SourceDescriptor> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&SourceDescriptor> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name.clone()).collect()
    }

    /// Whether any enabled source needs the rendering engine.
    pub fn needs_rendering(&self) -> bool {
        self.enabled().any(|s| s.fetch_mode == FetchMode::Rendered)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
sources:
  - name: low
    endpoints: ["https://low.example/jobs"]
    priority: 2
    strategy: { type: generic, keyword_set: jobs }
  - name: high
    endpoints: ["https://high.example/internships"]
    fetch: rendered
    priority: 9
    strategy:
      type: selectors
      containers: [".card"]
      title: ["h3"]
      link: ["a"]
  - name: off
    endpoints: ["https://off.example/"]
    enabled: false
    strategy: { type: feed }
"#;

    #[test]
    fn test_registry_orders_by_priority() {
        let reg = SourceRegistry::from_yaml_str(YAML, "test").unwrap();
        assert_eq!(reg.names(), vec!["high", "low", "off"]);
        let enabled: Vec<_> = reg.enabled().map(|s| s.name.as_str()).collect();
        assert_eq!(enabled, vec!["high", "low"]);
        assert!(reg.needs_rendering());
    }

    #[test]
    fn test_strategy_defaults_kind() {
        let reg = SourceRegistry::from_yaml_str(YAML, "test").unwrap();
        assert_eq!(reg.get("low").unwrap().default_kind, ListingKind::Job);
        assert_eq!(reg.get("high").unwrap().default_kind, ListingKind::Job);
        assert_eq!(reg.get("high").unwrap().strategy.label(), "selectors");
        assert_eq!(reg.get("off").unwrap().max_results, DEFAULT_MAX_RESULTS);
    }

    #[test]
    fn test_search_template_expands_endpoints() {
        let yaml = r#"
sources:
  - name: search
    search:
      template: "https://jobs.example/search?q={query}"
      terms: ["data science", "c++"]
    strategy: { type: generic, keyword_set: jobs }
"#;
        let reg = SourceRegistry::from_yaml_str(yaml, "test").unwrap();
        let s = reg.get("search").unwrap();
        let urls: Vec<_> = s.endpoints.iter().map(Url::as_str).collect();
        assert_eq!(
            urls,
            vec![
                "https://jobs.example/search?q=data%20science",
                "https://jobs.example/search?q=c%2B%2B"
            ]
        );
        assert_eq!(s.base_url.as_str(), urls[0]);
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let yaml = r#"
sources:
  - name: broken
    endpoints: ["https://x.example/"]
    strategy:
      type: selectors
      containers: ["div[[["]
"#;
        let err = SourceRegistry::from_yaml_str(yaml, "test").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Selector(ExtractionError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_missing_endpoints_rejected() {
        let dup = r#"
sources:
  - { name: a, endpoints: ["https://a.example/"], strategy: { type: feed } }
  - { name: a, endpoints: ["https://b.example/"], strategy: { type: feed } }
"#;
        assert!(matches!(
            SourceRegistry::from_yaml_str(dup, "test"),
            Err(ConfigError::DuplicateSource(name)) if name == "a"
        ));

        let none = r#"
sources:
  - { name: empty, strategy: { type: feed } }
"#;
        assert!(matches!(
            SourceRegistry::from_yaml_str(none, "test"),
            Err(ConfigError::InvalidSource { .. })
        ));

        let scheme = r#"
sources:
  - { name: ftp, endpoints: ["ftp://files.example/"], strategy: { type: feed } }
"#;
        assert!(matches!(
            SourceRegistry::from_yaml_str(scheme, "test"),
            Err(ConfigError::InvalidSource { .. })
        ));
    }

    #[test]
    fn test_builtin_registry_compiles() {
        let reg = SourceRegistry::builtin().unwrap();
        assert!(reg.len() >= 10);
        assert!(reg.enabled().count() > 0);
        for s in reg.all() {
            assert!(!s.endpoints.is_empty(), "{} has no endpoints", s.name);
        }
    }

    #[test]
    fn test_generic_containers_compile() {
        for set in [
            KeywordSet::Jobs,
            KeywordSet::Internships,
            KeywordSet::Hackathons,
            KeywordSet::Events,
        ] {
            assert!(!set.containers().is_empty());
        }
    }
}
