//! Typed errors for the aggregation pipeline.
//!
//! Each layer owns one error type so that failures can be caught at the
//! smallest scope that can absorb them:
//!
//! | Error | Scope | Effect |
//! |-------|-------|--------|
//! | [`FetchError`] | one source (or one endpoint) | recorded on the source's run row, siblings continue |
//! | [`ExtractionError`] | one source | recorded, no candidates from that source |
//! | [`PersistenceError`] | one candidate or one snapshot flush | logged and skipped |
//! | [`OrchestrationError`] | one cycle | only engine initialisation aborts a cycle |
//! | [`ConfigError`] | startup | the process refuses to start |

use thiserror::Error;

/// Failure to acquire page content for a source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out after {secs}s fetching {url}")]
    Timeout { url: String, secs: u64 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("webdriver {command} failed: {message}")]
    WebDriver { command: String, message: String },

    #[error("rendering engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("source {source_name} has no usable endpoint")]
    NoEndpoints { source_name: String },
}

impl FetchError {
    /// Whether repeating the same request has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            FetchError::WebDriver { .. } => true,
            FetchError::EngineUnavailable(_)
            | FetchError::InvalidUrl(_)
            | FetchError::NoEndpoints { .. } => false,
        }
    }

    pub(crate) fn from_reqwest(url: &str, e: reqwest::Error, timeout_secs: u64) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else if let Some(status) = e.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: e.to_string(),
            }
        }
    }
}

/// Failure while turning raw content into candidates.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("malformed feed from {source_name}: {message}")]
    MalformedFeed { source_name: String, message: String },

    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
}

/// Failure while reading or writing the catalog.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unknown listing id {0}")]
    UnknownListing(u64),

    #[error("identity key {0} already belongs to another active listing")]
    DuplicateIdentity(String),

    #[error("snapshot i/o failed on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failure spanning a whole cycle or batch.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("rendering engine failed to initialise: {0}")]
    EngineInit(#[source] FetchError),

    #[error("a cycle is already running")]
    AlreadyRunning,

    #[error("every source in batch {batch} failed ({sources})")]
    BatchFailed { batch: usize, sources: String },
}

/// Invalid configuration or source registry.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("source {source_name}: {message}")]
    InvalidSource { source_name: String, message: String },

    #[error("duplicate source name {0}")]
    DuplicateSource(String),

    #[error(transparent)]
    Selector(#[from] ExtractionError),
}
