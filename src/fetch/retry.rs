//! Exponential backoff around a single endpoint fetch.
//!
//! # Retry Strategy
//!
//! - A bounded number of retries after the first attempt (3 by default)
//! - Exponential backoff starting at the base delay (1 second by default)
//! - Delay capped at the configured maximum (30 seconds by default)
//! - Random jitter (0-250ms by default) added to spread out retries
//! - Errors that [`FetchError::is_retryable`] rejects fail immediately
//!
//! Only the failing endpoint is retried; nothing else in the cycle is
//! restarted.

use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};
use url::Url;

use super::PageFetcher;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::registry::FetchMode;

/// Wrapper that adds exponential backoff retry logic to any [`PageFetcher`].
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
/// ```
pub struct RetryFetch<T> {
    /// The underlying fetcher to wrap.
    inner: T,
    /// Maximum number of retries before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: Duration,
    /// Maximum delay cap.
    max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    max_jitter: Duration,
}

impl<T> RetryFetch<T> {
    /// Create a new retry wrapper around an existing [`PageFetcher`].
    ///
    /// # Arguments
    ///
    /// * `inner` - The fetcher to wrap
    /// * `max_retries` - Retries after the first attempt
    /// * `base_delay` - Delay before the first retry
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }

    pub fn from_config(inner: T, config: &FetchConfig) -> Self {
        Self::new(
            inner,
            config.retry_attempts,
            Duration::from_millis(config.retry_base_delay_ms),
        )
        .with_max_delay(Duration::from_millis(config.retry_max_delay_ms))
        .with_jitter(Duration::from_millis(config.retry_jitter_ms))
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Backoff before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

impl<T: PageFetcher> PageFetcher for RetryFetch<T> {
    async fn prepare(&self) -> Result<(), FetchError> {
        self.inner.prepare().await
    }

    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch_page(&self, url: &Url, mode: FetchMode) -> Result<String, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch_page(url, mode).await {
                Ok(body) => return Ok(body),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if !e.is_retryable() || attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            retryable = e.is_retryable(),
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "fetch gave up"
                        );
                        return Err(e);
                    }

                    let jitter_cap = self.max_jitter.as_millis() as u64;
                    let jitter_ms: u64 = if jitter_cap == 0 {
                        0
                    } else {
                        rng().random_range(0..=jitter_cap)
                    };
                    let delay = self.backoff(attempt) + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn release(&self) {
        self.inner.release().await
    }
}
