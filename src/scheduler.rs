//! Recurring timers for cycles, retention and status reports.
//!
//! The first cycle runs immediately; later ones follow the configured
//! cadence. Work is awaited inline, so a long cycle delays the other timers
//! instead of overlapping with them, and missed ticks are skipped rather than
//! replayed.

use chrono::Utc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::AppConfig;
use crate::fetch::PageFetcher;
use crate::orchestrator::Orchestrator;
use crate::retention::run_retention;
use crate::status::StatusReader;
use crate::store::{ListingStore, RunStatusStore};

/// Cadences for the three recurring jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub cycle: Duration,
    pub retention: Duration,
    pub status: Duration,
    pub retention_window_days: i64,
}

impl Cadence {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cycle: config.scheduler.cycle_interval(),
            retention: config.scheduler.retention_interval(),
            status: config.scheduler.status_interval(),
            retention_window_days: config.retention.window_days,
        }
    }
}

/// Run until `shutdown` is cancelled.
#[instrument(level = "info", skip_all, fields(cycle_secs = cadence.cycle.as_secs()))]
pub async fn serve<F, S>(
    orchestrator: &Orchestrator<F, S>,
    status: &StatusReader<S>,
    cadence: Cadence,
    shutdown: CancellationToken,
) where
    F: PageFetcher,
    S: ListingStore + RunStatusStore,
{
    let start = Instant::now();
    let mut cycles = interval_at(start, cadence.cycle);
    let mut retention = interval_at(start + cadence.retention, cadence.retention);
    let mut reports = interval_at(start + cadence.status, cadence.status);
    for timer in [&mut cycles, &mut retention, &mut reports] {
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    }
    info!("Scheduler started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = cycles.tick() => {
                if let Err(e) = orchestrator.run_cycle(&shutdown).await {
                    error!(error = %e, "Cycle aborted; retrying at the next tick");
                }
            }
            _ = retention.tick() => {
                let store = orchestrator.store().as_ref();
                if let Err(e) = run_retention(store, cadence.retention_window_days, Utc::now()).await {
                    error!(error = %e, "Retention pass failed");
                }
            }
            _ = reports.tick() => status.log_report(Utc::now()).await,
        }
    }
    info!("Scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::orchestrator::{CycleSettings, CycleState};
    use crate::registry::{FetchMode, SourceRegistry};
    use crate::store::MemoryStore;
    use std::sync::Arc;
    use url::Url;

    struct Static;

    impl PageFetcher for Static {
        async fn fetch_page(&self, _url: &Url, _mode: FetchMode) -> Result<String, FetchError> {
            Ok(r#"<item><a href="/x">Data Analyst Intern</a></item>"#.into())
        }
    }

    #[tokio::test]
    async fn test_serve_runs_first_cycle_then_stops_on_shutdown() {
        let yaml = r#"
sources:
  - name: only
    endpoints: ["https://only.example/"]
    strategy: { type: selectors, containers: ["item"], title: ["a"], link: ["a"] }
"#;
        let registry = Arc::new(SourceRegistry::from_yaml_str(yaml, "test").unwrap());
        let store = Arc::new(MemoryStore::new());
        let settings = CycleSettings::from_config(&AppConfig::default());
        let orchestrator = Orchestrator::new(registry, Static, store.clone(), settings);
        let status = StatusReader::new(store.clone(), Duration::from_secs(3600), None);
        let cadence = Cadence {
            cycle: Duration::from_secs(3600),
            retention: Duration::from_secs(7200),
            status: Duration::from_secs(1800),
            retention_window_days: 45,
        };

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            stopper.cancel();
        });
        serve(&orchestrator, &status, cadence, shutdown).await;

        assert_eq!(orchestrator.state(), CycleState::Completed);
        assert_eq!(store.all_listings().await.unwrap().len(), 1);
    }
}
