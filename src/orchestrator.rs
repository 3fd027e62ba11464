//! Cycle orchestration.
//!
//! One cycle walks every enabled source of the [`SourceRegistry`] in
//! fixed-size batches:
//!
//! 1. **Engine init**: the fetcher's `prepare` runs once, only when an
//!    enabled source needs rendering; its failure aborts the cycle
//! 2. **Batches**: the sources of a batch run concurrently; each run is
//!    recorded on its own [`SourceRun`](crate::models::SourceRun) row and a
//!    failure never touches its siblings. A cooldown separates batches
//! 3. **Upsert**: all accumulated candidates go through the
//!    [`DedupEngine`] sequentially
//! 4. **Teardown**: fetcher resources are released, the store is flushed and
//!    a summary is logged
//!
//! Cancellation is checked between batches: the in-flight batch finishes,
//! the rest are skipped, and steps 3 and 4 still run.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use itertools::Itertools;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::AppConfig;
use crate::dedup::{DedupEngine, UpsertReport};
use crate::error::OrchestrationError;
use crate::extract::extract_candidates;
use crate::fetch::{PageFetcher, fetch_source};
use crate::models::Candidate;
use crate::registry::{SourceDescriptor, SourceRegistry};
use crate::store::{ListingStore, RunStatusStore};
use crate::utils::truncate_for_log;

/// Where the orchestrator is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Running,
    Completed,
    /// The cycle finished but at least one source failed or was skipped.
    FailedPartial,
}

/// Knobs the orchestrator reads from [`AppConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
    pub batch_size: usize,
    pub batch_cooldown: Duration,
    pub identity_key_len: usize,
    pub fuzzy_title_prefix: usize,
    pub low_yield_after_cycles: Option<u32>,
}

impl CycleSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.scheduler.batch_size.max(1),
            batch_cooldown: config.scheduler.batch_cooldown(),
            identity_key_len: config.dedup.identity_key_len,
            fuzzy_title_prefix: config.dedup.fuzzy_title_prefix,
            low_yield_after_cycles: config.alerts.low_yield_after_cycles,
        }
    }
}

/// Result of one source within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub source: String,
    pub candidates: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything one cycle did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub state: CycleState,
    pub started_at: DateTime<Utc>,
    pub sources: Vec<SourceOutcome>,
    /// Enabled sources never run because the cycle was cancelled.
    pub skipped: Vec<String>,
    pub candidates: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed_writes: usize,
    pub cancelled: bool,
    pub elapsed_ms: u64,
}

impl CycleReport {
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|o| !o.is_success())
    }
}

/// Drives cycles over a registry, a fetcher and a store.
pub struct Orchestrator<F, S> {
    registry: Arc<SourceRegistry>,
    fetcher: F,
    store: Arc<S>,
    settings: CycleSettings,
    state: Mutex<CycleState>,
}

/// Holds the `Running` state; falls back to `Idle` if dropped unfinished.
struct RunningGuard<'a> {
    state: &'a Mutex<CycleState>,
    finished: bool,
}

impl RunningGuard<'_> {
    fn finish(mut self, outcome: CycleState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = outcome;
        self.finished = true;
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            *self.state.lock().unwrap_or_else(|p| p.into_inner()) = CycleState::Idle;
        }
    }
}

impl<F, S> Orchestrator<F, S>
where
    F: PageFetcher,
    S: ListingStore + RunStatusStore,
{
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: F,
        store: Arc<S>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            registry,
            fetcher,
            store,
            settings,
            state: Mutex::new(CycleState::Idle),
        }
    }

    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    fn begin(&self) -> Result<RunningGuard<'_>, OrchestrationError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state == CycleState::Running {
            return Err(OrchestrationError::AlreadyRunning);
        }
        *state = CycleState::Running;
        Ok(RunningGuard {
            state: &self.state,
            finished: false,
        })
    }

    /// Run one cycle stamped with the current time.
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, OrchestrationError> {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// Run one cycle; `now` stamps every record the cycle writes.
    ///
    /// # Errors
    ///
    /// [`OrchestrationError::AlreadyRunning`] when a cycle is in flight and
    /// [`OrchestrationError::EngineInit`] when the rendering engine does not
    /// come up. Source, extraction and persistence failures are recorded and
    /// reported in the [`CycleReport`] instead.
    #[instrument(level = "info", skip_all, fields(sources = self.registry.enabled().count()))]
    pub async fn run_cycle_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, OrchestrationError> {
        let guard = self.begin()?;
        let t0 = Instant::now();
        info!("Cycle starting");

        if self.registry.needs_rendering() {
            if let Err(e) = self.fetcher.prepare().await {
                error!(error = %e, "Rendering engine failed to start; abandoning cycle");
                self.fetcher.release().await;
                return Err(OrchestrationError::EngineInit(e));
            }
        }

        let enabled: Vec<&SourceDescriptor> = self.registry.enabled().collect();
        let batches: Vec<&[&SourceDescriptor]> =
            enabled.chunks(self.settings.batch_size.max(1)).collect();

        let mut outcomes = Vec::with_capacity(enabled.len());
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut skipped = Vec::new();
        let mut cancelled = false;

        for (i, batch) in batches.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                skipped.extend(batches[i..].iter().flat_map(|b| b.iter().map(|s| s.name.clone())));
                warn!(skipped = skipped.len(), "Shutdown requested; skipping remaining batches");
                break;
            }

            info!(
                batch = i + 1,
                of = batches.len(),
                sources = %batch.iter().map(|s| s.name.as_str()).join(", "),
                "Running batch"
            );
            let results = join_all(batch.iter().map(|s| self.run_source(s, now))).await;

            if results.iter().all(|(o, _)| !o.is_success()) {
                let e = OrchestrationError::BatchFailed {
                    batch: i + 1,
                    sources: batch.iter().map(|s| s.name.as_str()).join(", "),
                };
                error!(error = %e, "Batch produced nothing");
            }
            for (outcome, found) in results {
                outcomes.push(outcome);
                candidates.extend(found);
            }

            if i + 1 < batches.len() && !self.settings.batch_cooldown.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.batch_cooldown) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        let candidate_count = candidates.len();
        let upsert = if candidates.is_empty() {
            UpsertReport::default()
        } else {
            DedupEngine::new(
                self.store.as_ref(),
                self.settings.identity_key_len,
                self.settings.fuzzy_title_prefix,
            )
            .upsert_all(candidates, now)
            .await
        };

        self.fetcher.release().await;
        if let Err(e) = self.store.flush().await {
            error!(error = %e, "Failed to persist catalog snapshot");
        }

        let state = if cancelled || outcomes.iter().any(|o| !o.is_success()) {
            CycleState::FailedPartial
        } else {
            CycleState::Completed
        };
        let report = CycleReport {
            state,
            started_at: now,
            sources: outcomes,
            skipped,
            candidates: candidate_count,
            inserted: upsert.inserted,
            updated: upsert.updated,
            failed_writes: upsert.failed,
            cancelled,
            elapsed_ms: t0.elapsed().as_millis() as u64,
        };

        log_summary(&report);
        self.warn_low_yield().await;
        guard.finish(state);
        Ok(report)
    }

    /// Fetch and extract one source, recording the outcome on its run row.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    async fn run_source(
        &self,
        source: &SourceDescriptor,
        now: DateTime<Utc>,
    ) -> (SourceOutcome, Vec<Candidate>) {
        if let Err(e) = self.store.record_start(&source.name, now).await {
            warn!(error = %e, "Failed to record run start");
        }
        let t0 = Instant::now();

        let result = match fetch_source(&self.fetcher, source).await {
            Ok(pages) => extract_candidates(source, &pages, self.settings.identity_key_len, now)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let duration_ms = t0.elapsed().as_millis() as u64;

        match result {
            Ok(found) => {
                let recorded = self
                    .store
                    .record_success(&source.name, found.len() as u64, duration_ms, now)
                    .await;
                if let Err(e) = recorded {
                    warn!(error = %e, "Failed to record run success");
                }
                info!(candidates = found.len(), duration_ms, "Source finished");
                let outcome = SourceOutcome {
                    source: source.name.clone(),
                    candidates: found.len(),
                    duration_ms,
                    error: None,
                };
                (outcome, found)
            }
            Err(message) => {
                let recorded = self
                    .store
                    .record_error(&source.name, &message, duration_ms, now)
                    .await;
                if let Err(e) = recorded {
                    warn!(error = %e, "Failed to record run error");
                }
                warn!(duration_ms, error = %truncate_for_log(&message, 300), "Source failed");
                let outcome = SourceOutcome {
                    source: source.name.clone(),
                    candidates: 0,
                    duration_ms,
                    error: Some(message),
                };
                (outcome, Vec::new())
            }
        }
    }

    async fn warn_low_yield(&self) {
        let Some(threshold) = self.settings.low_yield_after_cycles else {
            return;
        };
        let runs = match self.store.all_runs().await {
            Ok(runs) => runs,
            Err(e) => {
                warn!(error = %e, "Could not read run rows for low-yield check");
                return;
            }
        };
        for run in runs.iter().filter(|r| r.consecutive_empty >= threshold) {
            warn!(
                source = %run.source,
                empty_cycles = run.consecutive_empty,
                "Source keeps yielding nothing; its markup may have changed"
            );
        }
    }
}

fn log_summary(report: &CycleReport) {
    let width = report
        .sources
        .iter()
        .map(|o| o.source.len())
        .chain(report.skipped.iter().map(String::len))
        .max()
        .unwrap_or(6)
        .max(6);
    let rows = report
        .sources
        .iter()
        .map(|o| {
            let status = if o.is_success() { "ok" } else { "error" };
            format!("{:<width$}  {:>5}  {}", o.source, o.candidates, status)
        })
        .chain(
            report
                .skipped
                .iter()
                .map(|s| format!("{:<width$}  {:>5}  skipped", s, "-")),
        )
        .join("\n");

    info!(
        "Cycle summary\n{:<width$}  {:>5}  status\n{}",
        "source", "items", rows
    );
    info!(
        state = ?report.state,
        candidates = report.candidates,
        inserted = report.inserted,
        updated = report.updated,
        failed = report.failed_writes,
        failed_sources = report.failed_sources().count(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed_ms,
        "Cycle complete"
    );
}
