//! Read-only status surface.
//!
//! [`StatusReader`] aggregates catalog totals and per-source health from the
//! stores without going through the orchestrator. A [`StatusSnapshot`] can be
//! logged, printed as JSON, or written out as a Markdown dashboard.
//!
//! # Staleness
//!
//! A source is *stale* when it never succeeded or its last success is older
//! than two cycle intervals. It is *low-yield* when the optional alert
//! threshold is set and the source produced zero candidates that many
//! successful cycles in a row.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, instrument, warn};

use crate::error::PersistenceError;
use crate::models::{ListingKind, RunStatus, SourceRun};
use crate::store::{ListingStore, RunStatusStore};
use crate::utils::{slugify, truncate_for_log};

/// Health of one source as shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub source: String,
    pub status: RunStatus,
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub item_count: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub avg_duration_ms: f64,
    pub consecutive_empty: u32,
    pub stale: bool,
    pub low_yield: bool,
}

/// Aggregate view over both stores at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub total_listings: usize,
    pub active_listings: usize,
    pub added_last_24h: usize,
    pub added_last_7d: usize,
    /// Active listings per kind; every kind is present.
    pub by_kind: BTreeMap<ListingKind, usize>,
    pub sources: Vec<SourceHealth>,
}

impl StatusSnapshot {
    pub fn failing_sources(&self) -> impl Iterator<Item = &SourceHealth> {
        self.sources.iter().filter(|s| s.status == RunStatus::Error)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds [`StatusSnapshot`]s from the stores.
#[derive(Debug)]
pub struct StatusReader<S> {
    store: Arc<S>,
    cycle_interval: std::time::Duration,
    low_yield_after: Option<u32>,
}

impl<S> StatusReader<S>
where
    S: ListingStore + RunStatusStore,
{
    pub fn new(store: Arc<S>, cycle_interval: std::time::Duration, low_yield_after: Option<u32>) -> Self {
        Self {
            store,
            cycle_interval,
            low_yield_after,
        }
    }

    fn health(&self, run: SourceRun, now: DateTime<Utc>) -> SourceHealth {
        let window = Duration::from_std(self.cycle_interval * 2).unwrap_or_else(|_| Duration::days(36_500));
        let stale = run.last_success.is_none_or(|t| now - t > window);
        let low_yield = self
            .low_yield_after
            .is_some_and(|n| run.consecutive_empty >= n);
        SourceHealth {
            source: run.source,
            status: run.status,
            last_run: run.last_run,
            last_success: run.last_success,
            item_count: run.item_count,
            error_count: run.error_count,
            last_error: run.last_error,
            avg_duration_ms: run.avg_duration_ms,
            consecutive_empty: run.consecutive_empty,
            stale,
            low_yield,
        }
    }

    /// Aggregate the stores as of `now`.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<StatusSnapshot, PersistenceError> {
        let listings = self.store.all_listings().await?;
        let day_ago = now - Duration::hours(24);
        let week_ago = now - Duration::days(7);

        let mut by_kind: BTreeMap<ListingKind, usize> =
            ListingKind::ALL.into_iter().map(|k| (k, 0)).collect();
        for l in listings.iter().filter(|l| l.active) {
            *by_kind.entry(l.kind).or_default() += 1;
        }

        let sources = self
            .store
            .all_runs()
            .await?
            .into_iter()
            .map(|run| self.health(run, now))
            .collect();

        Ok(StatusSnapshot {
            generated_at: now,
            total_listings: listings.len(),
            active_listings: listings.iter().filter(|l| l.active).count(),
            added_last_24h: listings.iter().filter(|l| l.first_seen >= day_ago).count(),
            added_last_7d: listings.iter().filter(|l| l.first_seen >= week_ago).count(),
            by_kind,
            sources,
        })
    }

    /// Periodic status line plus a warning per unhealthy source.
    #[instrument(level = "info", skip_all)]
    pub async fn log_report(&self, now: DateTime<Utc>) {
        let snap = match self.snapshot(now).await {
            Ok(snap) => snap,
            Err(e) => {
                warn!(error = %e, "Could not build status report");
                return;
            }
        };
        info!(
            active = snap.active_listings,
            total = snap.total_listings,
            added_24h = snap.added_last_24h,
            added_7d = snap.added_last_7d,
            failing = snap.failing_sources().count(),
            "Status report"
        );
        for s in snap.sources.iter().filter(|s| s.stale || s.low_yield) {
            warn!(
                source = %s.source,
                stale = s.stale,
                low_yield = s.low_yield,
                errors = s.error_count,
                "Source needs attention"
            );
        }
    }
}

fn fmt_time(t: Option<DateTime<Utc>>) -> String {
    t.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

/// Render a snapshot as a Markdown dashboard.
pub fn status_to_markdown(snap: &StatusSnapshot) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Opportunity catalog status\n");
    let _ = writeln!(md, "_Generated {}_\n", fmt_time(Some(snap.generated_at)));

    let _ = writeln!(md, "## Catalog\n");
    let _ = writeln!(md, "| Metric | Count |");
    let _ = writeln!(md, "|---|---:|");
    let _ = writeln!(md, "| Active listings | {} |", snap.active_listings);
    let _ = writeln!(md, "| All listings | {} |", snap.total_listings);
    let _ = writeln!(md, "| Added in the last 24h | {} |", snap.added_last_24h);
    let _ = writeln!(md, "| Added in the last 7 days | {} |", snap.added_last_7d);
    for (kind, count) in &snap.by_kind {
        let _ = writeln!(md, "| Active {kind} | {count} |");
    }

    let _ = writeln!(md, "\n## Sources\n");
    let _ = writeln!(
        md,
        "| Source | Status | Last success | Items | Errors | Avg ms | Flags |"
    );
    let _ = writeln!(md, "|---|---|---|---:|---:|---:|---|");
    for s in &snap.sources {
        let mut flags = Vec::new();
        if s.stale {
            flags.push("stale");
        }
        if s.low_yield {
            flags.push("low yield");
        }
        let name = if s.last_error.is_some() {
            format!("[{}](#{})", s.source, slugify(&s.source))
        } else {
            s.source.clone()
        };
        let _ = writeln!(
            md,
            "| {} | {} | {} | {} | {} | {:.0} | {} |",
            name,
            s.status,
            fmt_time(s.last_success),
            s.item_count,
            s.error_count,
            s.avg_duration_ms,
            flags.join(", ")
        );
    }

    let with_errors: Vec<&SourceHealth> =
        snap.sources.iter().filter(|s| s.last_error.is_some()).collect();
    if !with_errors.is_empty() {
        let _ = writeln!(md, "\n## Last errors");
        for s in with_errors {
            let _ = writeln!(md, "\n### {}\n", s.source);
            let _ = writeln!(md, "Last run {}\n", fmt_time(s.last_run));
            if let Some(e) = &s.last_error {
                let _ = writeln!(md, "```text\n{}\n```", truncate_for_log(e, 500));
            }
        }
    }
    md
}

/// Write the Markdown dashboard to `path`, creating parent directories.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_markdown(snap: &StatusSnapshot, path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, status_to_markdown(snap)).await?;
    info!("Wrote status dashboard");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
    }

    async fn store_with_runs() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .ensure_sources(&["healthy".into(), "broken".into(), "quiet".into(), "never".into()])
            .await
            .unwrap();
        store.record_start("healthy", now()).await.unwrap();
        store.record_success("healthy", 4, 1200, now()).await.unwrap();
        store
            .record_error("broken", "timed out after 15s fetching https://x.example", 15000, now())
            .await
            .unwrap();
        for m in [30, 20, 10] {
            let t = now() - Duration::minutes(m);
            store.record_success("quiet", 0, 800, t).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_snapshot_flags_stale_and_low_yield() {
        let store = store_with_runs().await;
        let reader = StatusReader::new(store, std::time::Duration::from_secs(3 * 3600), Some(3));
        let snap = reader.snapshot(now()).await.unwrap();

        let get = |name: &str| snap.sources.iter().find(|s| s.source == name).unwrap();
        assert!(!get("healthy").stale);
        assert!(get("broken").stale);
        assert!(get("never").stale);
        assert_eq!(get("never").status, RunStatus::Idle);
        assert!(get("quiet").low_yield);
        assert!(!get("quiet").stale);
        assert!(!get("healthy").low_yield);
        assert_eq!(snap.failing_sources().count(), 1);
        assert_eq!(snap.by_kind.len(), ListingKind::ALL.len());
    }

    #[tokio::test]
    async fn test_low_yield_disabled_by_default() {
        let store = store_with_runs().await;
        let reader = StatusReader::new(store, std::time::Duration::from_secs(3 * 3600), None);
        let snap = reader.snapshot(now()).await.unwrap();
        assert!(snap.sources.iter().all(|s| !s.low_yield));
    }

    #[tokio::test]
    async fn test_markdown_and_json_render() {
        let store = store_with_runs().await;
        let reader = StatusReader::new(store, std::time::Duration::from_secs(3 * 3600), Some(3));
        let snap = reader.snapshot(now()).await.unwrap();

        let md = status_to_markdown(&snap);
        assert!(md.contains("| Active listings | 0 |"));
        assert!(md.contains("[broken](#broken)"));
        assert!(md.contains("### broken"));
        assert!(md.contains("stale"));

        let json = snap.to_json().unwrap();
        assert!(json.contains("\"lowYield\": true"));
        assert!(json.contains("\"addedLast24h\": 0"));
    }

    #[tokio::test]
    async fn test_write_markdown_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("status.md");
        let store = store_with_runs().await;
        let reader = StatusReader::new(store, std::time::Duration::from_secs(3600), None);
        let snap = reader.snapshot(now()).await.unwrap();
        write_markdown(&snap, &path).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("# Opportunity"));
    }
}
