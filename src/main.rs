//! # Opportunity Aggregator
//!
//! Command-line entry point. Loads configuration and the source registry,
//! opens the catalog in the data directory and dispatches a subcommand:
//!
//! - `serve` (default): one cycle now, then cycles, retention passes and
//!   status reports on their cadences until Ctrl-C
//! - `once` / `retention`: a single cycle or retention pass
//! - `status`, `sources`, `list`: read-only reports
//!
//! ## Usage
//!
//! ```sh
//! opportunity_aggregator --webdriver-url http://localhost:9515 -d ./data
//! ```

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use opportunity_aggregator::cli::{Cli, Command, ListArgs};
use opportunity_aggregator::config::AppConfig;
use opportunity_aggregator::fetch::{FetchLayer, RetryFetch};
use opportunity_aggregator::orchestrator::{CycleSettings, Orchestrator};
use opportunity_aggregator::registry::SourceRegistry;
use opportunity_aggregator::retention::run_retention;
use opportunity_aggregator::scheduler::{Cadence, serve};
use opportunity_aggregator::status::{StatusReader, write_markdown};
use opportunity_aggregator::store::{ListingStore, MemoryStore, RunStatusStore};
use opportunity_aggregator::utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let cli = Cli::parse();
    let command = cli.command();
    debug!(?cli, "Parsed CLI arguments");

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_cli(&cli);
    let registry = Arc::new(SourceRegistry::load(config.sources_file.as_deref())?);

    let writes = matches!(command, Command::Serve | Command::Once | Command::Retention);
    if writes {
        let dir = config.data_dir.to_string_lossy().to_string();
        if let Err(e) = ensure_writable_dir(&dir).await {
            error!(path = %dir, error = %e, "Data directory is not writable (fix perms or choose a different path)");
            return Err(e);
        }
    }

    let store = Arc::new(MemoryStore::open(&config.data_dir).await?);
    store.log_summary().await;
    if writes {
        store.ensure_sources(&registry.names()).await?;
    }

    match command {
        Command::Serve => {
            let orchestrator = build_orchestrator(&config, registry, store.clone())?;
            let status = StatusReader::new(
                store.clone(),
                config.scheduler.cycle_interval(),
                config.alerts.low_yield_after_cycles,
            );
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received; finishing the current batch before exit");
                    trigger.cancel();
                }
            });
            serve(&orchestrator, &status, Cadence::from_config(&config), shutdown).await;
            store.flush().await?;
        }
        Command::Once => {
            let orchestrator = build_orchestrator(&config, registry, store.clone())?;
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    trigger.cancel();
                }
            });
            let report = orchestrator.run_cycle(&shutdown).await?;
            info!(state = ?report.state, inserted = report.inserted, updated = report.updated, "Single cycle done");
        }
        Command::Retention => {
            let outcome = run_retention(store.as_ref(), config.retention.window_days, Utc::now()).await?;
            info!(deactivated = outcome.total(), "Single retention pass done");
        }
        Command::Status { json, markdown } => {
            let reader = StatusReader::new(
                store.clone(),
                config.scheduler.cycle_interval(),
                config.alerts.low_yield_after_cycles,
            );
            let snap = reader.snapshot(Utc::now()).await?;
            if json {
                println!("{}", snap.to_json()?);
            } else {
                println!(
                    "active {} / total {} | added 24h {} | added 7d {}",
                    snap.active_listings, snap.total_listings, snap.added_last_24h, snap.added_last_7d
                );
                for s in &snap.sources {
                    println!(
                        "{:<20} {:<8} items {:>6} errors {:>4} last success {}{}{}",
                        s.source,
                        s.status.to_string(),
                        s.item_count,
                        s.error_count,
                        s.last_success.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()),
                        if s.stale { " [stale]" } else { "" },
                        if s.low_yield { " [low yield]" } else { "" },
                    );
                }
            }
            if let Some(path) = markdown {
                write_markdown(&snap, &path).await?;
            }
        }
        Command::List(args) => list(store.as_ref(), &args).await?,
        Command::Sources => print_sources(&registry),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

fn build_orchestrator(
    config: &AppConfig,
    registry: Arc<SourceRegistry>,
    store: Arc<MemoryStore>,
) -> Result<Orchestrator<RetryFetch<FetchLayer>, MemoryStore>, Box<dyn Error>> {
    let fetcher = FetchLayer::from_config(&config.fetch)?.with_retry(&config.fetch);
    debug!(?fetcher, "Fetch layer ready");
    Ok(Orchestrator::new(
        registry,
        fetcher,
        store,
        CycleSettings::from_config(config),
    ))
}

fn print_sources(registry: &SourceRegistry) {
    for s in registry.all() {
        println!(
            "{:<18} {:<8} {:<9} prio {:>2} {:<8} {} endpoint(s)",
            s.name,
            s.fetch_mode.to_string(),
            s.strategy.label(),
            s.priority,
            if s.enabled { "enabled" } else { "disabled" },
            s.endpoints.len()
        );
    }
}

async fn list(store: &MemoryStore, args: &ListArgs) -> Result<(), Box<dyn Error>> {
    let page = store.query(&args.to_query()).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }
    for l in &page.items {
        println!(
            "#{:<5} {:<10} {:<40} {:<24} {} {}",
            l.id,
            l.kind.as_str(),
            l.title,
            l.organization,
            l.posted_at.format("%Y-%m-%d"),
            l.application_url
        );
    }
    println!(
        "showing {} of {} (offset {})",
        page.items.len(),
        page.total,
        args.offset
    );
    Ok(())
}
