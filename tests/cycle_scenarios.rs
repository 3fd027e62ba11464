//! End-to-end cycles against stub fetchers.

use chrono::{DateTime, Duration, TimeZone, Utc};
use opportunity_aggregator::config::AppConfig;
use opportunity_aggregator::error::FetchError;
use opportunity_aggregator::fetch::{PageFetcher, RetryFetch};
use opportunity_aggregator::models::{Listing, ListingKind, RunStatus};
use opportunity_aggregator::orchestrator::{CycleSettings, CycleState, Orchestrator};
use opportunity_aggregator::registry::{FetchMode, SourceRegistry};
use opportunity_aggregator::retention::run_retention;
use opportunity_aggregator::store::{ListingQuery, ListingStore, MemoryStore, RunStatusStore};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

const SOURCES: &str = r#"
sources:
  - name: acme
    endpoints: ["https://acme.example/careers"]
    strategy:
      type: selectors
      containers: [".job"]
      title: ["h3"]
      organization: [".company"]
      compensation: [".stipend"]
      deadline: [".deadline"]
      link: ["a.apply"]
  - name: xsite
    endpoints: ["https://x.example/list"]
    strategy:
      type: selectors
      containers: [".job"]
      title: ["h3"]
      organization: [".company"]
      link: ["a.apply"]
  - name: ysite
    endpoints: ["https://y.example/list"]
    strategy:
      type: selectors
      containers: [".job"]
      title: ["h3"]
      organization: [".company"]
      link: ["a.apply"]
  - name: zsite
    endpoints: ["https://z.example/list"]
    strategy:
      type: selectors
      containers: [".job"]
      title: ["h3"]
      organization: [".company"]
      link: ["a.apply"]
"#;

fn card(title: &str, org: &str, link: &str, stipend: &str) -> String {
    format!(
        r#"<div class="job">
             <h3>{title}</h3>
             <span class="company">{org}</span>
             <span class="stipend">{stipend}</span>
             <span class="deadline">Apply by 20/10/2026</span>
             <a class="apply" href="{link}">Apply</a>
           </div>"#
    )
}

/// Serves canned bodies by URL; URLs marked down time out.
#[derive(Default)]
struct Canned {
    pages: Mutex<HashMap<String, String>>,
    down: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Canned {
    fn set(&self, url: &str, body: String) {
        self.pages.lock().unwrap().insert(url.to_string(), body);
    }

    fn take_down(&self, url: &str) {
        self.down.lock().unwrap().insert(url.to_string());
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

struct Stub(Arc<Canned>);

impl PageFetcher for Stub {
    async fn fetch_page(&self, url: &Url, _mode: FetchMode) -> Result<String, FetchError> {
        let canned = &self.0;
        *canned.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
        if canned.down.lock().unwrap().contains(url.as_str()) {
            return Err(FetchError::Timeout {
                url: url.to_string(),
                secs: 15,
            });
        }
        Ok(canned
            .pages
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

type Harness = Orchestrator<RetryFetch<Stub>, MemoryStore>;

fn harness(store: Arc<MemoryStore>) -> (Harness, Arc<Canned>) {
    let canned = Arc::new(Canned::default());
    canned.set(
        "https://acme.example/careers",
        card("Software Intern", "Acme Co", "https://acme.co/1", "₹10,000 /month"),
    );
    for site in ["x", "y", "z"] {
        canned.set(
            &format!("https://{site}.example/list"),
            card(
                &format!("Backend Developer {site}"),
                &format!("{site} Labs"),
                &format!("https://{site}.example/apply/7"),
                "",
            ),
        );
    }
    let registry = SourceRegistry::from_yaml_str(SOURCES, "test").unwrap();
    let settings = CycleSettings {
        batch_cooldown: std::time::Duration::ZERO,
        ..CycleSettings::from_config(&AppConfig::default())
    };
    let fetcher = RetryFetch::new(Stub(canned.clone()), 2, std::time::Duration::ZERO)
        .with_jitter(std::time::Duration::ZERO);
    (
        Orchestrator::new(Arc::new(registry), fetcher, store, settings),
        canned,
    )
}

fn t(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, day, hour, 0, 0).unwrap()
}

async fn active(store: &MemoryStore) -> Vec<Listing> {
    store
        .query(&ListingQuery {
            active_only: true,
            ..ListingQuery::default()
        })
        .await
        .unwrap()
        .items
}

fn by_org<'a>(listings: &'a [Listing], org: &str) -> Vec<&'a Listing> {
    listings.iter().filter(|l| l.organization == org).collect()
}

#[tokio::test]
async fn test_rescraped_listing_is_updated_in_place() {
    let store = Arc::new(MemoryStore::new());
    let (orch, canned) = harness(store.clone());
    let token = CancellationToken::new();

    orch.run_cycle_at(t(1, 9), &token).await.unwrap();
    let first = active(&store).await;
    let acme = by_org(&first, "Acme Co");
    assert_eq!(acme.len(), 1);
    assert_eq!(acme[0].kind, ListingKind::Internship);

    canned.set(
        "https://acme.example/careers",
        card("Software Intern", "Acme Co", "https://acme.co/1", "₹15,000 /month"),
    );
    orch.run_cycle_at(t(1, 12), &token).await.unwrap();

    let second = active(&store).await;
    let acme = by_org(&second, "Acme Co");
    assert_eq!(acme.len(), 1);
    assert_eq!(acme[0].compensation.as_deref(), Some("₹15,000 /month"));
    assert!(acme[0].last_updated > acme[0].first_seen);
    assert_eq!(acme[0].first_seen, t(1, 9));
}

#[tokio::test]
async fn test_timing_out_source_accumulates_errors_while_others_stay_fresh() {
    let store = Arc::new(MemoryStore::new());
    let (orch, canned) = harness(store.clone());
    canned.take_down("https://x.example/list");
    let token = CancellationToken::new();

    for hour in [3, 6, 9] {
        let report = orch.run_cycle_at(t(2, hour), &token).await.unwrap();
        assert_eq!(report.state, CycleState::FailedPartial);
    }
    // One attempt plus two retries per cycle.
    assert_eq!(canned.calls("https://x.example/list"), 9);

    let runs = store.all_runs().await.unwrap();
    let x = runs.iter().find(|r| r.source == "xsite").unwrap();
    assert_eq!(x.status, RunStatus::Error);
    assert_eq!(x.error_count, 3);
    assert!(x.last_success.is_none());

    for name in ["ysite", "zsite"] {
        let run = runs.iter().find(|r| r.source == name).unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.error_count, 0);
        assert_eq!(run.last_success, Some(t(2, 9)));
    }
    let listings = active(&store).await;
    assert!(by_org(&listings, "x Labs").is_empty());
    for org in ["y Labs", "z Labs"] {
        let l = by_org(&listings, org);
        assert_eq!(l.len(), 1);
        assert_eq!(l[0].last_updated, t(2, 9));
    }
}

#[tokio::test]
async fn test_identical_cycles_are_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let (orch, _) = harness(store.clone());
    let token = CancellationToken::new();

    orch.run_cycle_at(t(3, 9), &token).await.unwrap();
    let before = active(&store).await;
    let report = orch.run_cycle_at(t(3, 12), &token).await.unwrap();
    let after = active(&store).await;

    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, before.len());
    assert_eq!(before.len(), after.len());

    let strip = |mut l: Listing| {
        l.last_updated = t(1, 0);
        l
    };
    let before: Vec<Listing> = before.into_iter().map(strip).collect();
    let after: Vec<Listing> = after.into_iter().map(strip).collect();
    assert_eq!(before, after);

    let keys: HashSet<String> = store
        .all_listings()
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.identity_key)
        .collect();
    assert_eq!(keys.len(), store.all_listings().await.unwrap().len());
}

#[tokio::test]
async fn test_last_updated_never_moves_backwards() {
    let store = Arc::new(MemoryStore::new());
    let (orch, _) = harness(store.clone());
    let token = CancellationToken::new();

    orch.run_cycle_at(t(4, 12), &token).await.unwrap();
    orch.run_cycle_at(t(4, 6), &token).await.unwrap();
    for l in store.all_listings().await.unwrap() {
        assert_eq!(l.last_updated, t(4, 12));
        assert!(l.last_updated >= l.first_seen);
    }
}

#[tokio::test]
async fn test_retention_deactivates_past_deadlines() {
    let store = Arc::new(MemoryStore::new());
    let (orch, _) = harness(store.clone());
    orch.run_cycle_at(t(5, 9), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(active(&store).await.len(), 4);

    let outcome = run_retention(store.as_ref(), 45, t(21, 0)).await.unwrap();
    assert_eq!(outcome.expired, 4);
    assert!(active(&store).await.is_empty());
    assert!(store.all_listings().await.unwrap().iter().all(|l| !l.active));
}

#[tokio::test]
async fn test_catalog_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = Arc::new(MemoryStore::open(dir.path()).await.unwrap());
        let (orch, _) = harness(store.clone());
        orch.run_cycle_at(t(6, 9), &CancellationToken::new())
            .await
            .unwrap();
    }

    let reopened = Arc::new(MemoryStore::open(dir.path()).await.unwrap());
    assert_eq!(active(&reopened).await.len(), 4);
    let runs = reopened.all_runs().await.unwrap();
    assert_eq!(runs.len(), 4);

    let (orch, _) = harness(reopened.clone());
    let report = orch
        .run_cycle_at(t(6, 12) + Duration::minutes(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.inserted, 0);
    assert_eq!(report.updated, 4);
}

#[tokio::test]
async fn test_absurd_relative_date_does_not_abort_the_cycle() {
    let store = Arc::new(MemoryStore::new());
    let (orch, canned) = harness(store.clone());
    canned.set(
        "https://acme.example/careers",
        card("Software Intern", "Acme Co", "https://acme.co/1", "₹10,000 /month")
            .replace("</h3>", "</h3><p>Posted 100000000 days ago</p>"),
    );

    let report = orch
        .run_cycle_at(t(7, 9), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.state, CycleState::Completed);
    assert_eq!(report.inserted, 4);

    let listings = active(&store).await;
    let acme = by_org(&listings, "Acme Co");
    assert_eq!(acme.len(), 1);
    assert_eq!(acme[0].posted_at, t(7, 9));
}
