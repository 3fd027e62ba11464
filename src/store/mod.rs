//! Catalog persistence.
//!
//! Two narrow traits describe everything the pipeline needs from storage:
//!
//! - [`ListingStore`]: identity lookups, insert/update, retention and queries
//!   over the Listing collection
//! - [`RunStatusStore`]: idempotent per-source health upserts
//!
//! [`MemoryStore`] implements both over in-process indexes (unique identity
//! key, `(kind, category, active)` facets and posted-at ordering) and can be
//! backed by a JSON snapshot in the data directory, see [`snapshot`].

pub mod snapshot;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::PersistenceError;
use crate::models::{Listing, ListingKind, RunStatus, SourceRun};
use snapshot::{Snapshot, read_snapshot, snapshot_path, write_snapshot};

/// Filters and pagination for catalog queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingQuery {
    pub kind: Option<ListingKind>,
    pub category: Option<String>,
    /// Case-insensitive exact match.
    pub organization: Option<String>,
    /// Matches listings carrying any of these skills (case-insensitive).
    pub skills: Vec<String>,
    /// Substring of title, organization or description (case-insensitive).
    pub text: Option<String>,
    pub active_only: bool,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPage {
    /// Matches before pagination.
    pub total: usize,
    pub items: Vec<Listing>,
}

/// Counts from one retention pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    /// Deactivated because the deadline passed.
    pub expired: usize,
    /// Deactivated because it was not refreshed within the window.
    pub stale: usize,
}

impl RetentionOutcome {
    pub fn total(&self) -> usize {
        self.expired + self.stale
    }
}

/// Storage for the Listing collection.
pub trait ListingStore {
    /// Listing currently holding `identity_key`, active or not.
    async fn find_by_identity(&self, identity_key: &str)
    -> Result<Option<Listing>, PersistenceError>;

    /// Active listing with exactly this organization whose case-folded title
    /// starts with the same `prefix_len` characters as `title`.
    async fn find_fuzzy(
        &self,
        organization: &str,
        title: &str,
        prefix_len: usize,
    ) -> Result<Option<Listing>, PersistenceError>;

    /// Insert a new listing; the store assigns and returns its id.
    async fn insert(&self, listing: Listing) -> Result<u64, PersistenceError>;

    /// Replace an existing listing (matched by id).
    async fn update(&self, listing: Listing) -> Result<(), PersistenceError>;

    /// Deactivate listings whose deadline is before `now` or whose
    /// last update is before `stale_before`.
    async fn deactivate_expired(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RetentionOutcome, PersistenceError>;

    async fn query(&self, query: &ListingQuery) -> Result<QueryPage, PersistenceError>;

    async fn all_listings(&self) -> Result<Vec<Listing>, PersistenceError>;

    /// Persist pending changes, if the store has a backing medium.
    async fn flush(&self) -> Result<(), PersistenceError>;
}

/// Storage for per-source run rows. Every method is an upsert keyed by source name.
pub trait RunStatusStore {
    /// Create an idle row for every name that has none.
    async fn ensure_sources(&self, names: &[String]) -> Result<(), PersistenceError>;

    async fn record_start(&self, source: &str, now: DateTime<Utc>)
    -> Result<(), PersistenceError>;

    async fn record_success(
        &self,
        source: &str,
        item_count: u64,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn record_error(
        &self,
        source: &str,
        message: &str,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError>;

    async fn all_runs(&self) -> Result<Vec<SourceRun>, PersistenceError>;
}

type FacetKey = (ListingKind, String, bool);

#[derive(Debug, Default)]
struct Catalog {
    next_id: u64,
    listings: BTreeMap<u64, Listing>,
    by_identity: HashMap<String, u64>,
    by_facet: HashMap<FacetKey, BTreeSet<u64>>,
    by_posted: BTreeSet<(Reverse<DateTime<Utc>>, u64)>,
    runs: BTreeMap<String, SourceRun>,
}

fn facet_of(l: &Listing) -> FacetKey {
    (l.kind, l.category.clone(), l.active)
}

fn title_prefix(title: &str, n: usize) -> String {
    title.to_lowercase().chars().take(n).collect()
}

impl Catalog {
    fn from_snapshot(snap: Snapshot) -> Self {
        let mut catalog = Catalog {
            next_id: snap.next_id,
            runs: snap.runs.into_iter().map(|r| (r.source.clone(), r)).collect(),
            ..Catalog::default()
        };
        for listing in snap.listings {
            catalog.next_id = catalog.next_id.max(listing.id + 1);
            catalog.index(&listing);
            catalog.listings.insert(listing.id, listing);
        }
        catalog
    }

    fn index(&mut self, l: &Listing) {
        self.by_identity.insert(l.identity_key.clone(), l.id);
        self.by_facet.entry(facet_of(l)).or_default().insert(l.id);
        self.by_posted.insert((Reverse(l.posted_at), l.id));
    }

    fn unindex(&mut self, l: &Listing) {
        if self.by_identity.get(&l.identity_key) == Some(&l.id) {
            self.by_identity.remove(&l.identity_key);
        }
        if let Some(ids) = self.by_facet.get_mut(&facet_of(l)) {
            ids.remove(&l.id);
            if ids.is_empty() {
                self.by_facet.remove(&facet_of(l));
            }
        }
        self.by_posted.remove(&(Reverse(l.posted_at), l.id));
    }

    fn replace(&mut self, listing: Listing) -> Result<(), PersistenceError> {
        let Some(old) = self.listings.get(&listing.id).cloned() else {
            return Err(PersistenceError::UnknownListing(listing.id));
        };
        if let Some(holder) = self.by_identity.get(&listing.identity_key) {
            if *holder != listing.id {
                return Err(PersistenceError::DuplicateIdentity(listing.identity_key));
            }
        }
        self.unindex(&old);
        self.index(&listing);
        self.listings.insert(listing.id, listing);
        Ok(())
    }

    fn run_mut(&mut self, source: &str) -> &mut SourceRun {
        self.runs
            .entry(source.to_string())
            .or_insert_with(|| SourceRun::new(source))
    }

    fn snapshot(&self, now: DateTime<Utc>) -> Snapshot {
        Snapshot::new(
            now,
            self.next_id,
            self.listings.values().cloned().collect(),
            self.runs.values().cloned().collect(),
        )
    }
}

fn matches_query(l: &Listing, q: &ListingQuery, text: Option<&str>, skills: &[String]) -> bool {
    if q.active_only && !l.active {
        return false;
    }
    if q.kind.is_some_and(|k| k != l.kind) {
        return false;
    }
    if q.category.as_deref().is_some_and(|c| !c.eq_ignore_ascii_case(&l.category)) {
        return false;
    }
    if q
        .organization
        .as_deref()
        .is_some_and(|o| o.to_lowercase() != l.organization.to_lowercase())
    {
        return false;
    }
    if !skills.is_empty() && !l.skills.iter().any(|s| skills.contains(&s.to_lowercase())) {
        return false;
    }
    if let Some(needle) = text {
        let hay = format!("{} {} {}", l.title, l.organization, l.description).to_lowercase();
        if !hay.contains(needle) {
            return false;
        }
    }
    true
}

/// In-process catalog with optional JSON snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Catalog>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty store without a backing file; `flush` is a no-op.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by `data_dir/catalog.json`, loading it if present.
    #[instrument(level = "info", skip_all, fields(data_dir = %data_dir.display()))]
    pub async fn open(data_dir: &Path) -> Result<Self, PersistenceError> {
        let path = snapshot_path(data_dir);
        let catalog = match read_snapshot(&path).await? {
            Some(snap) => Catalog::from_snapshot(snap),
            None => Catalog::default(),
        };
        Ok(Self {
            inner: RwLock::new(catalog),
            path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl ListingStore for MemoryStore {
    async fn find_by_identity(
        &self,
        identity_key: &str,
    ) -> Result<Option<Listing>, PersistenceError> {
        let cat = self.inner.read().await;
        Ok(cat
            .by_identity
            .get(identity_key)
            .and_then(|id| cat.listings.get(id))
            .cloned())
    }

    async fn find_fuzzy(
        &self,
        organization: &str,
        title: &str,
        prefix_len: usize,
    ) -> Result<Option<Listing>, PersistenceError> {
        let wanted = title_prefix(title, prefix_len);
        let cat = self.inner.read().await;
        Ok(cat
            .listings
            .values()
            .find(|l| {
                l.active
                    && l.organization == organization
                    && title_prefix(&l.title, prefix_len) == wanted
            })
            .cloned())
    }

    async fn insert(&self, mut listing: Listing) -> Result<u64, PersistenceError> {
        let mut cat = self.inner.write().await;
        if cat.by_identity.contains_key(&listing.identity_key) {
            return Err(PersistenceError::DuplicateIdentity(listing.identity_key));
        }
        let id = cat.next_id.max(1);
        cat.next_id = id + 1;
        listing.id = id;
        cat.index(&listing);
        cat.listings.insert(id, listing);
        Ok(id)
    }

    async fn update(&self, listing: Listing) -> Result<(), PersistenceError> {
        self.inner.write().await.replace(listing)
    }

    async fn deactivate_expired(
        &self,
        stale_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RetentionOutcome, PersistenceError> {
        let mut cat = self.inner.write().await;
        let mut outcome = RetentionOutcome::default();
        let doomed: Vec<Listing> = cat
            .listings
            .values()
            .filter(|l| l.active && (l.is_expired(now) || l.last_updated < stale_before))
            .cloned()
            .collect();
        for mut listing in doomed {
            if listing.is_expired(now) {
                outcome.expired += 1;
            } else {
                outcome.stale += 1;
            }
            debug!(id = listing.id, key = %listing.identity_key, "deactivating listing");
            listing.active = false;
            cat.replace(listing)?;
        }
        Ok(outcome)
    }

    async fn query(&self, q: &ListingQuery) -> Result<QueryPage, PersistenceError> {
        let cat = self.inner.read().await;
        let text = q.text.as_deref().map(str::to_lowercase);
        let skills: Vec<String> = q.skills.iter().map(|s| s.to_lowercase()).collect();

        // Narrow through the facet index when the query pins all three parts.
        let facet_ids = match (q.kind, q.category.as_ref(), q.active_only) {
            (Some(kind), Some(category), true) => Some(
                cat.by_facet
                    .get(&(kind, category.clone(), true))
                    .cloned()
                    .unwrap_or_default(),
            ),
            _ => None,
        };

        let mut hits: Vec<&Listing> = cat
            .by_posted
            .iter()
            .filter(|(_, id)| facet_ids.as_ref().is_none_or(|ids| ids.contains(id)))
            .filter_map(|(_, id)| cat.listings.get(id))
            .filter(|l| matches_query(l, q, text.as_deref(), &skills))
            .collect();
        // by_posted already orders by posted_at desc; break ties by priority.
        hits.sort_by(|a, b| {
            b.posted_at
                .cmp(&a.posted_at)
                .then(b.priority.cmp(&a.priority))
        });

        let total = hits.len();
        let items = hits
            .into_iter()
            .skip(q.offset)
            .take(q.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(QueryPage { total, items })
    }

    async fn all_listings(&self) -> Result<Vec<Listing>, PersistenceError> {
        Ok(self.inner.read().await.listings.values().cloned().collect())
    }

    async fn flush(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snap = self.inner.read().await.snapshot(Utc::now());
        write_snapshot(path, &snap).await
    }
}

impl RunStatusStore for MemoryStore {
    async fn ensure_sources(&self, names: &[String]) -> Result<(), PersistenceError> {
        let mut cat = self.inner.write().await;
        for name in names {
            cat.run_mut(name);
        }
        let unknown: Vec<&String> = cat.runs.keys().filter(|k| !names.contains(*k)).collect();
        if !unknown.is_empty() {
            warn!(?unknown, "run rows exist for sources no longer registered");
        }
        Ok(())
    }

    async fn record_start(&self, source: &str, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let mut cat = self.inner.write().await;
        let run = cat.run_mut(source);
        run.status = RunStatus::Running;
        run.last_run = Some(now);
        Ok(())
    }

    async fn record_success(
        &self,
        source: &str,
        item_count: u64,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut cat = self.inner.write().await;
        let run = cat.run_mut(source);
        run.status = RunStatus::Success;
        run.last_success = Some(now);
        run.item_count += item_count;
        run.last_error = None;
        if item_count == 0 {
            run.consecutive_empty += 1;
        } else {
            run.consecutive_empty = 0;
        }
        run.fold_duration(duration_ms);
        Ok(())
    }

    async fn record_error(
        &self,
        source: &str,
        message: &str,
        duration_ms: u64,
        _now: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        let mut cat = self.inner.write().await;
        let run = cat.run_mut(source);
        run.status = RunStatus::Error;
        run.error_count += 1;
        run.last_error = Some(message.to_string());
        run.fold_duration(duration_ms);
        Ok(())
    }

    async fn all_runs(&self) -> Result<Vec<SourceRun>, PersistenceError> {
        Ok(self.inner.read().await.runs.values().cloned().collect())
    }
}

impl MemoryStore {
    /// Log catalog and run-row counts; used after loading a snapshot.
    pub async fn log_summary(&self) {
        let cat = self.inner.read().await;
        let active = cat.listings.values().filter(|l| l.active).count();
        info!(
            listings = cat.listings.len(),
            active,
            runs = cat.runs.len(),
            "Catalog ready"
        );
    }
}
