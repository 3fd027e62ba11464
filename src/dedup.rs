//! Identity keys and the merge-or-insert engine.
//!
//! # Identity key
//!
//! [`identity_key`] is a pure function of `(title, organization, link)`:
//!
//! 1. each part is case-folded
//! 2. everything that is not a letter or digit is removed (whitespace included)
//! 3. the parts are joined with `-`
//! 4. the result is cut to at most `max_len` characters
//!
//! # Upsert
//!
//! For every candidate the engine looks up, in order, an exact identity-key
//! match and then a fuzzy match (same organization, same case-folded title
//! prefix) among active listings. The fuzzy fallback skips listings already
//! touched in this pass and listings whose key belongs to another candidate
//! of the same pass, since that candidate will claim them exactly. A match is
//! merged; anything else is inserted. Candidates are applied one at a time,
//! and a failure on one candidate is logged and skipped.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::PersistenceError;
use crate::models::{Candidate, Listing};
use crate::store::ListingStore;

/// Default upper bound on identity-key length.
pub const DEFAULT_KEY_LEN: usize = 100;
/// Default number of title characters compared by the fuzzy fallback.
pub const DEFAULT_FUZZY_PREFIX: usize = 30;

fn normalize_part(part: &str) -> String {
    part.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Identity key with the default length bound.
pub fn identity_key(title: &str, organization: &str, link: &str) -> String {
    identity_key_bounded(title, organization, link, DEFAULT_KEY_LEN)
}

/// Identity key cut to at most `max_len` characters.
pub fn identity_key_bounded(title: &str, organization: &str, link: &str, max_len: usize) -> String {
    [title, organization, link]
        .iter()
        .map(|p| normalize_part(p))
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .take(max_len)
        .collect()
}

/// What happened to one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted(u64),
    Updated(u64),
}

/// Totals for one upsert pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
}

impl UpsertReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.failed
    }
}

fn new_listing(c: Candidate, key: String, now: DateTime<Utc>) -> Listing {
    let mut listing = Listing {
        id: 0,
        identity_key: key,
        title: c.title,
        organization: c.organization,
        location: c.location,
        kind: c.kind,
        category: c.category,
        domain: c.domain,
        description: c.description,
        skills: c.skills,
        compensation: c.compensation,
        experience: c.experience,
        posted_at: c.posted_at.unwrap_or(now),
        deadline: c.deadline,
        application_url: c.application_url,
        source_url: c.source_url,
        source: c.source,
        priority: c.priority,
        remote: c.remote,
        urgent: c.urgent,
        active: true,
        first_seen: now,
        last_updated: now,
        view_count: 0,
        application_count: 0,
    };
    listing.active = !listing.is_expired(now);
    listing
}

/// Refresh the mutable fields of `existing` from `c`.
///
/// Id, first-seen, posted-at and the API-owned counters are kept.
fn merge(existing: &mut Listing, c: Candidate, key: String, now: DateTime<Utc>) {
    existing.identity_key = key;
    existing.title = c.title;
    existing.organization = c.organization;
    existing.location = c.location;
    existing.kind = c.kind;
    existing.category = c.category;
    existing.domain = c.domain;
    existing.description = c.description;
    existing.skills = c.skills;
    existing.compensation = c.compensation;
    existing.experience = c.experience;
    existing.deadline = c.deadline;
    existing.application_url = c.application_url;
    existing.source_url = c.source_url;
    existing.source = c.source;
    existing.priority = c.priority;
    existing.remote = c.remote;
    existing.urgent = c.urgent;
    existing.last_updated = existing.last_updated.max(now);
    existing.active = !existing.is_expired(now);
}

/// Bookkeeping for one upsert pass.
#[derive(Debug, Default)]
pub struct UpsertPass {
    /// Ids written so far.
    touched: HashSet<u64>,
    /// Identity keys of every candidate in the pass.
    claimed: HashSet<String>,
}

impl UpsertPass {
    pub fn new(claimed: HashSet<String>) -> Self {
        Self {
            touched: HashSet::new(),
            claimed,
        }
    }

    /// Whether the fuzzy fallback may hand `listing` to another candidate.
    fn may_absorb(&self, listing: &Listing) -> bool {
        !self.touched.contains(&listing.id) && !self.claimed.contains(&listing.identity_key)
    }
}

/// Reconciles candidates against a [`ListingStore`].
#[derive(Debug)]
pub struct DedupEngine<'a, S> {
    store: &'a S,
    key_len: usize,
    fuzzy_prefix: usize,
}

impl<'a, S: ListingStore> DedupEngine<'a, S> {
    pub fn new(store: &'a S, key_len: usize, fuzzy_prefix: usize) -> Self {
        Self {
            store,
            key_len,
            fuzzy_prefix,
        }
    }

    /// Identity key of `candidate` under the configured bound.
    pub fn key_of(&self, candidate: &Candidate) -> String {
        identity_key_bounded(
            &candidate.title,
            &candidate.organization,
            &candidate.application_url,
            self.key_len,
        )
    }

    /// Merge or insert one candidate.
    ///
    /// The fuzzy fallback never picks a listing written earlier in `pass`
    /// nor one whose key another candidate of `pass` carries, so two
    /// distinct listings that share a title prefix cannot overwrite each
    /// other whatever their order.
    pub async fn upsert(
        &self,
        candidate: Candidate,
        now: DateTime<Utc>,
        pass: &mut UpsertPass,
    ) -> Result<UpsertOutcome, PersistenceError> {
        let key = self.key_of(&candidate);

        let mut found = self.store.find_by_identity(&key).await?;
        if found.is_none() {
            found = self
                .store
                .find_fuzzy(&candidate.organization, &candidate.title, self.fuzzy_prefix)
                .await?
                .filter(|l| pass.may_absorb(l));
            if let Some(l) = &found {
                debug!(id = l.id, old_key = %l.identity_key, new_key = %key, "fuzzy match");
            }
        }

        match found {
            Some(mut existing) => {
                merge(&mut existing, candidate, key, now);
                let id = existing.id;
                self.store.update(existing).await?;
                pass.touched.insert(id);
                Ok(UpsertOutcome::Updated(id))
            }
            None => {
                let id = self.store.insert(new_listing(candidate, key, now)).await?;
                pass.touched.insert(id);
                Ok(UpsertOutcome::Inserted(id))
            }
        }
    }

    /// Apply `candidates` sequentially and report totals.
    #[instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    pub async fn upsert_all(&self, candidates: Vec<Candidate>, now: DateTime<Utc>) -> UpsertReport {
        let t0 = Instant::now();
        let mut report = UpsertReport::default();
        let mut pass = UpsertPass::new(candidates.iter().map(|c| self.key_of(c)).collect());

        for candidate in candidates {
            let title = candidate.title.clone();
            let source = candidate.source.clone();
            match self.upsert(candidate, now, &mut pass).await {
                Ok(UpsertOutcome::Inserted(_)) => report.inserted += 1,
                Ok(UpsertOutcome::Updated(_)) => report.updated += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(%source, %title, error = %e, "skipping candidate that failed to persist");
                }
            }
        }

        info!(
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Upsert pass finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingKind, Location};
    use crate::store::MemoryStore;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).unwrap()
    }

    fn candidate(title: &str, org: &str, link: &str) -> Candidate {
        Candidate {
            title: title.to_string(),
            organization: org.to_string(),
            location: Location::FreeText("Remote".into()),
            kind: ListingKind::Internship,
            category: "software".into(),
            domain: "General".into(),
            description: String::new(),
            skills: Default::default(),
            compensation: Some("₹10,000".into()),
            experience: "Any Level".into(),
            posted_at: None,
            deadline: None,
            application_url: link.to_string(),
            source_url: "https://board.example".into(),
            source: "board".into(),
            priority: 5,
            remote: true,
            urgent: false,
        }
    }

    #[test]
    fn test_identity_key_normalization() {
        assert_eq!(
            identity_key("Software Intern", "Acme Co", "https://acme.co/1"),
            "softwareintern-acmeco-httpsacmeco1"
        );
        assert_eq!(
            identity_key("  SOFTWARE   intern!! ", "acme, co.", "https://acme.co/1"),
            identity_key("Software Intern", "Acme Co", "https://acme.co/1")
        );
    }

    #[test]
    fn test_identity_key_is_bounded() {
        let long = "x".repeat(300);
        assert_eq!(identity_key(&long, "org", "link").chars().count(), DEFAULT_KEY_LEN);
        assert_eq!(identity_key_bounded("abc", "def", "ghi", 5), "abc-d");
    }

    #[tokio::test]
    async fn test_second_observation_merges() {
        let store = MemoryStore::new();
        let engine = DedupEngine::new(&store, DEFAULT_KEY_LEN, DEFAULT_FUZZY_PREFIX);

        let first = vec![candidate("Software Intern", "Acme Co", "https://acme.co/1")];
        let r1 = engine.upsert_all(first, t0()).await;
        assert_eq!(r1, UpsertReport { inserted: 1, updated: 0, failed: 0 });

        let mut again = candidate("Software Intern", "Acme Co", "https://acme.co/1");
        again.compensation = Some("₹20,000".into());
        let later = t0() + Duration::hours(3);
        let r2 = engine.upsert_all(vec![again], later).await;
        assert_eq!(r2, UpsertReport { inserted: 0, updated: 1, failed: 0 });

        let all = store.all_listings().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].compensation.as_deref(), Some("₹20,000"));
        assert_eq!(all[0].first_seen, t0());
        assert_eq!(all[0].last_updated, later);
        assert_eq!(all[0].posted_at, t0());
    }

    #[tokio::test]
    async fn test_fuzzy_match_absorbs_title_edit_and_rekeys() {
        let store = MemoryStore::new();
        let engine = DedupEngine::new(&store, DEFAULT_KEY_LEN, DEFAULT_FUZZY_PREFIX);
        engine
            .upsert_all(
                vec![candidate(
                    "Machine Learning Research Intern",
                    "Acme",
                    "https://acme.co/ml",
                )],
                t0(),
            )
            .await;
        let r = engine
            .upsert_all(
                vec![candidate(
                    "Machine Learning Research Intern (Remote)",
                    "Acme",
                    "https://acme.co/ml",
                )],
                t0() + Duration::hours(1),
            )
            .await;
        assert_eq!(r.updated, 1);
        let all = store.all_listings().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(
            all[0].identity_key,
            identity_key(
                "Machine Learning Research Intern (Remote)",
                "Acme",
                "https://acme.co/ml"
            )
        );
    }

    #[tokio::test]
    async fn test_fuzzy_never_merges_two_listings_of_one_pass() {
        let store = MemoryStore::new();
        let engine = DedupEngine::new(&store, DEFAULT_KEY_LEN, DEFAULT_FUZZY_PREFIX);
        let batch = vec![
            candidate("Software Engineering Intern - Backend", "Acme", "https://acme.co/b"),
            candidate("Software Engineering Intern - Frontend", "Acme", "https://acme.co/f"),
        ];
        let r = engine.upsert_all(batch.clone(), t0()).await;
        assert_eq!(r.inserted, 2);
        let r = engine.upsert_all(batch, t0() + Duration::hours(1)).await;
        assert_eq!(r, UpsertReport { inserted: 0, updated: 2, failed: 0 });
        assert_eq!(store.all_listings().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_new_sibling_listed_first_does_not_take_over_existing_row() {
        let store = MemoryStore::new();
        let engine = DedupEngine::new(&store, DEFAULT_KEY_LEN, DEFAULT_FUZZY_PREFIX);
        let backend =
            candidate("Software Engineering Intern - Backend", "Acme", "https://acme.co/b");
        engine.upsert_all(vec![backend.clone()], t0()).await;

        let mut stored = store.all_listings().await.unwrap().remove(0);
        let backend_id = stored.id;
        stored.view_count = 42;
        store.update(stored).await.unwrap();

        let frontend =
            candidate("Software Engineering Intern - Frontend", "Acme", "https://acme.co/f");
        let r = engine
            .upsert_all(vec![frontend, backend], t0() + Duration::hours(3))
            .await;
        assert_eq!(r, UpsertReport { inserted: 1, updated: 1, failed: 0 });

        let all = store.all_listings().await.unwrap();
        assert_eq!(all.len(), 2);
        let kept = all.iter().find(|l| l.id == backend_id).unwrap();
        assert_eq!(kept.title, "Software Engineering Intern - Backend");
        assert_eq!(kept.view_count, 42);
        assert_eq!(kept.first_seen, t0());
        let added = all.iter().find(|l| l.id != backend_id).unwrap();
        assert_eq!(added.title, "Software Engineering Intern - Frontend");
        assert_eq!(added.view_count, 0);
    }

    #[tokio::test]
    async fn test_counters_are_preserved_on_merge() {
        let store = MemoryStore::new();
        let engine = DedupEngine::new(&store, DEFAULT_KEY_LEN, DEFAULT_FUZZY_PREFIX);
        let c = candidate("Software Intern", "Acme Co", "https://acme.co/1");
        engine.upsert_all(vec![c.clone()], t0()).await;

        let mut stored = store.all_listings().await.unwrap().remove(0);
        stored.view_count = 42;
        stored.application_count = 7;
        store.update(stored).await.unwrap();

        engine.upsert_all(vec![c], t0() + Duration::hours(2)).await;
        let after = store.all_listings().await.unwrap().remove(0);
        assert_eq!((after.view_count, after.application_count), (42, 7));
    }

    #[tokio::test]
    async fn test_past_deadline_candidate_is_stored_inactive() {
        let store = MemoryStore::new();
        let engine = DedupEngine::new(&store, DEFAULT_KEY_LEN, DEFAULT_FUZZY_PREFIX);
        let mut c = candidate("Old Hackathon 2025", "MLH", "https://mlh.io/old");
        c.deadline = Some(t0() - Duration::days(3));
        engine.upsert_all(vec![c], t0()).await;
        assert!(!store.all_listings().await.unwrap()[0].active);
    }
}
