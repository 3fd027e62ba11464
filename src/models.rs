//! Data models for opportunity listings and per-source run status.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`Candidate`]: a listing as extracted from one page, before reconciliation
//! - [`Listing`]: a persisted catalog record with identity and bookkeeping fields
//! - [`SourceRun`]: the health row kept for every registered source
//! - Supporting enums: [`ListingKind`], [`Location`], [`WorkMode`], [`RunStatus`]
//!
//! Field names serialize as camelCase to match the collection layout that the
//! downstream query API reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// What kind of opportunity a listing describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    Internship,
    Job,
    Hackathon,
    Event,
    Workshop,
}

impl ListingKind {
    pub const ALL: [ListingKind; 5] = [
        ListingKind::Internship,
        ListingKind::Job,
        ListingKind::Hackathon,
        ListingKind::Event,
        ListingKind::Workshop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::Internship => "internship",
            ListingKind::Job => "job",
            ListingKind::Hackathon => "hackathon",
            ListingKind::Event => "event",
            ListingKind::Workshop => "workshop",
        }
    }
}

impl fmt::Display for ListingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListingKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ListingKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown listing kind {s:?}"))
    }
}

/// How a listing is attended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkMode {
    Remote,
    Onsite,
    Hybrid,
}

/// Where an opportunity takes place.
///
/// Sites either print a plain string ("Bangalore / Remote") or expose enough
/// structure to split out a city, venue and attendance mode. Both shapes are
/// kept; the serialized form is untagged so consumers see either a string or
/// an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Location {
    Structured {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        city: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        venue: Option<String>,
        mode: WorkMode,
    },
    FreeText(String),
}

impl Location {
    /// Human-readable single-line rendering.
    pub fn display(&self) -> String {
        match self {
            Location::FreeText(s) => s.clone(),
            Location::Structured { city, venue, mode } => {
                let mode = match mode {
                    WorkMode::Remote => "Remote",
                    WorkMode::Onsite => "On-site",
                    WorkMode::Hybrid => "Hybrid",
                };
                [venue.as_deref(), city.as_deref(), Some(mode)]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
    }

    pub fn is_remote(&self) -> bool {
        match self {
            Location::Structured { mode, .. } => *mode == WorkMode::Remote,
            Location::FreeText(s) => {
                let s = s.to_lowercase();
                s.contains("remote") || s.contains("online") || s.contains("work from home")
            }
        }
    }
}

impl Default for Location {
    fn default() -> Self {
        Location::FreeText(String::new())
    }
}

/// A listing as extracted and classified from one page in one cycle.
///
/// Candidates are transient: they live for the duration of a cycle and are
/// then merged into (or inserted as) [`Listing`] records by the dedup engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub title: String,
    pub organization: String,
    pub location: Location,
    pub kind: ListingKind,
    pub category: String,
    pub domain: String,
    pub description: String,
    pub skills: BTreeSet<String>,
    pub compensation: Option<String>,
    pub experience: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub application_url: String,
    pub source_url: String,
    pub source: String,
    pub priority: u8,
    pub remote: bool,
    pub urgent: bool,
}

/// One opportunity record in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Store-assigned row id.
    pub id: u64,
    /// Deterministic identity derived from title, organization and link.
    pub identity_key: String,
    pub title: String,
    pub organization: String,
    pub location: Location,
    pub kind: ListingKind,
    pub category: String,
    pub domain: String,
    pub description: String,
    pub skills: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<String>,
    pub experience: String,
    pub posted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    pub application_url: String,
    pub source_url: String,
    /// Name of the registry source that produced the listing.
    pub source: String,
    pub priority: u8,
    pub remote: bool,
    pub urgent: bool,
    pub active: bool,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Maintained by the query API; never touched by the pipeline.
    #[serde(default)]
    pub view_count: u64,
    /// Maintained by the query API; never touched by the pipeline.
    #[serde(default)]
    pub application_count: u64,
}

impl Listing {
    /// Whether the listing's deadline lies strictly before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| d < now)
    }
}

/// Lifecycle status of a source's most recent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Health row kept for each registered source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRun {
    pub source: String,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Cumulative number of candidates produced across all runs.
    pub item_count: u64,
    /// Cumulative number of failed runs.
    pub error_count: u64,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Running mean of completed run durations.
    pub avg_duration_ms: f64,
    /// Number of completed runs (success or error) folded into the mean.
    pub run_count: u64,
    /// Successful runs in a row that produced zero candidates.
    #[serde(default)]
    pub consecutive_empty: u32,
}

impl SourceRun {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            last_run: None,
            last_success: None,
            status: RunStatus::Idle,
            item_count: 0,
            error_count: 0,
            last_error: None,
            avg_duration_ms: 0.0,
            run_count: 0,
            consecutive_empty: 0,
        }
    }

    pub(crate) fn fold_duration(&mut self, duration_ms: u64) {
        let n = self.run_count as f64;
        self.avg_duration_ms = (self.avg_duration_ms * n + duration_ms as f64) / (n + 1.0);
        self.run_count += 1;
    }
}
