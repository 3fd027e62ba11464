//! # Opportunity Aggregator
//!
//! Collects internships, jobs, hackathons, workshops and campus events from
//! many public websites and feeds into one de-duplicated catalog that stays
//! fresh on a schedule.
//!
//! ## Pipeline
//!
//! 1. **Registry**: immutable list of sources with their fetch mode and
//!    extraction strategy ([`registry`])
//! 2. **Fetch**: plain HTTP or WebDriver rendering, with narrow retries
//!    ([`fetch`])
//! 3. **Extract**: selector-based, generic or feed parsing into classified
//!    candidates ([`extract`], [`classify`])
//! 4. **Reconcile**: identity-key and fuzzy matching into the catalog
//!    ([`dedup`], [`store`])
//! 5. **Schedule**: batched cycles, retention and status reports
//!    ([`orchestrator`], [`retention`], [`scheduler`], [`status`])

pub mod classify;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod utils;
