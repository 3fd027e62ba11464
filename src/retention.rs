//! Retention pass: deactivate listings that expired or went stale.

use chrono::{DateTime, Duration, Utc};
use std::time::Instant;
use tracing::{error, info, instrument};

use crate::error::PersistenceError;
use crate::store::{ListingStore, RetentionOutcome};

/// Deactivate listings whose deadline passed or that were not refreshed
/// within `window_days`, then flush the store.
///
/// # Arguments
///
/// * `store` - Catalog to sweep
/// * `window_days` - Age of `last_updated` after which a listing is stale
/// * `now` - Reference time for both rules
#[instrument(level = "info", skip_all, fields(window_days = window_days))]
pub async fn run_retention<S: ListingStore>(
    store: &S,
    window_days: i64,
    now: DateTime<Utc>,
) -> Result<RetentionOutcome, PersistenceError> {
    let t0 = Instant::now();
    let stale_before = Duration::try_days(window_days.max(0))
        .and_then(|window| now.checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let outcome = store.deactivate_expired(stale_before, now).await?;

    if outcome.total() > 0 {
        if let Err(e) = store.flush().await {
            error!(error = %e, "Failed to persist catalog after retention");
            return Err(e);
        }
    }
    info!(
        expired = outcome.expired,
        stale = outcome.stale,
        %stale_before,
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "Retention pass finished"
    );
    Ok(outcome)
}
