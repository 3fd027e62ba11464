//! On-disk catalog snapshot.
//!
//! The whole catalog (listings plus source run rows) is serialized to one
//! JSON document in the data directory:
//!
//! ```text
//! data_dir/
//! ├── catalog.json        # last complete snapshot
//! └── catalog.json.tmp    # only present while a write is in flight
//! ```
//!
//! Writes go to the temp file first and are renamed over the target, so a
//! crash mid-write leaves the previous snapshot intact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

use crate::error::PersistenceError;
use crate::models::{Listing, SourceRun};

pub const SNAPSHOT_FILE: &str = "catalog.json";
const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub next_id: u64,
    pub listings: Vec<Listing>,
    pub runs: Vec<SourceRun>,
}

impl Snapshot {
    pub fn new(
        saved_at: DateTime<Utc>,
        next_id: u64,
        listings: Vec<Listing>,
        runs: Vec<SourceRun>,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at,
            next_id,
            listings,
            runs,
        }
    }
}

pub fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE)
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Read the snapshot at `path`, or `None` if there is none yet.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_snapshot(path: &Path) -> Result<Option<Snapshot>, PersistenceError> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No catalog snapshot yet; starting empty");
            return Ok(None);
        }
        Err(e) => return Err(io_error(path, e)),
    };
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    info!(
        listings = snapshot.listings.len(),
        runs = snapshot.runs.len(),
        saved_at = %snapshot.saved_at,
        "Loaded catalog snapshot"
    );
    Ok(Some(snapshot))
}

/// Atomically replace the snapshot at `path`.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), PersistenceError> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await.map_err(|e| io_error(dir, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json).await.map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path).await.map_err(|e| io_error(path, e))?;
    info!(
        bytes = json.len(),
        listings = snapshot.listings.len(),
        "Wrote catalog snapshot"
    );
    Ok(())
}
