//! Utility functions for text cleanup, link resolution and file system checks.
//!
//! This module provides helper functions used throughout the pipeline:
//! - Whitespace normalization and bounded truncation of scraped text
//! - Resolution of relative links against a source's base URL
//! - String truncation and slugification for logs and Markdown anchors
//! - File system validation for the data directory

use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Collapse all whitespace runs to single spaces, trim, and cap at `max` characters.
///
/// Scraped DOM text is full of indentation, newlines and non-breaking spaces;
/// every extracted field passes through here before it is compared or stored.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(clean_text("  Software\n\t Intern ", 200), "Software Intern");
/// ```
pub fn clean_text(raw: &str, max: usize) -> String {
    let collapsed = raw
        .split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() > max {
        collapsed.chars().take(max).collect::<String>().trim_end().to_string()
    } else {
        collapsed
    }
}

/// Resolve an `href` against the page it was found on.
///
/// Returns `None` for empty links, fragment-only links and non-web schemes
/// (`javascript:`, `mailto:`, `tel:`), since none of them is a usable
/// application link.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(truncate_for_log("short", 100), "short");
/// assert_eq!(truncate_for_log(&"a".repeat(500), 10), "aaaaaaaaaa…(+490 bytes)");
/// ```
pub fn truncate_for_log(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…(+{} bytes)", &s[..cut], s.len() - cut),
    }
}

/// Convert a heading to a Markdown anchor.
///
/// Lowercases the text, removes special characters, and replaces spaces
/// with hyphens.
pub fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .replace(|c: char| !c.is_alphanumeric() && c != ' ' && c != '-', "")
        .replace(' ', "-")
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a probe file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(path).await?;
    let probe_path = format!("{}/..__probe_write__", path.trim_end_matches('/'));
    stdfs::File::create(&probe_path)?;
    let _ = stdfs::remove_file(&probe_path);
    info!("Data directory is writable");
    Ok(())
}
