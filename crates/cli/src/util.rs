//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use capsy_core::{Digest, Repository};
use std::path::PathBuf;

/// Find repository root by walking up from cwd to find .capsy/
pub fn find_repo_root() -> Result<PathBuf> {
    let mut current = std::env::current_dir().context("Failed to get current directory")?;

    loop {
        let capsy_dir = current.join(".capsy");
        if capsy_dir.exists() && capsy_dir.is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => {
                return Err(capsy_core::Error::NotInitialized(
                    std::env::current_dir().unwrap_or_default(),
                )
                .into())
            }
        }
    }
}

/// Resolve a snapshot reference to a digest
///
/// Supports:
/// - Full hex digest (64 characters)
/// - Unique hex prefix (at least 4 characters)
///
/// Every failure to resolve is `NotFound`, whatever form the reference took,
/// so the exit-code mapping is uniform.
pub fn resolve_snapshot_ref(reference: &str, repo: &Repository) -> Result<Digest> {
    if let Ok(digest) = Digest::from_hex(reference) {
        if repo.graph().contains(digest) {
            return Ok(digest);
        }
        return Err(capsy_core::Error::NotFound(digest.to_hex()).into());
    }

    if reference.len() >= 4 && reference.chars().all(|c| c.is_ascii_hexdigit()) {
        let matching: Vec<_> = repo
            .graph()
            .ids()
            .into_iter()
            .filter(|d| d.to_hex().starts_with(reference))
            .collect();

        match matching.len() {
            1 => return Ok(matching[0]),
            0 => {}
            n => {
                return Err(capsy_core::Error::NotFound(format!(
                    "unique snapshot for prefix '{reference}' ({n} candidates)"
                ))
                .into())
            }
        }
    }

    Err(capsy_core::Error::NotFound(format!("snapshot reference '{reference}'")).into())
}

/// First 8 hex characters of a digest, for display
pub fn short(digest: Digest) -> String {
    digest.to_hex()[..8].to_string()
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts_ms: u64) -> String {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let datetime = UNIX_EPOCH + Duration::from_millis(ts_ms);

    if let Ok(elapsed) = SystemTime::now().duration_since(datetime) {
        let seconds = elapsed.as_secs();

        if seconds < 60 {
            format!("{} seconds ago", seconds)
        } else if seconds < 3600 {
            format!("{} minutes ago", seconds / 60)
        } else if seconds < 86400 {
            format!("{} hours ago", seconds / 3600)
        } else if seconds < 604800 {
            format!("{} days ago", seconds / 86400)
        } else {
            format!("{} weeks ago", seconds / 604800)
        }
    } else {
        "in the future".to_string()
    }
}

/// Format timestamp as absolute time ("2024-01-03 14:30:00")
pub fn format_absolute_time(ts_ms: u64) -> String {
    let secs = ts_ms / 1000;
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    // Civil calendar from days since epoch
    // Algorithm from http://howardhinnant.github.io/date_algorithms.html
    let epoch_days = days + 719468;
    let era = epoch_days / 146097;
    let doe = epoch_days - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year, m, d, hours, minutes, seconds
    )
}
