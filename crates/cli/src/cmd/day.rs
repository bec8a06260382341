//! Close out the day with an end-of-day snapshot

use crate::util;
use anyhow::{Context, Result};
use capsy_core::Repository;
use owo_colors::OwoColorize;

pub fn run(memo: &str) -> Result<()> {
    let repo_root = util::find_repo_root().context("Failed to find repository")?;

    tracing::debug!(root = %repo_root.display(), "recording end-of-day snapshot");

    let mut repo = Repository::open(&repo_root)?;

    // The day marker is always committed, even with no working-tree changes;
    // it shares the root tree with HEAD in that case
    let digest = repo.capture_with(&format!("[endday] {memo}"), true)?;

    println!(
        "{} end of day as snapshot {}",
        "Logged".green().bold(),
        util::short(digest).yellow()
    );
    println!("  Memo: {}", memo);

    Ok(())
}
