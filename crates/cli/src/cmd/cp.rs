//! Capture the working tree as a new snapshot

use crate::util;
use anyhow::{Context, Result};
use capsy_core::Repository;
use owo_colors::OwoColorize;

pub fn run(message: &str) -> Result<()> {
    let repo_root = util::find_repo_root().context("Failed to find repository")?;

    tracing::debug!(root = %repo_root.display(), "capturing working tree");

    let mut repo = Repository::open(&repo_root)?;
    let digest = repo.capture(message)?;

    println!(
        "{} snapshot {}",
        "Captured".green().bold(),
        util::short(digest).yellow()
    );
    println!("  Memo: {}", message);

    Ok(())
}
