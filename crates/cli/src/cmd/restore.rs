//! Restore a snapshot into the working tree or another directory

use crate::util;
use anyhow::{Context, Result};
use capsy_core::Repository;
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::Path;

pub fn run(snapshot_ref: &str, dest: Option<&Path>, yes: bool) -> Result<()> {
    let repo_root = util::find_repo_root().context("Failed to find repository")?;

    let repo = Repository::open(&repo_root)?;
    let digest = util::resolve_snapshot_ref(snapshot_ref, &repo)?;
    let snapshot = repo.graph().get(digest)?;

    tracing::debug!(reference = snapshot_ref, snapshot = %digest, "resolved snapshot reference");

    let in_place = dest.is_none();
    let target = dest.unwrap_or(repo.store().root());

    println!("{}", "Restore Snapshot".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!(
        "Snapshot: {} {} {}",
        util::short(digest).yellow(),
        snapshot.message,
        util::format_relative_time(snapshot.ts_unix_ms).dimmed()
    );
    println!("Target:   {}", target.display().to_string().cyan());
    println!();

    // Restoring over the working tree destroys uncommitted edits
    if in_place && !yes {
        println!(
            "{}",
            "Warning: this will overwrite files in your working directory!"
                .red()
                .bold()
        );
        print!("Continue? [y/N] ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Restore cancelled".yellow());
            return Ok(());
        }
    }

    repo.restore(digest, target)?;

    println!(
        "{} snapshot {} into {}",
        "Restored".green().bold(),
        util::short(digest).yellow(),
        target.display()
    );

    Ok(())
}
