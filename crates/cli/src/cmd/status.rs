//! Show working-tree changes against the latest snapshot

use crate::util;
use anyhow::{Context, Result};
use capsy_core::Repository;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let repo_root = util::find_repo_root().context("Failed to find repository")?;

    let repo = Repository::open(&repo_root)?;
    let report = repo.status()?;

    tracing::debug!(
        added = report.added.len(),
        modified = report.modified.len(),
        removed = report.removed.len(),
        "computed working-tree status"
    );

    println!("{}", "Repository Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!(
        "Repository:  {}",
        repo_root.display().to_string().cyan()
    );

    match repo.store().head()? {
        Some(head) => {
            let snapshot = repo.graph().get(head)?;
            println!(
                "Latest:      {} {} ({})",
                util::short(head).yellow(),
                snapshot.message,
                util::format_relative_time(snapshot.ts_unix_ms).dimmed()
            );
        }
        None => println!("Latest:      {}", "no snapshots yet".dimmed()),
    }
    println!();

    if report.is_clean() {
        println!("{}", "Working tree clean".green());
        return Ok(());
    }

    println!("Changes since latest snapshot:");
    for path in &report.added {
        println!("  {}  {}", "added".green(), path.display());
    }
    for path in &report.modified {
        println!("  {}  {}", "modified".yellow(), path.display());
    }
    for path in &report.removed {
        println!("  {}  {}", "removed".red(), path.display());
    }
    println!();
    println!(
        "{} path(s) changed. Snapshot with {}",
        report.len(),
        "capsy cp <memo>".bold()
    );

    Ok(())
}
