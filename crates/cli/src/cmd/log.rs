//! Show snapshot history

use crate::util;
use anyhow::{Context, Result};
use capsy_core::Repository;
use owo_colors::OwoColorize;

pub fn run(limit: Option<usize>) -> Result<()> {
    let repo_root = util::find_repo_root().context("Failed to find repository")?;

    let repo = Repository::open(&repo_root)?;
    let limit = limit.unwrap_or(20);

    tracing::debug!(snapshots = repo.graph().count(), limit, "listing history");

    println!("{}", "Snapshot History".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let Some(history) = repo.history(None)? else {
        println!("{}", "No snapshots yet".dimmed());
        return Ok(());
    };

    let mut shown = 0;
    let mut truncated = false;

    for item in history {
        if shown >= limit {
            truncated = true;
            break;
        }
        let (digest, snapshot) = item?;

        println!(
            "{} {} {}",
            util::short(digest).yellow(),
            snapshot.message,
            format!(
                "({}, {})",
                util::format_relative_time(snapshot.ts_unix_ms),
                util::format_absolute_time(snapshot.ts_unix_ms)
            )
            .dimmed()
        );
        shown += 1;
    }

    if truncated {
        println!();
        println!(
            "{}",
            format!("Showing {shown} snapshots; use --limit to see more").dimmed()
        );
    }

    Ok(())
}
