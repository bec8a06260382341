//! Initialize a capsy repository

use anyhow::{Context, Result};
use capsy_core::Repository;
use owo_colors::OwoColorize;

pub fn run() -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    tracing::debug!(root = %cwd.display(), "initializing repository");

    Repository::init(&cwd)?;

    println!(
        "{} capsy repository in {}",
        "Initialized".green().bold(),
        cwd.join(".capsy").display().to_string().cyan()
    );
    println!();
    println!("Next: create a snapshot with {}", "capsy cp <memo>".bold());

    Ok(())
}
