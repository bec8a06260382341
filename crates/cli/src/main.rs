//! Capsy CLI - capsy command

use anyhow::Result;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::path::PathBuf;

mod cmd;
mod util;

/// Capsy - content-addressed snapshots for any directory
#[derive(Parser)]
#[command(name = "capsy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a capsy repository in the current directory
    Init,
    /// Capture the working tree as a new snapshot
    Cp {
        /// Snapshot memo
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Record an end-of-day snapshot, even with no changes
    Day {
        /// End-of-day memo
        #[arg(required = true)]
        memo: Vec<String>,
    },
    /// Show working-tree changes against the latest snapshot
    Status,
    /// Show snapshot history
    Log {
        /// Number of snapshots to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Restore a snapshot into the working tree or another directory
    Restore {
        /// Snapshot digest or unique prefix (at least 4 characters)
        snapshot: String,
        /// Restore into this directory instead of the working tree
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init => cmd::init::run(),
        Commands::Cp { message } => cmd::cp::run(&message.join(" ")),
        Commands::Day { memo } => cmd::day::run(&memo.join(" ")),
        Commands::Status => cmd::status::run(),
        Commands::Log { limit } => cmd::log::run(limit),
        Commands::Restore {
            snapshot,
            dest,
            yes,
        } => cmd::restore::run(&snapshot, dest.as_deref(), yes),
    };

    if let Err(err) = result {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        std::process::exit(exit_code(&err));
    }
}

/// Map core failures to distinct process exit codes
fn exit_code(err: &anyhow::Error) -> i32 {
    use capsy_core::Error;

    match err.downcast_ref::<Error>() {
        Some(Error::NotFound(_)) => 2,
        Some(Error::AlreadyInitialized(_)) => 3,
        Some(Error::NotInitialized(_)) => 4,
        Some(Error::InvalidParent(_)) => 5,
        Some(Error::NothingToCommit) => 6,
        Some(Error::CaptureFailed { .. }) => 7,
        Some(Error::CorruptRepository(_)) => 8,
        _ => 1,
    }
}
