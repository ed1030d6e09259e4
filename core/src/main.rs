//! Kodiak storage tool
//!
//! Inspects and replays the write-ahead log of an engine directory.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use kodiak_core::storage::WriteAheadLog;
use kodiak_core::{EngineConfig, StorageEngine};
use std::path::PathBuf;
use tracing_subscriber::{filter::EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "kodiak", version, about = "Inspect and replay a Kodiak storage directory")]
struct Cli {
    /// Engine data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// JSON engine config
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every logged operation
    Recover,
    /// Rebuild the index from the log and print engine statistics
    Replay,
    /// Rebuild the index and look up one key
    Get { key: i64 },
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }

    match cli.command {
        Command::Recover => {
            // Read-only: nothing is created when the directory or log is missing
            let wal_path = config.wal_path();
            let records = WriteAheadLog::read_records(&wal_path)?;
            println!(
                "{} {}",
                "WAL:".bright_blue(),
                wal_path.display().to_string().bright_cyan()
            );
            for (i, record) in records.iter().enumerate() {
                println!("{:>6}  {}", (i + 1).to_string().dimmed(), record);
            }
            println!("{} records", records.len().to_string().bright_green());
        }
        Command::Replay => {
            let (engine, summary) = StorageEngine::open_and_replay(config)?;
            let stats = engine.stats();
            println!("{}", "Replay complete".bright_green());
            println!("  Applied: {}", summary.applied.to_string().bright_cyan());
            println!("  Skipped: {}", summary.skipped.to_string().bright_yellow());
            println!("  Indexed entries: {}", stats.indexed_entries.to_string().bright_cyan());
            println!("  Tree height: {}", stats.tree_height.to_string().bright_cyan());
            println!("  Tree nodes: {}", stats.tree_nodes.to_string().bright_cyan());
            println!("  Buffer levels: {:?}", stats.buffer_levels);
        }
        Command::Get { key } => {
            let (engine, _) = StorageEngine::open_and_replay(config)?;
            match engine.lookup(key) {
                Some(row) => {
                    for (column, value) in &row {
                        println!("{}: {}", column.bright_cyan(), value);
                    }
                }
                None => println!("{} {}", "Not found:".bright_red(), key),
            }
        }
    }

    Ok(())
}
