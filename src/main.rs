//! Harvester main entry point
//!
//! The crawl itself is driven from library code, since the processor is a
//! Rust function. This binary validates configuration files and inspects the
//! artifacts a crawl leaves behind: backlog snapshots and record databases.

use clap::{Parser, Subcommand};
use harvester::backlog::inspect_snapshot;
use harvester::config::{load_config_with_hash, Config};
use harvester::storage::{open_storage, Storage};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Harvester: a resumable, concurrent key crawler
#[derive(Parser, Debug)]
#[command(name = "harvester")]
#[command(version = "1.0.0")]
#[command(about = "Inspect harvester configuration, snapshots and records", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a TOML configuration file and print the effective settings
    Check {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Summarize a backlog snapshot
    Backlog {
        #[arg(value_name = "SNAPSHOT")]
        snapshot: PathBuf,
    },

    /// List keys and record counts in a record database
    Records {
        #[arg(value_name = "DATABASE")]
        database: PathBuf,

        /// Print the records of one key, given as JSON (e.g. '"a"' or 42)
        #[arg(long)]
        key: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Check { config } => handle_check(&config),
        Command::Backlog { snapshot } => handle_backlog(&snapshot),
        Command::Records { database, key } => handle_records(&database, key.as_deref()),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("harvester=info,warn"),
            1 => EnvFilter::new("harvester=debug,info"),
            2 => EnvFilter::new("harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles `check`: validates config and shows the settings a crawl would use
fn handle_check(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Loading configuration from: {}", path.display());
    let (config, hash) = match load_config_with_hash(path) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    print_config(&config);
    println!("\n✓ Configuration is valid (hash: {})", hash);

    Ok(())
}

fn print_config(config: &Config) {
    println!("=== Harvester Configuration ===\n");

    println!("Backlog:");
    println!("  Strategy: {}", config.backlog.strategy);
    println!("  Re-add limit: {}", config.backlog.re_add_limit);
    match &config.backlog.persist_to {
        Some(path) => println!("  Snapshot: {}", path.display()),
        None => println!("  Snapshot: (not persisted)"),
    }
    println!("  Resume: {}", config.backlog.resume);

    println!("\nCrawler:");
    println!("  Concurrency: {}", config.crawler.concurrency);
    println!("  Error policy: {}", config.crawler.error_policy);

    println!("\nStorage:");
    match &config.storage {
        Some(storage) => println!("  Database: {}", storage.database_path),
        None => println!("  Database: (none)"),
    }
}

/// Handles `backlog`: prints a summary of a snapshot file
fn handle_backlog(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let summary = inspect_snapshot(path)?;

    println!("=== Backlog Snapshot ===\n");
    println!("File: {}", path.display());
    println!("Strategy: {}", summary.strategy);
    println!("Re-add limit: {}", summary.re_add_limit);
    println!("Pending keys: {}", summary.pending);
    println!("Known keys: {}", summary.seen);
    println!("Re-added keys: {}", summary.re_added_keys);
    println!("Keys at re-add limit: {}", summary.exhausted_keys);

    if !summary.head.is_empty() {
        println!("\nNext pending keys:");
        for key in &summary.head {
            println!("  - {}", key);
        }
    }

    Ok(())
}

/// Handles `records`: lists stored keys, or the records of a single key
fn handle_records(path: &Path, key: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("database not found: {}", path.display()).into());
    }

    let storage = open_storage::<Value, Value>(path)?;

    if let Some(raw) = key {
        let key: Value = serde_json::from_str(raw)?;
        let records = storage.values(Some(&key))?;
        println!("{} record(s) for key {}", records.len(), key);
        for record in records {
            println!("{}", record);
        }
        return Ok(());
    }

    let keys = storage.keys()?;
    println!("=== Records in {} ===\n", path.display());
    println!("{:<40} {:>8}", "Key", "Records");
    println!("{}", "-".repeat(49));

    let mut total = 0;
    for key in &keys {
        let count = storage.count(key)?;
        total += count;
        println!("{:<40} {:>8}", key.to_string(), count);
    }

    println!("{}", "-".repeat(49));
    println!("{} key(s), {} record(s)", keys.len(), total);

    Ok(())
}
