//! # tidekv CLI
//!
//! Run with: `cargo run --bin tidekv -- --data-dir ./data put user:1 alice`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tidekv_core::utils::{display_key, format_bytes};
use tidekv_core::{Config, StorageConfig};
use tidekv_storage::Db;

#[derive(Parser)]
#[command(name = "tidekv")]
#[command(about = "tidekv - embedded LSM key-value store")]
struct Cli {
    /// Data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// TOML config file with a [storage] table
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write one key
    Put { key: String, value: String },
    /// Read one key
    Get { key: String },
    /// Write `count` generated keys
    Load {
        #[arg(long, default_value_t = 10_000)]
        count: u64,
        #[arg(long, default_value_t = 100)]
        value_size: usize,
    },
    /// Flush buffered writes to SSTables
    Flush,
    /// Print levels, tables and counters
    Stats,
    /// Print every flushed entry in key order
    Dump {
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn storage_config(cli: &Cli) -> Result<StorageConfig> {
    let mut storage = match &cli.config {
        Some(path) => {
            Config::load(path)
                .with_context(|| format!("loading {}", path.display()))?
                .storage
        }
        None => StorageConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        storage.data_dir = dir.clone();
    }
    Ok(storage)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = storage_config(&cli)?;
    info!("Data directory: {:?}", config.data_dir);
    let db = Db::open(config).context("opening database")?;

    match cli.command {
        Commands::Put { key, value } => {
            db.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Get { key } => match db.get(key.as_bytes()) {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(not found)"),
        },
        Commands::Load { count, value_size } => {
            let value = vec![b'v'; value_size];
            for n in 0..count {
                db.put(format!("key_{:010}", n).as_bytes(), &value)?;
            }
            db.flush()?;
            println!(
                "Loaded {} keys ({})",
                count,
                format_bytes(count * (14 + value_size as u64))
            );
        }
        Commands::Flush => {
            db.flush()?;
            println!("Flushed, manifest version {}", db.manifest().version());
        }
        Commands::Stats => {
            let stats = db.stats();
            println!("manifest version : {}", stats.manifest_version);
            println!("max sst id       : {}", stats.max_sst_id);
            for level in &stats.levels {
                println!(
                    "level {:<2}         : {:>10}  tables {:?}",
                    level.level,
                    format_bytes(level.bytes),
                    level.table_ids
                );
            }
            println!(
                "active memtable  : {} entries, {}",
                stats.active_memtable_entries,
                format_bytes(stats.active_memtable_bytes as u64)
            );
            println!(
                "pending flushes  : {} ({})",
                stats.pending_flushes,
                format_bytes(stats.frozen_memtable_bytes as u64)
            );
            if let Some(reason) = &stats.worker_halted {
                println!("worker halted    : {}", reason);
            }
            println!("{:#?}", stats.metrics);
        }
        Commands::Dump { limit } => {
            let manifest = db.manifest();
            for (key, value) in manifest.iter().take(limit.unwrap_or(usize::MAX)) {
                println!("{} = {}", display_key(key), String::from_utf8_lossy(value));
            }
        }
    }

    db.close()?;
    Ok(())
}
