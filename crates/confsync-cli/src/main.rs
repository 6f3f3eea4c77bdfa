//! confsync CLI
//!
//! Thin wrapper around confsync-core for inspecting and mutating a locally
//! persisted configuration namespace. The CLI always runs as the
//! authoritative context over a redb-backed local tier.
//!
//! ## Usage
//!
//! ```bash
//! # Show every key and its current value
//! confsync --defaults defaults.json list
//!
//! # Read one key
//! confsync --defaults defaults.json get theme
//!
//! # Write a key (the value parses as JSON, or falls back to a string)
//! confsync --defaults defaults.json set theme dark
//! confsync --defaults defaults.json set fontSize 16
//!
//! # Lock management
//! confsync --defaults defaults.json lock theme
//! confsync --defaults defaults.json unlock theme
//! confsync --defaults defaults.json locked
//!
//! # Restore every key to its default
//! confsync --defaults defaults.json reset
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use confsync_core::{
    ConfigOptions, ConfigStore, ContextRole, MessageHub, RedbStorage, StorageTiers,
};
use serde_json::Value;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// confsync - replicated configuration store
#[derive(Parser)]
#[command(name = "confsync")]
#[command(version = "0.1.0")]
#[command(about = "Inspect and mutate a persisted configuration namespace")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Data directory (default: platform data dir + confsync)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON file with the default value for every key
    #[arg(long, global = true)]
    defaults: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every key with its current value and lock state
    List,

    /// Read the current value of a key
    Get {
        /// The key to read
        key: String,
    },

    /// Write a new value for a key
    Set {
        /// The key to write
        key: String,
        /// New value; parsed as JSON, falling back to a plain string
        value: String,
    },

    /// Lock a key against writes
    Lock {
        /// The key to lock
        key: String,
    },

    /// Unlock a key
    Unlock {
        /// The key to unlock
        key: String,
    },

    /// Show the currently locked keys
    Locked,

    /// Restore every key to its default value
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => dirs::data_dir()
            .context("no platform data directory; pass --data-dir")?
            .join("confsync"),
    };
    let defaults = load_defaults(cli.defaults.as_deref())?;
    debug!(data_dir = %data_dir.display(), "using data directory");

    let hub = MessageHub::new();
    let storage = RedbStorage::new(data_dir.join("confsync.redb"))
        .with_context(|| format!("cannot open database in {}", data_dir.display()))?;
    let store = ConfigStore::authority(
        ConfigOptions::new(defaults),
        StorageTiers::local_only(Arc::new(storage)),
        Arc::new(hub.endpoint(ContextRole::Authority)?),
    )?;
    store.ready().await?;

    match cli.command {
        Commands::List => {
            let snapshot = store.snapshot();
            for (key, value) in &snapshot.values {
                let marker = if snapshot.locked_keys.contains(key) {
                    " [locked]"
                } else {
                    ""
                };
                println!("{key} = {value}{marker}");
            }
        }
        Commands::Get { key } => match store.get(&key) {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("unknown key: {key}"),
        },
        Commands::Set { key, value } => {
            let value = parse_value(&value);
            store.set(&key, value.clone()).await?;
            match store.get(&key) {
                Some(current) if current == value => println!("{key} = {current}"),
                Some(current) => println!("{key} = {current} (locked, write ignored)"),
                None => {}
            }
        }
        Commands::Lock { key } => {
            store.lock(&key).await?;
            println!("locked {key}");
        }
        Commands::Unlock { key } => {
            store.unlock(&key).await?;
            println!("unlocked {key}");
        }
        Commands::Locked => {
            for key in store.locked_keys() {
                println!("{key}");
            }
        }
        Commands::Reset => {
            store.reset().await?;
            println!("reset to defaults");
        }
    }

    store.shutdown();
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the default mapping from the given JSON file
fn load_defaults(path: Option<&std::path::Path>) -> Result<BTreeMap<String, Value>> {
    let path = path.context("--defaults <file> is required")?;
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read defaults file {}", path.display()))?;
    let defaults: BTreeMap<String, Value> = serde_json::from_str(&data)
        .with_context(|| format!("defaults file {} is not a JSON object", path.display()))?;
    anyhow::ensure!(!defaults.is_empty(), "defaults file defines no keys");
    Ok(defaults)
}

/// Parse a command-line value as JSON, falling back to a plain string
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_value_json() {
        assert_eq!(parse_value("16"), json!(16));
        assert_eq!(parse_value("true"), json!(true));
        assert_eq!(parse_value("[1,2]"), json!([1, 2]));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
    }

    #[test]
    fn test_parse_value_falls_back_to_string() {
        assert_eq!(parse_value("dark"), json!("dark"));
        assert_eq!(parse_value("not json {"), json!("not json {"));
    }
}
