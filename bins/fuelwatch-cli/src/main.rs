use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fuelwatch_app::Dashboard;
use fuelwatch_core::{is_valid_value, FileStorage, SettingsStore};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Inspect and edit the fuel dashboard's persisted settings.
#[derive(Debug, Parser)]
#[command(name = "fuelwatch", version)]
struct Cli {
    /// Settings directory (defaults to the platform config directory)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every setting
    Show,
    /// Print one setting
    Get { key: String },
    /// Change one setting
    Set {
        key: String,
        value: String,
        /// Parse VALUE as JSON instead of storing it as a string
        #[arg(long)]
        json: bool,
    },
    /// Restore the defaults and delete the persisted snapshot
    Reset,
    /// Resolve a route fragment and record it as the active page
    Page { fragment: String },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let storage = match cli.dir {
        Some(dir) => FileStorage::new(dir),
        None => FileStorage::default_location()
            .context("No configuration directory on this platform; pass --dir")?,
    };
    tracing::debug!(dir = %storage.dir().display(), "Using settings directory");

    let dashboard = Dashboard::new(Arc::new(storage));
    let store = dashboard.store();

    // Report every change this invocation makes
    let _report = store.subscribe(|_, key, value| {
        println!("{key} = {value}");
    });

    match cli.command {
        Command::Show => {
            for (key, value) in store.snapshot() {
                let marker = if store.config().is_persisted(&key) {
                    ""
                } else {
                    "  (not persisted)"
                };
                println!("{key} = {value}{marker}");
            }
        }
        Command::Get { key } => match store.get(&key) {
            Some(value) => println!("{value}"),
            None => bail!("Unknown setting: {key}"),
        },
        Command::Set { key, value, json } => {
            let value = parse_value(&value, json)?;
            if !is_valid_value(&key, &value) {
                bail!("Invalid value for {key}: {value}");
            }
            if !store.set(&key, value) {
                println!("{key} unchanged");
            }
        }
        Command::Reset => {
            let changed = store.reset();
            println!("Restored defaults ({changed} changed)");
        }
        Command::Page { fragment } => {
            dashboard.router().navigate(&fragment);
        }
    }

    Ok(())
}

fn parse_value(raw: &str, json: bool) -> anyhow::Result<Value> {
    if json {
        serde_json::from_str(raw).with_context(|| format!("Invalid JSON value: {raw}"))
    } else {
        Ok(Value::from(raw))
    }
}
