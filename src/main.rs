//! Command-line interface for mongotap
//!
//! # Usage Examples
//!
//! ```bash
//! # Discover collections and print a catalog
//! mongotap --config config.json --discover > catalog.json
//!
//! # Extract selected streams, resuming from persisted state
//! mongotap --config config.json --catalog catalog.json --state state.json
//! ```
//!
//! Protocol messages (SCHEMA/RECORD/STATE) are written to stdout; logs go to
//! stderr. Set `RUST_LOG` to control log verbosity.

use clap::Parser;
use mongotap::{tap, TapConfig, TapError};
use singer::{Catalog, JsonLinesWriter, State};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mongotap")]
#[command(about = "Extract change data from MongoDB and DocumentDB as Singer messages")]
#[command(long_about = None)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, value_name = "PATH", env = "MONGOTAP_CONFIG")]
    config: PathBuf,

    /// Path to the catalog of streams to extract
    #[arg(long, value_name = "PATH")]
    catalog: Option<PathBuf>,

    /// Path to a persisted state document to resume from
    #[arg(long, value_name = "PATH")]
    state: Option<PathBuf>,

    /// Discover collections and print a catalog instead of extracting
    #[arg(long)]
    discover: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is reserved for protocol messages.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = TapConfig::load(&cli.config)?;
    config.validate()?;

    if cli.discover {
        let catalog = tap::run_discovery(&config).await?;
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    let catalog_path = cli.catalog.ok_or_else(|| {
        TapError::InvalidConfig("--catalog is required unless running with --discover".to_string())
    })?;
    let catalog = Catalog::from_json(&std::fs::read_to_string(&catalog_path)?)?;

    let state = match &cli.state {
        Some(path) => State::from_json(&std::fs::read_to_string(path)?)?,
        None => State::default(),
    };

    let stdout = std::io::stdout().lock();
    let mut writer = JsonLinesWriter::new(stdout);
    tap::run_sync(&config, catalog, state, &mut writer).await
}
