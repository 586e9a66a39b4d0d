//! # FHIRSync CLI
//!
//! Command-line interface for running syncs against external FHIR sources.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;

mod commands;

use commands::sync::SyncCommand;

#[derive(Parser)]
#[command(name = "fhirsync")]
#[command(about = "Pull patients and observations from a FHIR server into local records")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync against a FHIR source
    Sync(SyncCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Sync(cmd) => cmd.execute().await,
    }
}
