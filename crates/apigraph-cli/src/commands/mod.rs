//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod args;
pub mod migrate;
pub mod status;
pub mod sync;

/// Sync a paginated HTTP API into a Neo4j graph
#[derive(Parser)]
#[command(name = "apigraph")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Also write logs (without ANSI colors) to this file
    #[arg(long, global = true, env = "SYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full sync pipeline
    Sync(sync::SyncArgs),

    /// Show node and relationship counts
    Status(status::StatusArgs),

    /// Create constraints and indexes
    Migrate(migrate::MigrateArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<ExitCode> {
        match self.command {
            Commands::Sync(args) => sync::execute(args).await,
            Commands::Status(args) => status::execute(args).await,
            Commands::Migrate(args) => migrate::execute(args).await,
        }
    }
}
