//! `apigraph sync`: the full pipeline.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use apigraph_client::ApiClient;
use apigraph_graph::{GraphStore, MemoryStore, Neo4jStore};
use apigraph_sync::{catalog, SyncOrchestrator};
use clap::Args;
use colored::Colorize;
use tracing::{info, warn};

use super::args::{ApiArgs, GraphArgs, PipelineArgs};
use crate::output;

/// Exit code after Ctrl-C.
const INTERRUPTED: u8 = 130;

#[derive(Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub graph: GraphArgs,

    #[command(flatten)]
    pub pipeline: PipelineArgs,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: SyncArgs) -> Result<ExitCode> {
    let lookback_entities: Vec<&str> = catalog::entities()
        .iter()
        .filter(|e| e.date_filtered)
        .map(|e| e.name)
        .collect();
    let config = args.pipeline.to_config(&lookback_entities)?;
    let client = ApiClient::new(args.api.to_config()?)?;

    // A dry run never writes, so it never needs the database.
    let store: Arc<dyn GraphStore> = if config.dry_run {
        Arc::new(MemoryStore::new())
    } else {
        let graph = args.graph.to_config();
        info!(uri = %graph.uri, database = %graph.database, "Connecting to Neo4j");
        Arc::new(Neo4jStore::connect(&graph).await?)
    };

    let orchestrator = SyncOrchestrator::new(client, store.clone(), config)?;

    tokio::select! {
        outcome = orchestrator.run() => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                output::print_outcome(&outcome);
            }
            Ok(if outcome.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing graph store");
            if let Err(e) = store.close().await {
                warn!(error = %e, "Failed to close graph store");
            }
            eprintln!("{}", "Sync interrupted".yellow().bold());
            Ok(ExitCode::from(INTERRUPTED))
        }
    }
}
