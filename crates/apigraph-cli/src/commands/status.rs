//! `apigraph status`: what is in the graph right now.

use std::process::ExitCode;

use anyhow::Result;
use apigraph_graph::{GraphStore, Neo4jStore};
use clap::Args;

use super::args::GraphArgs;
use crate::output;

#[derive(Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub graph: GraphArgs,
}

pub async fn execute(args: StatusArgs) -> Result<ExitCode> {
    let store = Neo4jStore::connect(&args.graph.to_config()).await?;

    let result = async {
        let counts = store.counts().await?;
        let pending = store.pending_indexes().await?;
        Ok::<_, anyhow::Error>((counts, pending))
    }
    .await;
    store.close().await?;

    let (counts, pending) = result?;
    output::print_counts(&counts);
    output::print_pending_indexes(&pending);
    Ok(ExitCode::SUCCESS)
}
