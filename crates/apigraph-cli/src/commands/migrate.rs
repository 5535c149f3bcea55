//! `apigraph migrate`: constraints and indexes without a sync.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use apigraph_graph::{GraphStore, MemoryStore, Neo4jStore, SchemaMigration};
use apigraph_sync::catalog;
use clap::Args;

use super::args::GraphArgs;
use crate::output;

#[derive(Args)]
pub struct MigrateArgs {
    #[command(flatten)]
    pub graph: GraphArgs,

    /// Print the statements instead of running them
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(args: MigrateArgs) -> Result<ExitCode> {
    if args.dry_run {
        let migration = SchemaMigration::new(Arc::new(MemoryStore::new()), catalog::schema());
        output::print_plan(&migration.plan()?);
        return Ok(ExitCode::SUCCESS);
    }

    let store: Arc<dyn GraphStore> = Arc::new(Neo4jStore::connect(&args.graph.to_config()).await?);
    let migration = SchemaMigration::new(store.clone(), catalog::schema());
    let result = migration.run(false).await;
    store.close().await?;

    let report = result?;
    output::print_migration(&report);
    Ok(if report.is_clean() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
