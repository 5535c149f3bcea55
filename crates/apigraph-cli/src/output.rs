//! Terminal output formatting.

use apigraph_graph::{GraphCounts, IndexState, MigrationReport, SchemaStatement, StatementKind};
use apigraph_sync::SyncOutcome;
use colored::Colorize;

/// Print the result of a sync run.
pub fn print_outcome(outcome: &SyncOutcome) {
    let stats = &outcome.stats;
    println!();
    if outcome.success {
        println!("{}", "Sync complete".green().bold());
    } else {
        let stage = outcome
            .failed_stage
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!("{} {}", "Sync failed during".red().bold(), stage.red().bold());
        if let Some(error) = &outcome.error {
            println!("  {}", error);
        }
    }

    if !stats.entities.is_empty() {
        println!();
        println!("{:<16} {:>8} {:>8}", "Entity", "Synced", "Failed");
        println!("{}", "─".repeat(34));
        for (entity, counts) in &stats.entities {
            let failed = if counts.failed > 0 {
                counts.failed.to_string().red()
            } else {
                counts.failed.to_string().dimmed()
            };
            println!("{:<16} {:>8} {:>8}", entity, counts.synced, failed);
        }
    }

    if !stats.relationships.is_empty() {
        println!();
        println!("{:<24} {:>8} {:>9} {:>7}", "Relationship", "Linked", "Dangling", "Failed");
        println!("{}", "─".repeat(51));
        for (name, counts) in &stats.relationships {
            let dangling = if counts.dangling > 0 {
                counts.dangling.to_string().yellow()
            } else {
                counts.dangling.to_string().dimmed()
            };
            println!("{:<24} {:>8} {:>9} {:>7}", name, counts.linked, dangling, counts.failed);
        }
    }

    println!();
    println!("  Schema statements:     {}", stats.schema_statements);
    println!("  Projects with metrics: {}", stats.metrics_calculated);
    println!("  Periods merged:        {}", stats.periods_merged);
    println!("  Facts linked:          {}", stats.facts_linked);
    println!("  Periods denormalized:  {}", stats.periods_denormalized);
    println!("  Summaries:             {}", stats.summaries_denormalized);
    println!("  Elapsed:               {:.1}s", stats.elapsed.as_secs_f64());
}

/// Print node and relationship counts.
pub fn print_counts(counts: &GraphCounts) {
    println!("{}", "Graph status".bold());
    println!("{}", "─".repeat(30));
    println!("  Nodes:         {}", counts.nodes.to_string().cyan());
    println!("  Relationships: {}", counts.relationships.to_string().cyan());

    if !counts.labels.is_empty() {
        println!();
        for (label, count) in &counts.labels {
            println!("  {:<16} {:>8}", label, count);
        }
    }
}

pub fn print_pending_indexes(pending: &[IndexState]) {
    if pending.is_empty() {
        println!("\n{}", "All indexes online.".green());
        return;
    }
    println!("\n{}", "Indexes not online:".yellow().bold());
    for index in pending {
        println!("  {} ({})", index.name, index.state.yellow());
    }
}

/// Print the statements a migration would run.
pub fn print_plan(plan: &[SchemaStatement]) {
    for statement in plan {
        let kind = match statement.kind {
            StatementKind::Constraint => "constraint".magenta(),
            StatementKind::Index => "index".blue(),
        };
        println!("{:<11} {}", kind, statement.cypher);
    }
    println!("\n{} statements", plan.len());
}

pub fn print_migration(report: &MigrationReport) {
    let title = if report.is_clean() {
        "Schema migration complete".green().bold()
    } else {
        "Schema migration finished with errors".yellow().bold()
    };
    println!("{}", title);
    println!("  Constraints: {}", report.constraints_created);
    println!("  Indexes:     {}", report.indexes_created);

    for (name, error) in &report.errors {
        println!("  {} {}: {}", "✗".red(), name, error);
    }
    for (name, state) in &report.pending {
        println!("  {} {} is {}", "…".yellow(), name, state);
    }
}
