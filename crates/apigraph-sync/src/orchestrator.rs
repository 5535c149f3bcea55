//! Runs the sync stages in order against a record source and a graph store.

use std::sync::Arc;
use std::time::Instant;

use apigraph_client::{QueryParams, RecordSource};
use apigraph_core::record::project_record;
use apigraph_core::{Record, RunStats, SyncConfig, SyncStage};
use apigraph_graph::{
    Denormalizer, FactSchema, GraphStore, GraphWriter, NodeUpsert, PeriodIndex, ProjectMetrics, SchemaMigration,
};
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::{self, EntitySpec, RelationshipSpec};
use crate::error::{SyncError, SyncResult};

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub success: bool,
    pub stats: RunStats,
    /// Stage that was running when the run failed.
    pub failed_stage: Option<SyncStage>,
    pub error: Option<String>,
}

/// Enforces forward-only stage transitions. Skipping a stage is allowed,
/// running one twice or going back is not.
#[derive(Debug, Default)]
struct StageTracker {
    current: Option<SyncStage>,
}

impl StageTracker {
    fn enter(&mut self, stage: SyncStage) -> SyncResult<()> {
        if let Some(current) = self.current {
            if stage <= current {
                return Err(SyncError::StageOrder { from: current, to: stage });
            }
        }
        self.current = Some(stage);
        info!("{}", "=".repeat(60));
        info!(stage = %stage, "STAGE {}/{}: {}", stage.step(), SyncStage::ALL.len(), stage);
        info!("{}", "=".repeat(60));
        Ok(())
    }

    fn current(&self) -> Option<SyncStage> {
        self.current
    }
}

pub struct SyncOrchestrator<S: RecordSource> {
    source: S,
    store: Arc<dyn GraphStore>,
    writer: GraphWriter,
    config: SyncConfig,
    entities: Vec<EntitySpec>,
    relationships: Vec<RelationshipSpec>,
    facts: FactSchema,
    today: NaiveDate,
    tracker: StageTracker,
    stats: RunStats,
}

impl<S: RecordSource> SyncOrchestrator<S> {
    pub fn new(source: S, store: Arc<dyn GraphStore>, config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            source,
            writer: GraphWriter::new(store.clone()),
            store,
            config,
            entities: catalog::entities(),
            relationships: catalog::relationships(),
            facts: FactSchema::default(),
            today: Utc::now().date_naive(),
            tracker: StageTracker::default(),
            stats: RunStats::default(),
        })
    }

    /// Reference date for lookback windows. Defaults to the current UTC date.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run every stage and close the store, whatever the outcome.
    pub async fn run(mut self) -> SyncOutcome {
        let started = Instant::now();
        info!("{}", "=".repeat(60));
        info!(dry_run = self.config.dry_run, "STARTING SYNC");

        let result = self.run_stages().await;
        self.stats.elapsed = started.elapsed();

        let (failed_stage, error) = match result {
            Ok(()) => (None, None),
            Err(e) => {
                let stage = self.tracker.current();
                error!(stage = ?stage, error = %e.report(), "Sync failed");
                (stage, Some(e.report()))
            }
        };

        self.summary(error.is_none());
        let outcome = SyncOutcome {
            success: error.is_none(),
            stats: self.stats.clone(),
            failed_stage,
            error,
        };

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close graph store");
        }
        outcome
    }

    async fn run_stages(&mut self) -> SyncResult<()> {
        self.enter(SyncStage::Auth)?;
        if !self.source.authenticate().await {
            return Err(SyncError::AuthenticationFailed);
        }
        self.complete(SyncStage::Auth);

        if self.config.dry_run {
            info!("Dry run: authentication verified, skipping all writes");
            return Ok(());
        }

        if self.config.create_indexes {
            self.enter(SyncStage::Index)?;
            self.create_indexes().await?;
            self.complete(SyncStage::Index);
        }

        self.enter(SyncStage::Reference)?;
        for spec in self.entities_in(SyncStage::Reference) {
            self.sync_reference(&spec).await?;
        }
        self.complete(SyncStage::Reference);

        for stage in [SyncStage::CoreEntities, SyncStage::Transactional] {
            self.enter(stage)?;
            for spec in self.entities_in(stage) {
                self.sync_records(&spec).await?;
            }
            self.complete(stage);
        }

        self.enter(SyncStage::Relationships)?;
        self.link_relationships().await?;
        self.complete(SyncStage::Relationships);

        if self.config.enable_metrics {
            self.enter(SyncStage::Metrics)?;
            let metrics = ProjectMetrics::new(self.store.clone(), self.facts);
            self.stats.metrics_calculated = metrics
                .calculate(None)
                .await
                .map_err(|e| SyncError::store(SyncStage::Metrics, e))?;
            self.complete(SyncStage::Metrics);
        }

        if self.config.enable_analytics {
            self.enter(SyncStage::Analytics)?;
            self.run_analytics()
                .await
                .map_err(|e| SyncError::store(SyncStage::Analytics, e))?;
            self.complete(SyncStage::Analytics);
        }

        Ok(())
    }

    fn enter(&mut self, stage: SyncStage) -> SyncResult<()> {
        self.tracker.enter(stage)
    }

    fn complete(&mut self, stage: SyncStage) {
        self.stats.stages_completed.push(stage);
        debug!(stage = %stage, "Stage complete");
    }

    fn entities_in(&self, stage: SyncStage) -> Vec<EntitySpec> {
        self.entities.iter().filter(|e| e.stage == stage).copied().collect()
    }

    async fn create_indexes(&mut self) -> SyncResult<()> {
        let migration = SchemaMigration::new(self.store.clone(), catalog::schema());
        let report = migration
            .run(false)
            .await
            .map_err(|e| SyncError::store(SyncStage::Index, e))?;

        self.stats.schema_statements = report.applied();
        for (name, message) in &report.errors {
            warn!(name = %name, error = %message, "Schema statement skipped");
        }
        Ok(())
    }

    fn params_for(&self, spec: &EntitySpec) -> QueryParams {
        let mut params = QueryParams::new();
        if spec.date_filtered {
            let window = self.config.lookback_window(spec.name, self.today);
            info!(entity = spec.label, start = %window.start, end = %window.end, "Lookback window");
            params.insert("startDate".into(), window.start.format("%Y-%m-%d").to_string());
            params.insert("endDate".into(), window.end.format("%Y-%m-%d").to_string());
        }
        params
    }

    async fn fetch(&mut self, spec: &EntitySpec) -> SyncResult<Vec<Record>> {
        let params = self.params_for(spec);
        info!(entity = spec.label, endpoint = spec.endpoint, "Fetching records");
        let records = self
            .source
            .fetch_all(spec.endpoint, &params)
            .await
            .map_err(|source| SyncError::Fetch {
                entity: spec.label.to_string(),
                source,
            })?;
        info!(entity = spec.label, count = records.len(), "Records fetched");
        Ok(records)
    }

    /// Reference data is small and merged in batches; a failing batch ends the run.
    async fn sync_reference(&mut self, spec: &EntitySpec) -> SyncResult<()> {
        let records = self.fetch(spec).await?;

        let mut items: Vec<NodeUpsert> = Vec::with_capacity(records.len());
        for record in &records {
            match project_record(spec.label, record, spec.fields, spec.references) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(entity = spec.label, error = %e, "Skipping record");
                    self.stats.record_failed(spec.label);
                }
            }
        }

        let merged = self
            .writer
            .batch_merge_nodes(spec.label, &items, self.config.batch_size)
            .await
            .map_err(|e| SyncError::store(SyncStage::Reference, e))?;
        self.stats.record_synced_count(spec.label, merged);
        Ok(())
    }

    /// Merge records one by one; a rejected record is counted and skipped.
    /// Losing the store ends the run.
    async fn sync_records(&mut self, spec: &EntitySpec) -> SyncResult<()> {
        let records = self.fetch(spec).await?;

        for record in &records {
            let (key, properties) = match project_record(spec.label, record, spec.fields, spec.references) {
                Ok(item) => item,
                Err(e) => {
                    warn!(entity = spec.label, error = %e, "Skipping record");
                    self.stats.record_failed(spec.label);
                    continue;
                }
            };

            match self.writer.merge_node(spec.label, &key, &properties).await {
                Ok(()) => self.stats.record_synced(spec.label),
                Err(e) if e.is_connectivity() => return Err(SyncError::store(spec.stage, e)),
                Err(_) => self.stats.record_failed(spec.label),
            }
        }

        let counts = self.stats.entity(spec.label);
        info!(entity = spec.label, synced = counts.synced, failed = counts.failed, "Entity synced");
        Ok(())
    }

    async fn link_relationships(&mut self) -> SyncResult<()> {
        for rel in &self.relationships {
            match self.writer.link(&rel.link).await {
                Ok(outcome) => self.stats.record_link(rel.name, outcome.linked, outcome.dangling),
                Err(e) if e.is_connectivity() => return Err(SyncError::store(SyncStage::Relationships, e)),
                Err(_) => self.stats.record_link_failed(rel.name),
            }
        }
        Ok(())
    }

    async fn run_analytics(&mut self) -> apigraph_graph::StoreResult<()> {
        let index = PeriodIndex::new(self.store.clone());
        let (start_year, end_year) = (self.config.period_start_year, self.config.period_end_year);
        self.stats.periods_merged = index.build_hierarchy(start_year, end_year).await?;

        if self.config.build_day_nodes {
            if let Some((first, last)) = year_bounds(start_year, end_year) {
                self.stats.periods_merged += index.build_days(first, last).await?;
            }
        }

        let facts = self.facts;
        for (label, date_property) in [
            (facts.hours.label, facts.hours.date_property),
            (facts.revenue.label, facts.revenue.date_property),
        ] {
            let outcome = index.link_facts_to_periods(label, date_property).await?;
            self.stats.facts_linked += outcome.linked;
        }

        let denormalizer = Denormalizer::new(self.store.clone(), facts);
        self.stats.periods_denormalized = denormalizer
            .calculate_all_period_metrics(self.config.build_day_nodes)
            .await?;
        self.stats.summaries_denormalized = denormalizer.denormalize_customer_summaries(None).await?
            + denormalizer.denormalize_user_summaries(None).await?;
        Ok(())
    }

    /// Log the run statistics. Never fails.
    fn summary(&mut self, success: bool) {
        if self.tracker.enter(SyncStage::Summary).is_err() {
            debug!("Summary stage already entered");
        }
        let stats = &self.stats;

        for (entity, counts) in &stats.entities {
            info!(entity = %entity, synced = counts.synced, failed = counts.failed, "Entity totals");
        }
        for (relationship, counts) in &stats.relationships {
            info!(
                relationship = %relationship,
                linked = counts.linked,
                dangling = counts.dangling,
                failed = counts.failed,
                "Relationship totals"
            );
        }
        info!(
            synced = stats.total_synced(),
            failed = stats.total_failed(),
            relationships = stats.relationships_linked(),
            metrics = stats.metrics_calculated,
            periods = stats.periods_denormalized,
            elapsed_secs = stats.elapsed.as_secs_f64(),
            "SYNC {}",
            if success { "COMPLETE" } else { "FAILED" }
        );
        info!("{}", "=".repeat(60));
        self.complete(SyncStage::Summary);
    }
}

fn year_bounds(start_year: i32, end_year: i32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(start_year, 1, 1)?;
    let last = NaiveDate::from_ymd_opt(end_year, 12, 31)?;
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_allows_skipping_forward() {
        let mut tracker = StageTracker::default();
        tracker.enter(SyncStage::Auth).unwrap();
        tracker.enter(SyncStage::Reference).unwrap();
        tracker.enter(SyncStage::Summary).unwrap();
        assert_eq!(tracker.current(), Some(SyncStage::Summary));
    }

    #[test]
    fn test_tracker_rejects_reentry_and_going_back() {
        let mut tracker = StageTracker::default();
        tracker.enter(SyncStage::CoreEntities).unwrap();

        let err = tracker.enter(SyncStage::CoreEntities).unwrap_err();
        assert!(matches!(
            err,
            SyncError::StageOrder { from: SyncStage::CoreEntities, to: SyncStage::CoreEntities }
        ));
        assert!(tracker.enter(SyncStage::Auth).is_err());
        assert_eq!(tracker.current(), Some(SyncStage::CoreEntities));
    }

    #[test]
    fn test_year_bounds() {
        let (first, last) = year_bounds(2024, 2025).unwrap();
        assert_eq!(first.to_string(), "2024-01-01");
        assert_eq!(last.to_string(), "2025-12-31");
    }
}
