//! Cached rollups on period, customer and user nodes.
//!
//! Each call recomputes the whole metric set of the nodes it covers.
//! `None` means every node of the kind; an empty key list does nothing.

use std::sync::Arc;

use apigraph_core::PeriodLevel;
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::metrics::{MetricSet, CUSTOMER_PROJECTS, USER_FACTS};
use crate::store::{FactSchema, FactScope, GraphStore, NodeUpsert};

pub struct Denormalizer {
    store: Arc<dyn GraphStore>,
    schema: FactSchema,
}

impl Denormalizer {
    pub fn new(store: Arc<dyn GraphStore>, schema: FactSchema) -> Self {
        Self { store, schema }
    }

    /// Recompute hour, revenue, cost and margin metrics on period nodes of `level`.
    pub async fn calculate_period_metrics(&self, level: PeriodLevel, periods: Option<&[String]>) -> StoreResult<usize> {
        if is_empty(periods) {
            debug!(%level, "No periods requested");
            return Ok(0);
        }

        let totals = self
            .store
            .fact_totals(FactScope::Period(level), periods, &self.schema)
            .await?;
        let updates: Vec<NodeUpsert> = totals
            .iter()
            .map(|(id, totals)| (id.clone(), MetricSet::period(totals)))
            .collect();

        let updated = self.store.set_properties(level.label(), "id", &updates).await?;
        info!(%level, periods = updated, "Period metrics denormalized");
        Ok(updated)
    }

    /// Recompute every level, finest first.
    pub async fn calculate_all_period_metrics(&self, include_days: bool) -> StoreResult<usize> {
        let mut levels = vec![PeriodLevel::Month, PeriodLevel::Quarter, PeriodLevel::Year];
        if include_days {
            levels.insert(0, PeriodLevel::Day);
        }

        let mut total = 0;
        for level in levels {
            total += self.calculate_period_metrics(level, None).await?;
        }
        Ok(total)
    }

    /// `projectCount`, `totalHours` and `totalRevenue` from each customer's projects.
    pub async fn denormalize_customer_summaries(&self, customers: Option<&[String]>) -> StoreResult<usize> {
        if is_empty(customers) {
            return Ok(0);
        }

        let rollups = self.store.child_rollups(&CUSTOMER_PROJECTS, customers).await?;
        let updates: Vec<NodeUpsert> = rollups
            .iter()
            .map(|(key, rollup)| (key.clone(), MetricSet::customer_summary(rollup)))
            .collect();

        let updated = self
            .store
            .set_properties(CUSTOMER_PROJECTS.parent_label, "guid", &updates)
            .await?;
        info!(customers = updated, "Customer summaries denormalized");
        Ok(updated)
    }

    /// `totalHours`, `billableHours` and `totalCost` from each user's logged hours.
    pub async fn denormalize_user_summaries(&self, users: Option<&[String]>) -> StoreResult<usize> {
        if is_empty(users) {
            return Ok(0);
        }

        let totals = self.store.fact_totals(USER_FACTS, users, &self.schema).await?;
        let updates: Vec<NodeUpsert> = totals
            .iter()
            .map(|(key, totals)| (key.clone(), MetricSet::user_summary(totals)))
            .collect();

        let updated = self.store.set_properties("User", "guid", &updates).await?;
        info!(users = updated, "User summaries denormalized");
        Ok(updated)
    }
}

fn is_empty(keys: Option<&[String]>) -> bool {
    keys.is_some_and(|k| k.is_empty())
}
