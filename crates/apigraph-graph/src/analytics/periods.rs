//! Year → Quarter → Month → Day nodes and the facts recorded in them.

use std::sync::Arc;

use apigraph_core::period::{day_range, hierarchy};
use apigraph_core::Period;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::store::{FactLinkOutcome, GraphStore};

/// Periods merged per store call.
const PERIOD_CHUNK: usize = 500;

pub struct PeriodIndex {
    store: Arc<dyn GraphStore>,
}

impl PeriodIndex {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Merge Year, Quarter and Month nodes for `[start_year, end_year]` with
    /// their CONTAINS edges. Safe to re-run.
    pub async fn build_hierarchy(&self, start_year: i32, end_year: i32) -> StoreResult<usize> {
        let periods = hierarchy(start_year, end_year);
        let merged = self.merge(&periods).await?;
        info!(start_year, end_year, periods = merged, "Period hierarchy built");
        Ok(merged)
    }

    /// Merge Day nodes for `[start, end]` under their existing Month nodes.
    pub async fn build_days(&self, start: NaiveDate, end: NaiveDate) -> StoreResult<usize> {
        let days = day_range(start, end);
        let merged = self.merge(&days).await?;
        info!(%start, %end, days = merged, "Day nodes built");
        Ok(merged)
    }

    async fn merge(&self, periods: &[Period]) -> StoreResult<usize> {
        let mut merged = 0;
        for chunk in periods.chunks(PERIOD_CHUNK) {
            merged += self.store.merge_periods(chunk).await?;
        }
        Ok(merged)
    }

    /// Link every `fact_label` node to the Month of its `date_property`.
    ///
    /// Facts whose Month node does not exist are skipped and counted.
    pub async fn link_facts_to_periods(&self, fact_label: &str, date_property: &str) -> StoreResult<FactLinkOutcome> {
        let outcome = self.store.link_facts_to_months(fact_label, date_property).await?;
        if outcome.skipped > 0 {
            warn!(fact_label, skipped = outcome.skipped, "Facts outside the period index were not linked");
        }
        info!(fact_label, linked = outcome.linked, "Facts linked to months");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use apigraph_core::Properties;
    use serde_json::json;

    #[tokio::test]
    async fn test_build_hierarchy_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let index = PeriodIndex::new(store.clone());

        assert_eq!(index.build_hierarchy(2025, 2025).await.unwrap(), 17);
        index.build_hierarchy(2025, 2025).await.unwrap();

        assert_eq!(store.node_count("Year").await, 1);
        assert_eq!(store.node_count("Quarter").await, 4);
        assert_eq!(store.node_count("Month").await, 12);
        assert_eq!(store.edge_count("CONTAINS").await, 16);
        assert!(store.has_edge("CONTAINS", ("Quarter", "2025-Q1"), ("Month", "2025-03")).await);
        assert!(store.has_edge("CONTAINS", ("Year", "2025"), ("Quarter", "2025-Q4")).await);

        let month = store.node("Month", "2025-01").await.unwrap();
        assert_eq!(month["yearMonth"], json!("2025-01"));
    }

    #[tokio::test]
    async fn test_days_hang_off_months() {
        let store = Arc::new(MemoryStore::new());
        let index = PeriodIndex::new(store.clone());
        index.build_hierarchy(2025, 2025).await.unwrap();

        let start = NaiveDate::from_ymd_opt(2025, 1, 30).unwrap();
        let end = NaiveDate::from_ymd_opt(2025, 2, 2).unwrap();
        assert_eq!(index.build_days(start, end).await.unwrap(), 4);
        assert!(store.has_edge("CONTAINS", ("Month", "2025-02"), ("Day", "2025-02-01")).await);
    }

    #[tokio::test]
    async fn test_link_facts_skips_missing_months() {
        let store = Arc::new(MemoryStore::new());
        let index = PeriodIndex::new(store.clone());
        index.build_hierarchy(2025, 2025).await.unwrap();

        let fact = |date: &str| -> Properties { json!({"eventDate": date}).as_object().cloned().unwrap() };
        store.merge_node("WorkHour", "w-1", &fact("2025-01-15")).await.unwrap();
        store.merge_node("WorkHour", "w-2", &fact("2019-06-01T08:00:00Z")).await.unwrap();
        store.merge_node("WorkHour", "w-3", &Properties::new()).await.unwrap();

        let outcome = index.link_facts_to_periods("WorkHour", "eventDate").await.unwrap();
        assert_eq!(outcome, FactLinkOutcome { linked: 1, skipped: 1 });
        assert!(store.has_edge("RECORDED_IN", ("WorkHour", "w-1"), ("Month", "2025-01")).await);
        assert_eq!(store.node_count("Month").await, 12);
    }
}
