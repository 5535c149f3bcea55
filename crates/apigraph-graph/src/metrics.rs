//! Derived metric sets written onto nodes.
//!
//! Every set always carries all of its properties plus a timestamp, so a
//! recomputation fully replaces the previous one.

use std::sync::Arc;

use apigraph_core::Properties;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::store::{ChildRollup, FactSchema, FactScope, FactTotals, GraphStore, NodeUpsert, RollupTotals};

/// Hour and revenue facts grouped per Project over `FOR_PROJECT`.
pub const PROJECT_FACTS: FactScope = FactScope::Entity {
    label: "Project",
    relationship: "FOR_PROJECT",
};

/// Hour facts grouped per User over `LOGGED_BY`.
pub const USER_FACTS: FactScope = FactScope::Entity {
    label: "User",
    relationship: "LOGGED_BY",
};

/// Project metrics rolled up per Customer over `HAS_PROJECT`.
pub const CUSTOMER_PROJECTS: ChildRollup = ChildRollup {
    parent_label: "Customer",
    relationship: "HAS_PROJECT",
    child_label: "Project",
    sum_properties: &["hoursWorked", "totalRevenue"],
};

impl FactTotals {
    pub fn non_billable_hours(&self) -> f64 {
        self.hours - self.billable_hours
    }

    pub fn margin(&self) -> f64 {
        self.revenue - self.cost
    }

    /// Margin as a percentage of revenue; 0 without revenue.
    pub fn margin_pct(&self) -> f64 {
        if self.revenue > 0.0 {
            round2(self.margin() / self.revenue * 100.0)
        } else {
            0.0
        }
    }

    /// Billable share of hours as a percentage; 0 without hours.
    pub fn billable_pct(&self) -> f64 {
        if self.hours > 0.0 {
            round2(self.billable_hours / self.hours * 100.0)
        } else {
            0.0
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Builders for the metric property sets.
pub struct MetricSet;

impl MetricSet {
    /// Metrics cached on a Year/Quarter/Month/Day node.
    pub fn period(totals: &FactTotals) -> Properties {
        let mut props = Properties::new();
        props.insert("totalHours".into(), json!(totals.hours));
        props.insert("billableHours".into(), json!(totals.billable_hours));
        props.insert("nonBillableHours".into(), json!(totals.non_billable_hours()));
        props.insert("totalRevenue".into(), json!(totals.revenue));
        props.insert("totalCost".into(), json!(totals.cost));
        props.insert("margin".into(), json!(totals.margin()));
        props.insert("marginPct".into(), json!(totals.margin_pct()));
        props.insert("billablePct".into(), json!(totals.billable_pct()));
        props.insert("uniqueUsers".into(), json!(totals.unique_users));
        props.insert("uniqueProjects".into(), json!(totals.unique_projects));
        props.insert("hourEntries".into(), json!(totals.hour_facts));
        props.insert("invoiceCount".into(), json!(totals.revenue_facts));
        props.insert("lastDenormalizedAt".into(), json!(timestamp()));
        props
    }

    pub fn project(totals: &FactTotals) -> Properties {
        let mut props = Properties::new();
        props.insert("hoursWorked".into(), json!(totals.hours));
        props.insert("billableHours".into(), json!(totals.billable_hours));
        props.insert("nonBillableHours".into(), json!(totals.non_billable_hours()));
        props.insert("totalRevenue".into(), json!(totals.revenue));
        props.insert("totalCost".into(), json!(totals.cost));
        props.insert("margin".into(), json!(totals.margin()));
        props.insert("marginPct".into(), json!(totals.margin_pct()));
        props.insert("billablePct".into(), json!(totals.billable_pct()));
        props.insert("lastMetricsUpdate".into(), json!(timestamp()));
        props
    }

    pub fn user_summary(totals: &FactTotals) -> Properties {
        let mut props = Properties::new();
        props.insert("totalHours".into(), json!(totals.hours));
        props.insert("billableHours".into(), json!(totals.billable_hours));
        props.insert("totalCost".into(), json!(totals.cost));
        props.insert("lastDenormalizedAt".into(), json!(timestamp()));
        props
    }

    /// Customer rollup from [`CUSTOMER_PROJECTS`] sums.
    pub fn customer_summary(rollup: &RollupTotals) -> Properties {
        let sum = |i: usize| rollup.sums.get(i).copied().unwrap_or(0.0);
        let mut props = Properties::new();
        props.insert("projectCount".into(), json!(rollup.children));
        props.insert("totalHours".into(), json!(sum(0)));
        props.insert("totalRevenue".into(), json!(sum(1)));
        props.insert("lastDenormalizedAt".into(), json!(timestamp()));
        props
    }
}

/// Per-project hour and revenue metrics.
pub struct ProjectMetrics {
    store: Arc<dyn GraphStore>,
    schema: FactSchema,
}

impl ProjectMetrics {
    pub fn new(store: Arc<dyn GraphStore>, schema: FactSchema) -> Self {
        Self { store, schema }
    }

    /// Recompute metrics for `projects`, or for every project when `None`.
    /// An empty list does nothing.
    pub async fn calculate(&self, projects: Option<&[String]>) -> StoreResult<usize> {
        if projects.is_some_and(|p| p.is_empty()) {
            return Ok(0);
        }

        let totals = self.store.fact_totals(PROJECT_FACTS, projects, &self.schema).await?;
        let updates: Vec<NodeUpsert> = totals
            .iter()
            .map(|(key, totals)| (key.clone(), MetricSet::project(totals)))
            .collect();

        let updated = self.store.set_properties("Project", "guid", &updates).await?;
        if updated < updates.len() {
            warn!(expected = updates.len(), updated, "Some projects disappeared during metrics update");
        }
        info!(projects = updated, "Project metrics calculated");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_and_percentages() {
        let totals = FactTotals {
            hours: 8.0,
            billable_hours: 6.0,
            cost: 400.0,
            revenue: 1000.0,
            ..FactTotals::default()
        };
        assert_eq!(totals.non_billable_hours(), 2.0);
        assert_eq!(totals.margin(), 600.0);
        assert_eq!(totals.margin_pct(), 60.0);
        assert_eq!(totals.billable_pct(), 75.0);
    }

    #[test]
    fn test_percentages_guard_zero_denominator() {
        let totals = FactTotals {
            cost: 50.0,
            ..FactTotals::default()
        };
        assert_eq!(totals.margin(), -50.0);
        assert_eq!(totals.margin_pct(), 0.0);
        assert_eq!(totals.billable_pct(), 0.0);
    }

    #[test]
    fn test_period_set_is_complete() {
        let props = MetricSet::period(&FactTotals::default());
        for name in [
            "totalHours",
            "billableHours",
            "nonBillableHours",
            "totalRevenue",
            "totalCost",
            "margin",
            "marginPct",
            "uniqueUsers",
            "uniqueProjects",
            "lastDenormalizedAt",
        ] {
            assert!(props.contains_key(name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_project_metrics_from_linked_facts() {
        use crate::store::memory::MemoryStore;
        use crate::store::{ForeignKeyLink, LinkDirection};

        let store = Arc::new(MemoryStore::new());
        let fact = |value: serde_json::Value| -> Properties { value.as_object().cloned().unwrap() };
        store.merge_node("Project", "p-1", &Properties::new()).await.unwrap();
        store.merge_node("Project", "p-2", &Properties::new()).await.unwrap();
        store
            .merge_node("WorkHour", "w-1", &fact(json!({"projectGuid": "p-1", "quantity": 3, "isBillable": true, "unitCost": 50})))
            .await
            .unwrap();
        store
            .merge_node("WorkHour", "w-2", &fact(json!({"projectGuid": "p-1", "quantity": 1, "isBillable": false, "unitCost": 50})))
            .await
            .unwrap();
        store
            .merge_node("Invoice", "i-1", &fact(json!({"projectGuid": "p-1", "totalAmount": 400})))
            .await
            .unwrap();
        for holder in ["WorkHour", "Invoice"] {
            let link = ForeignKeyLink {
                rel_type: "FOR_PROJECT",
                holder_label: holder,
                fk_property: "projectGuid",
                referenced_label: "Project",
                direction: LinkDirection::FromHolder,
            };
            store.link_by_foreign_key(&link).await.unwrap();
        }

        let metrics = ProjectMetrics::new(store.clone(), FactSchema::default());
        assert_eq!(metrics.calculate(Some(&[])).await.unwrap(), 0);
        assert_eq!(metrics.calculate(None).await.unwrap(), 2);

        let project = store.node("Project", "p-1").await.unwrap();
        assert_eq!(project["hoursWorked"].as_f64(), Some(4.0));
        assert_eq!(project["billableHours"].as_f64(), Some(3.0));
        assert_eq!(project["totalCost"].as_f64(), Some(200.0));
        assert_eq!(project["totalRevenue"].as_f64(), Some(400.0));
        assert_eq!(project["margin"].as_f64(), Some(200.0));
        assert_eq!(project["marginPct"].as_f64(), Some(50.0));
        assert_eq!(project["billablePct"].as_f64(), Some(75.0));
        assert!(project.contains_key("lastMetricsUpdate"));

        let idle = store.node("Project", "p-2").await.unwrap();
        assert_eq!(idle["hoursWorked"].as_f64(), Some(0.0));
    }

    #[test]
    fn test_customer_summary_reads_rollup_sums() {
        let rollup = RollupTotals {
            children: 2,
            sums: vec![12.5, 3000.0],
        };
        let props = MetricSet::customer_summary(&rollup);
        assert_eq!(props["projectCount"], json!(2));
        assert_eq!(props["totalHours"], json!(12.5));
        assert_eq!(props["totalRevenue"], json!(3000.0));
    }
}
