//! The `GraphStore` seam.
//!
//! Every write the pipeline makes and every aggregate it reads goes
//! through this trait. [`neo4j::Neo4jStore`] runs it against a live
//! database; [`memory::MemoryStore`] keeps the same semantics in process.

pub mod memory;
pub mod neo4j;

use apigraph_core::{Period, PeriodLevel, Properties};
use async_trait::async_trait;

use crate::client::GraphCounts;
use crate::error::StoreResult;

/// `(key, properties)` for one node upsert.
pub type NodeUpsert = (String, Properties);

/// Which way a foreign-key relationship points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDirection {
    /// `(referenced)-[:REL]->(holder)`, e.g. `(Customer)-[:HAS_PROJECT]->(Project)`.
    FromReferenced,
    /// `(holder)-[:REL]->(referenced)`, e.g. `(Customer)-[:OWNED_BY]->(User)`.
    FromHolder,
}

/// A relationship resolved from a `<relation>Guid` property.
///
/// `holder_label` nodes carry `fk_property`; its value is matched against
/// the `guid` of `referenced_label` nodes. Missing endpoints are never created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKeyLink {
    pub rel_type: &'static str,
    pub holder_label: &'static str,
    pub fk_property: &'static str,
    pub referenced_label: &'static str,
    pub direction: LinkDirection,
}

impl ForeignKeyLink {
    pub fn describe(&self) -> String {
        match self.direction {
            LinkDirection::FromReferenced => format!(
                "({})-[:{}]->({})",
                self.referenced_label, self.rel_type, self.holder_label
            ),
            LinkDirection::FromHolder => format!(
                "({})-[:{}]->({})",
                self.holder_label, self.rel_type, self.referenced_label
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkOutcome {
    /// Holders whose referenced node exists; each now has the relationship.
    pub linked: usize,
    /// Holders whose foreign key matched no node.
    pub dangling: usize,
    /// A few of the unmatched keys, for logging.
    pub missing_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactLinkOutcome {
    pub linked: usize,
    /// Facts with no parseable date or no matching Month node.
    pub skipped: usize,
}

/// Hour facts: quantities logged against users and projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourFacts {
    pub label: &'static str,
    pub date_property: &'static str,
    pub quantity: &'static str,
    pub billable: &'static str,
    pub unit_cost: &'static str,
    pub user_key: &'static str,
    pub project_key: &'static str,
}

/// Revenue facts: billed amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevenueFacts {
    pub label: &'static str,
    pub date_property: &'static str,
    pub amount: &'static str,
}

/// Where fact properties live on the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactSchema {
    pub hours: HourFacts,
    pub revenue: RevenueFacts,
}

impl Default for FactSchema {
    fn default() -> Self {
        Self {
            hours: HourFacts {
                label: "WorkHour",
                date_property: "eventDate",
                quantity: "quantity",
                billable: "isBillable",
                unit_cost: "unitCost",
                user_key: "userGuid",
                project_key: "projectGuid",
            },
            revenue: RevenueFacts {
                label: "Invoice",
                date_property: "invoiceDate",
                amount: "totalAmount",
            },
        }
    }
}

/// Grouping used when totalling facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactScope {
    /// Per period node of one level, keyed by period `id`.
    ///
    /// Month uses facts linked by `RECORDED_IN`; Quarter and Year use the
    /// facts of every Month they contain; Day uses the facts of its Month
    /// whose date falls on that day.
    Period(PeriodLevel),
    /// Per entity node keyed by `guid`, over facts with a `relationship` edge to it.
    Entity {
        label: &'static str,
        relationship: &'static str,
    },
}

/// Raw sums over a group of facts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FactTotals {
    pub hours: f64,
    pub billable_hours: f64,
    pub cost: f64,
    pub revenue: f64,
    pub hour_facts: u64,
    pub revenue_facts: u64,
    pub unique_users: u64,
    pub unique_projects: u64,
}

/// Roll child metrics up to a parent over `(parent)-[:relationship]->(child)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRollup {
    pub parent_label: &'static str,
    pub relationship: &'static str,
    pub child_label: &'static str,
    /// Child properties to sum.
    pub sum_properties: &'static [&'static str],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollupTotals {
    pub children: u64,
    /// Sums in the order of [`ChildRollup::sum_properties`].
    pub sums: Vec<f64>,
}

/// An index that is not (yet) online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexState {
    pub name: String,
    pub state: String,
}

/// Abstract interface for every graph operation the sync pipeline needs.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Upsert one node keyed by `guid`. `null` properties are removed.
    async fn merge_node(&self, label: &str, key: &str, properties: &Properties) -> StoreResult<()>;

    /// Upsert several nodes in one transaction: all or nothing.
    async fn merge_nodes(&self, label: &str, nodes: &[NodeUpsert]) -> StoreResult<()>;

    /// Upsert period nodes keyed by `id` plus the CONTAINS edge from each
    /// period's parent. Parents must come before children.
    async fn merge_periods(&self, periods: &[Period]) -> StoreResult<usize>;

    async fn link_by_foreign_key(&self, link: &ForeignKeyLink) -> StoreResult<LinkOutcome>;

    /// MERGE `(fact)-[:RECORDED_IN]->(month)` from each fact's date property.
    async fn link_facts_to_months(&self, fact_label: &str, date_property: &str) -> StoreResult<FactLinkOutcome>;

    /// Fact sums per scope node, optionally restricted to `keys`.
    async fn fact_totals(
        &self,
        scope: FactScope,
        keys: Option<&[String]>,
        schema: &FactSchema,
    ) -> StoreResult<Vec<(String, FactTotals)>>;

    async fn child_rollups(
        &self,
        rollup: &ChildRollup,
        keys: Option<&[String]>,
    ) -> StoreResult<Vec<(String, RollupTotals)>>;

    /// `SET n += properties` on existing nodes; returns how many were found.
    async fn set_properties(
        &self,
        label: &str,
        key_property: &str,
        updates: &[NodeUpsert],
    ) -> StoreResult<usize>;

    /// Run one schema (index/constraint) statement.
    async fn apply_schema(&self, statement: &str) -> StoreResult<()>;

    async fn pending_indexes(&self) -> StoreResult<Vec<IndexState>>;

    async fn counts(&self) -> StoreResult<GraphCounts>;

    /// Release the connection. Later calls fail with [`crate::StoreError::Closed`].
    async fn close(&self) -> StoreResult<()>;
}
