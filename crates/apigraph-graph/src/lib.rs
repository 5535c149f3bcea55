//! # apigraph graph
//!
//! Neo4j projection of remote records.
//!
//! Provides idempotent merge primitives over a [`GraphStore`], the
//! index/constraint migration, the Year/Quarter/Month/Day period index and
//! the metric denormalization that runs on top of it.

pub mod analytics;
pub mod client;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod schema;
pub mod store;

pub use analytics::{Denormalizer, PeriodIndex};
pub use client::{GraphClient, GraphConfig, GraphCounts};
pub use error::{validate_identifier, StoreError, StoreResult};
pub use merge::GraphWriter;
pub use metrics::{MetricSet, ProjectMetrics, CUSTOMER_PROJECTS, PROJECT_FACTS, USER_FACTS};
pub use schema::{EntitySchema, MigrationReport, SchemaMigration, SchemaStatement, StatementKind};
pub use store::{
    memory::{MemoryStore, NodeRef}, neo4j::Neo4jStore, ChildRollup, FactLinkOutcome, FactSchema, FactScope,
    FactTotals, ForeignKeyLink, GraphStore, HourFacts, IndexState, LinkDirection, LinkOutcome,
    NodeUpsert, RevenueFacts, RollupTotals,
};
