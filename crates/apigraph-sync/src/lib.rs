//! # apigraph sync
//!
//! The pipeline that pulls every entity from the remote API and projects
//! it into the graph: AUTH → INDEX → REFERENCE → CORE_ENTITIES →
//! TRANSACTIONAL → RELATIONSHIPS → METRICS → ANALYTICS → SUMMARY.

pub mod catalog;
pub mod error;
pub mod orchestrator;

pub use catalog::{EntitySpec, RelationshipSpec};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{SyncOrchestrator, SyncOutcome};
