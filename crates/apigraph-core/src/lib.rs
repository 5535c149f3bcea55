//! # apigraph core
//!
//! Shared model for the API-to-graph sync: remote records and their
//! flattening rules, the time-period index, pipeline stages, run
//! statistics, configuration and the common error type.

pub mod config;
pub mod error;
pub mod period;
pub mod record;
pub mod stage;
pub mod stats;

pub use config::{ApiConfig, Credentials, CursorLocation, LookbackWindow, PaginationConfig, SyncConfig};
pub use error::{CoreError, CoreResult};
pub use period::{Period, PeriodLevel};
pub use record::{extract_foreign_key, FieldMapping, ForeignReference, Properties, Record, KEY_FIELD};
pub use stage::SyncStage;
pub use stats::{EntityCounts, LinkCounts, RunStats};
