//! # apigraph client
//!
//! HTTP ingestion client for the remote API: bearer-token
//! authentication, retry with exponential backoff, and cursor-following
//! pagination that accumulates complete result sets.

pub mod client;
pub mod error;
pub mod session;
pub mod source;

pub use client::{ApiClient, Page, QueryParams};
pub use error::{ClientError, ClientResult};
pub use session::AuthSession;
pub use source::RecordSource;
