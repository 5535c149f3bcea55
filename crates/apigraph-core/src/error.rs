//! Centralized error types for the shared model.

use thiserror::Error;

/// Errors raised while validating configuration or flattening records.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Record for '{label}' has no usable guid")]
    MissingKey { label: String },

    #[error("Invalid date '{value}': expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("Invalid period type '{0}': expected year, quarter, month or day")]
    InvalidPeriodType(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
