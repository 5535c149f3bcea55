//! Client error taxonomy.

use apigraph_core::CoreError;
use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The API kept answering 401 after the one re-authentication a request is allowed.
    #[error("Unauthorized after re-authentication: {url}")]
    Unauthorized { url: String },

    /// 4xx other than 401/429; never retried.
    #[error("Request to {url} failed with status {status}: {body}")]
    PermanentRequest { status: u16, url: String, body: String },

    #[error("Max retries ({attempts}) exceeded for {url}: {last_error}")]
    MaxRetriesExceeded {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}
