//! Pipeline errors. Any of these ends the run.

use std::error::Error as _;

use apigraph_client::ClientError;
use apigraph_core::{CoreError, SyncStage};
use apigraph_graph::StoreError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Authentication with the API failed")]
    AuthenticationFailed,

    #[error("Failed to fetch {entity}")]
    Fetch {
        entity: String,
        #[source]
        source: ClientError,
    },

    #[error("{stage} stage failed")]
    Store {
        stage: SyncStage,
        #[source]
        source: StoreError,
    },

    #[error("Stage {to} cannot run after {from}")]
    StageOrder { from: SyncStage, to: SyncStage },

    #[error("Invalid sync configuration: {0}")]
    Config(#[from] CoreError),
}

impl SyncError {
    pub fn store(stage: SyncStage, source: StoreError) -> Self {
        Self::Store { stage, source }
    }

    /// The error followed by each of its causes.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut source = self.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}
