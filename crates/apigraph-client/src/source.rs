//! The seam the sync pipeline ingests records through.

use apigraph_core::Record;
use async_trait::async_trait;

use crate::client::{ApiClient, QueryParams};
use crate::error::ClientResult;

/// A remote source of paginated records.
#[async_trait]
pub trait RecordSource: Send {
    /// Obtain credentials for later requests. Never errors; `false` means rejected.
    async fn authenticate(&mut self) -> bool;

    /// Fetch every record behind `endpoint`, following pagination to the end.
    async fn fetch_all(&mut self, endpoint: &str, params: &QueryParams) -> ClientResult<Vec<Record>>;
}

#[async_trait]
impl RecordSource for ApiClient {
    async fn authenticate(&mut self) -> bool {
        ApiClient::authenticate(self).await
    }

    async fn fetch_all(&mut self, endpoint: &str, params: &QueryParams) -> ClientResult<Vec<Record>> {
        ApiClient::fetch_all(self, endpoint, params).await
    }
}
