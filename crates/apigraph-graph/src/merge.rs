//! Idempotent upsert primitives keyed by `guid`.
//!
//! Persistence failures are logged with their label and key, then
//! returned to the caller. Dangling foreign keys are not failures: they
//! are counted and logged.

use std::sync::Arc;

use apigraph_core::Properties;
use tracing::{debug, error, info, warn};

use crate::error::{validate_identifier, StoreResult};
use crate::store::{ForeignKeyLink, GraphStore, LinkOutcome, NodeUpsert};

/// Write side of the graph used by the sync stages.
#[derive(Clone)]
pub struct GraphWriter {
    store: Arc<dyn GraphStore>,
}

impl GraphWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    /// Create or update one node. Re-running with the same input is a no-op;
    /// the last write wins for every attribute it carries.
    pub async fn merge_node(&self, label: &str, key: &str, properties: &Properties) -> StoreResult<()> {
        validate_identifier(label)?;
        match self.store.merge_node(label, key, properties).await {
            Ok(()) => {
                debug!(label, key, "Node merged");
                Ok(())
            }
            Err(e) => {
                error!(label, key, error = %e, "Failed to merge node");
                Err(e)
            }
        }
    }

    /// Merge `items` in chunks of `batch_size`, each chunk in its own transaction.
    ///
    /// Returns the number of items submitted. A failing chunk aborts the
    /// call; chunks before it stay committed.
    pub async fn batch_merge_nodes(&self, label: &str, items: &[NodeUpsert], batch_size: usize) -> StoreResult<usize> {
        validate_identifier(label)?;
        let batch_size = batch_size.max(1);

        for (index, chunk) in items.chunks(batch_size).enumerate() {
            if let Err(e) = self.store.merge_nodes(label, chunk).await {
                let first_key = chunk.first().map(|(key, _)| key.as_str()).unwrap_or_default();
                error!(
                    label,
                    batch = index + 1,
                    size = chunk.len(),
                    first_key,
                    error = %e,
                    "Batch merge failed"
                );
                return Err(e);
            }
            debug!(label, batch = index + 1, size = chunk.len(), "Batch merged");
        }

        info!(label, count = items.len(), "Batch merge complete");
        Ok(items.len())
    }

    /// Create a relationship for every holder whose foreign key resolves.
    pub async fn link(&self, link: &ForeignKeyLink) -> StoreResult<LinkOutcome> {
        let outcome = match self.store.link_by_foreign_key(link).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(relationship = %link.describe(), error = %e, "Failed to create relationships");
                return Err(e);
            }
        };

        if outcome.dangling > 0 {
            warn!(
                relationship = %link.describe(),
                dangling = outcome.dangling,
                sample = ?outcome.missing_keys,
                "Foreign keys reference missing nodes"
            );
        }
        info!(relationship = %link.describe(), linked = outcome.linked, "Relationships linked");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::store::LinkDirection;
    use crate::StoreError;
    use serde_json::{json, Value};

    fn props(value: Value) -> Properties {
        value.as_object().cloned().unwrap()
    }

    fn writer() -> (Arc<MemoryStore>, GraphWriter) {
        let store = Arc::new(MemoryStore::new());
        let writer = GraphWriter::new(store.clone());
        (store, writer)
    }

    #[tokio::test]
    async fn test_merge_node_is_idempotent() {
        let (store, writer) = writer();
        let attrs = props(json!({"name": "Acme", "ownerGuid": "u-9"}));
        writer.merge_node("Customer", "c-1", &attrs).await.unwrap();
        writer.merge_node("Customer", "c-1", &attrs).await.unwrap();

        assert_eq!(store.node_count("Customer").await, 1);
        assert_eq!(store.node("Customer", "c-1").await.unwrap()["ownerGuid"], json!("u-9"));
    }

    #[tokio::test]
    async fn test_merge_node_rejects_bad_label() {
        let (_, writer) = writer();
        let err = writer.merge_node("Customer:Admin", "c-1", &Properties::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn test_batch_merge_counts_submitted_items() {
        let (store, writer) = writer();
        let items: Vec<NodeUpsert> = (0..7)
            .map(|i| (format!("bu-{i}"), props(json!({"name": format!("Unit {i}")}))))
            .collect();

        let count = writer.batch_merge_nodes("BusinessUnit", &items, 3).await.unwrap();
        assert_eq!(count, 7);
        assert_eq!(store.node_count("BusinessUnit").await, 7);
    }

    #[tokio::test]
    async fn test_batch_merge_failure_keeps_earlier_chunks() {
        let (store, writer) = writer();
        store.fail_node("BusinessUnit", "bu-4").await;
        let items: Vec<NodeUpsert> = (0..6).map(|i| (format!("bu-{i}"), Properties::new())).collect();

        assert!(writer.batch_merge_nodes("BusinessUnit", &items, 3).await.is_err());
        // First chunk committed, second rolled back as a whole.
        assert_eq!(store.node_count("BusinessUnit").await, 3);
        assert!(store.node("BusinessUnit", "bu-3").await.is_none());
    }

    #[tokio::test]
    async fn test_link_tolerates_dangling_keys() {
        let (store, writer) = writer();
        writer
            .merge_node("WorkHour", "w-1", &props(json!({"userGuid": "ghost"})))
            .await
            .unwrap();

        let link = ForeignKeyLink {
            rel_type: "LOGGED_BY",
            holder_label: "WorkHour",
            fk_property: "userGuid",
            referenced_label: "User",
            direction: LinkDirection::FromHolder,
        };
        let outcome = writer.link(&link).await.unwrap();
        assert_eq!(outcome.linked, 0);
        assert_eq!(outcome.dangling, 1);
        assert_eq!(store.node_count("User").await, 0);
        assert_eq!(store.edge_count("LOGGED_BY").await, 0);
    }
}
