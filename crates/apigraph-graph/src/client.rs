//! Neo4j connection client.

use neo4rs::{BoltType, ConfigBuilder, Graph, Query, Row};
use serde::Deserialize;
use tracing::error;

use crate::error::{StoreError, StoreResult};

/// Named Cypher parameters.
pub type Params = Vec<(&'static str, BoltType)>;

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            max_connections: 4,
        }
    }
}

impl GraphConfig {
    pub fn validate(&self) -> StoreResult<()> {
        if self.uri.trim().is_empty() {
            return Err(StoreError::Connection("Neo4j URI is required".into()));
        }
        if self.password.is_empty() {
            return Err(StoreError::Connection("Neo4j password is required".into()));
        }
        Ok(())
    }
}

/// Client for Neo4j graph operations.
#[derive(Clone)]
pub struct GraphClient {
    graph: Graph,
}

impl GraphClient {
    /// Create a new GraphClient from config.
    ///
    /// `Graph::connect` only builds the pool, so a `RETURN 1` ping follows to
    /// surface an unreachable server at startup rather than on first write.
    pub async fn connect(config: &GraphConfig) -> StoreResult<Self> {
        config.validate()?;
        let neo4j_config = ConfigBuilder::default()
            .uri(&config.uri)
            .user(&config.user)
            .password(&config.password)
            .db(config.database.as_str())
            .max_connections(config.max_connections.max(1))
            .fetch_size(200)
            .build()
            .map_err(|e| StoreError::Connection(format!("invalid Neo4j config: {e}")))?;

        let graph = Graph::connect(neo4j_config)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to create connection pool: {e}")))?;

        graph
            .run(Query::new("RETURN 1".to_string()))
            .await
            .map_err(|e| StoreError::Connection(format!("Neo4j is not responding: {e}")))?;

        Ok(Self { graph })
    }

    #[cfg(test)]
    pub(crate) fn from_graph(graph: Graph) -> Self {
        Self { graph }
    }

    /// Build a parameterised query.
    pub fn statement(cypher: &str, params: Params) -> Query {
        params
            .into_iter()
            .fold(Query::new(cypher.to_string()), |query, (name, value)| query.param(name, value))
    }

    /// Execute a Cypher statement that returns no results.
    pub async fn execute(&self, cypher: &str, params: Params) -> StoreResult<()> {
        self.graph
            .run(Self::statement(cypher, params))
            .await
            .map_err(|e| {
                error!(statement = cypher, error = %e, "Cypher execution failed");
                StoreError::query(cypher, e)
            })
    }

    /// Execute a Cypher statement and collect every row.
    pub async fn query(&self, cypher: &str, params: Params) -> StoreResult<Vec<Row>> {
        let fail = |e: neo4rs::Error| {
            error!(statement = cypher, error = %e, "Cypher query failed");
            StoreError::query(cypher, e)
        };

        let mut stream = self.graph.execute(Self::statement(cypher, params)).await.map_err(fail)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(fail)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Execute a query and read one integer column of its first row.
    pub async fn query_count(&self, cypher: &str, params: Params, field: &str) -> StoreResult<usize> {
        let rows = self.query(cypher, params).await?;
        match rows.first() {
            Some(row) => {
                let value: i64 = row
                    .get(field)
                    .map_err(|e| StoreError::decode(format!("field '{field}': {e:?}")))?;
                Ok(usize::try_from(value).unwrap_or(0))
            }
            None => Ok(0),
        }
    }

    /// Get node and relationship counts for status display.
    pub async fn get_counts(&self) -> StoreResult<GraphCounts> {
        let nodes = self
            .query_count("MATCH (n) RETURN count(n) AS count", Vec::new(), "count")
            .await?;
        let relationships = self
            .query_count("MATCH ()-[r]->() RETURN count(r) AS count", Vec::new(), "count")
            .await?;

        let mut labels = Vec::new();
        for row in self
            .query(
                "MATCH (n) UNWIND labels(n) AS label RETURN label, count(*) AS count ORDER BY label",
                Vec::new(),
            )
            .await?
        {
            let label: String = row.get("label").unwrap_or_default();
            let count: i64 = row.get("count").unwrap_or_default();
            labels.push((label, usize::try_from(count).unwrap_or(0)));
        }

        Ok(GraphCounts {
            nodes,
            relationships,
            labels,
        })
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

/// Node and relationship counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphCounts {
    pub nodes: usize,
    pub relationships: usize,
    /// Node count per label, sorted by label.
    pub labels: Vec<(String, usize)>,
}
