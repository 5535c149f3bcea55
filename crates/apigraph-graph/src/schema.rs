//! Neo4j schema migration (constraints and indexes).
//!
//! Statements are generated from the entity catalogue and use
//! `IF NOT EXISTS`, so the migration is safe to run on every sync.

use std::fmt;
use std::sync::Arc;

use apigraph_core::PeriodLevel;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{validate_identifier, StoreResult};
use crate::store::{GraphStore, IndexState};

/// Indexing needs of one node label.
#[derive(Debug, Clone, Copy)]
pub struct EntitySchema {
    pub label: &'static str,
    /// Single-property indexes, including every `<relation>Guid` used for linking.
    pub indexed: &'static [&'static str],
    /// Named composite indexes.
    pub composite: &'static [(&'static str, &'static [&'static str])],
    /// Named full-text index over string properties.
    pub fulltext: Option<(&'static str, &'static [&'static str])>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Constraint,
    Index,
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constraint => f.write_str("constraint"),
            Self::Index => f.write_str("index"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaStatement {
    pub kind: StatementKind,
    pub name: String,
    pub cypher: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub dry_run: bool,
    pub constraints_created: usize,
    pub indexes_created: usize,
    /// `(statement name, error)` for each statement that failed.
    pub errors: Vec<(String, String)>,
    /// Indexes that were not ONLINE after the migration.
    pub pending: Vec<(String, String)>,
}

impl MigrationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn applied(&self) -> usize {
        self.constraints_created + self.indexes_created
    }
}

pub struct SchemaMigration {
    store: Arc<dyn GraphStore>,
    entities: Vec<EntitySchema>,
}

impl SchemaMigration {
    pub fn new(store: Arc<dyn GraphStore>, entities: Vec<EntitySchema>) -> Self {
        Self { store, entities }
    }

    /// Every statement the migration would run, constraints first.
    pub fn plan(&self) -> StoreResult<Vec<SchemaStatement>> {
        let mut constraints = Vec::new();
        let mut indexes = Vec::new();

        for entity in &self.entities {
            let label = validate_identifier(entity.label)?;
            let prefix = snake_case(label);

            constraints.push(SchemaStatement {
                kind: StatementKind::Constraint,
                name: format!("{prefix}_guid_unique"),
                cypher: format!(
                    "CREATE CONSTRAINT {prefix}_guid_unique IF NOT EXISTS FOR (n:{label}) REQUIRE n.guid IS UNIQUE"
                ),
            });

            for property in entity.indexed {
                let property = validate_identifier(property)?;
                let name = format!("{prefix}_{}_idx", snake_case(property));
                indexes.push(SchemaStatement {
                    kind: StatementKind::Index,
                    cypher: format!("CREATE INDEX {name} IF NOT EXISTS FOR (n:{label}) ON (n.{property})"),
                    name,
                });
            }

            for (name, properties) in entity.composite {
                let name = validate_identifier(name)?;
                let columns = node_properties(properties)?;
                indexes.push(SchemaStatement {
                    kind: StatementKind::Index,
                    name: name.to_string(),
                    cypher: format!("CREATE INDEX {name} IF NOT EXISTS FOR (n:{label}) ON ({columns})"),
                });
            }

            if let Some((name, properties)) = entity.fulltext {
                let name = validate_identifier(name)?;
                let columns = node_properties(properties)?;
                indexes.push(SchemaStatement {
                    kind: StatementKind::Index,
                    name: name.to_string(),
                    cypher: format!(
                        "CREATE FULLTEXT INDEX {name} IF NOT EXISTS FOR (n:{label}) ON EACH [{columns}]"
                    ),
                });
            }
        }

        for level in PeriodLevel::ALL {
            let label = level.label();
            let prefix = snake_case(label);
            constraints.push(SchemaStatement {
                kind: StatementKind::Constraint,
                name: format!("{prefix}_id_unique"),
                cypher: format!(
                    "CREATE CONSTRAINT {prefix}_id_unique IF NOT EXISTS FOR (n:{label}) REQUIRE n.id IS UNIQUE"
                ),
            });
        }

        constraints.extend(indexes);
        Ok(constraints)
    }

    /// Apply the plan. Individual statement failures are recorded, not raised.
    pub async fn run(&self, dry_run: bool) -> StoreResult<MigrationReport> {
        let plan = self.plan()?;
        let mut report = MigrationReport {
            dry_run,
            ..MigrationReport::default()
        };

        if dry_run {
            for statement in &plan {
                info!(kind = %statement.kind, name = %statement.name, "[dry run] {}", statement.cypher);
            }
            return Ok(report);
        }

        info!(statements = plan.len(), "Applying schema migration");
        for statement in &plan {
            match self.store.apply_schema(&statement.cypher).await {
                Ok(()) => match statement.kind {
                    StatementKind::Constraint => report.constraints_created += 1,
                    StatementKind::Index => report.indexes_created += 1,
                },
                Err(e) => {
                    error!(name = %statement.name, error = %e, "Schema statement failed");
                    report.errors.push((statement.name.clone(), e.to_string()));
                }
            }
        }

        match self.verify().await {
            Ok(pending) => {
                report.pending = pending.into_iter().map(|i| (i.name, i.state)).collect();
            }
            Err(e) => {
                warn!(error = %e, "Could not verify index state");
                report.errors.push(("verify".to_string(), e.to_string()));
            }
        }

        info!(
            constraints = report.constraints_created,
            indexes = report.indexes_created,
            errors = report.errors.len(),
            "Schema migration finished"
        );
        Ok(report)
    }

    /// Indexes that are not ONLINE yet.
    pub async fn verify(&self) -> StoreResult<Vec<IndexState>> {
        let pending = self.store.pending_indexes().await?;
        for index in &pending {
            warn!(name = %index.name, state = %index.state, "Index is not online");
        }
        Ok(pending)
    }
}

fn node_properties(properties: &[&str]) -> StoreResult<String> {
    let mut columns = Vec::with_capacity(properties.len());
    for property in properties {
        columns.push(format!("n.{}", validate_identifier(property)?));
    }
    Ok(columns.join(", "))
}

/// `BusinessUnit` → `business_unit`, `ownerGuid` → `owner_guid`.
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    const CUSTOMER: EntitySchema = EntitySchema {
        label: "Customer",
        indexed: &["name", "ownerGuid"],
        composite: &[("customer_status_idx", &["isActive", "name"])],
        fulltext: Some(("customer_search", &["name", "number"])),
    };

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("BusinessUnit"), "business_unit");
        assert_eq!(snake_case("ownerGuid"), "owner_guid");
        assert_eq!(snake_case("name"), "name");
    }

    #[test]
    fn test_plan_statements() {
        let migration = SchemaMigration::new(Arc::new(MemoryStore::new()), vec![CUSTOMER]);
        let plan = migration.plan().unwrap();
        let cypher: Vec<&str> = plan.iter().map(|s| s.cypher.as_str()).collect();

        assert_eq!(
            cypher[0],
            "CREATE CONSTRAINT customer_guid_unique IF NOT EXISTS FOR (n:Customer) REQUIRE n.guid IS UNIQUE"
        );
        assert!(cypher.contains(&"CREATE INDEX customer_owner_guid_idx IF NOT EXISTS FOR (n:Customer) ON (n.ownerGuid)"));
        assert!(cypher.contains(&"CREATE INDEX customer_status_idx IF NOT EXISTS FOR (n:Customer) ON (n.isActive, n.name)"));
        assert!(cypher.contains(
            &"CREATE FULLTEXT INDEX customer_search IF NOT EXISTS FOR (n:Customer) ON EACH [n.name, n.number]"
        ));
        assert!(cypher.contains(&"CREATE CONSTRAINT month_id_unique IF NOT EXISTS FOR (n:Month) REQUIRE n.id IS UNIQUE"));

        let constraints = plan.iter().filter(|s| s.kind == StatementKind::Constraint).count();
        assert_eq!(constraints, 5);
        assert_eq!(plan.len(), 5 + 4);
    }

    #[tokio::test]
    async fn test_run_records_failures_and_continues() {
        let store = Arc::new(MemoryStore::new());
        store.fail_statements_containing("FULLTEXT").await;
        store
            .set_pending_indexes(vec![IndexState {
                name: "customer_name_idx".into(),
                state: "POPULATING".into(),
            }])
            .await;

        let migration = SchemaMigration::new(store.clone(), vec![CUSTOMER]);
        let report = migration.run(false).await.unwrap();

        assert_eq!(report.constraints_created, 5);
        assert_eq!(report.indexes_created, 3);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].0, "customer_search");
        assert_eq!(report.pending, vec![("customer_name_idx".to_string(), "POPULATING".to_string())]);
        assert_eq!(store.schema_statements().await.len(), 8);
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let migration = SchemaMigration::new(store.clone(), vec![CUSTOMER]);
        let report = migration.run(true).await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.applied(), 0);
        assert!(store.schema_statements().await.is_empty());
    }

    #[test]
    fn test_plan_rejects_bad_property() {
        const BAD: EntitySchema = EntitySchema {
            label: "Customer",
            indexed: &["name) DETACH DELETE (x"],
            composite: &[],
            fulltext: None,
        };
        let migration = SchemaMigration::new(Arc::new(MemoryStore::new()), vec![BAD]);
        assert!(migration.plan().is_err());
    }
}
