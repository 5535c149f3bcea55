//! `GraphStore` over a live Neo4j database.
//!
//! Labels, relationship types and property names are validated and spliced
//! into the statement text; every value travels as a parameter.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use apigraph_core::{Period, PeriodLevel, Properties};
use async_trait::async_trait;
use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltNull, BoltString, BoltType};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{
    ChildRollup, FactLinkOutcome, FactSchema, FactScope, FactTotals, ForeignKeyLink, GraphStore,
    IndexState, LinkDirection, LinkOutcome, NodeUpsert, RollupTotals,
};
use crate::client::{GraphClient, GraphCounts, GraphConfig};
use crate::error::{validate_identifier, StoreError, StoreResult};

/// Number of unmatched keys reported per link.
const MISSING_KEY_SAMPLE: usize = 5;

/// The pool is owned here; `close()` drops it.
pub struct Neo4jStore {
    client: Mutex<Option<GraphClient>>,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client: Mutex::new(Some(client)),
        }
    }

    pub async fn connect(config: &GraphConfig) -> StoreResult<Self> {
        let client = GraphClient::connect(config).await?;
        info!(uri = %config.uri, database = %config.database, "Connected to Neo4j");
        Ok(Self::new(client))
    }

    /// Handle on the shared pool, or `Closed` once the store was closed.
    fn client(&self) -> StoreResult<GraphClient> {
        self.client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(StoreError::Closed)
    }

    /// Run one statement inside an explicit transaction.
    async fn run_in_txn(client: &GraphClient, label: &str, cypher: &str, rows: BoltType) -> StoreResult<()> {
        let fail = |e: neo4rs::Error| {
            error!(label, statement = cypher, error = %e, "Transaction failed");
            StoreError::Transaction {
                label: label.to_string(),
                source: e,
            }
        };

        let mut txn = client.inner().start_txn().await.map_err(fail)?;
        if let Err(e) = txn.run(GraphClient::statement(cypher, vec![("rows", rows)])).await {
            if let Err(rollback) = txn.rollback().await {
                warn!(label, error = %rollback, "Rollback failed");
            }
            return Err(fail(e));
        }
        txn.commit().await.map_err(fail)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn merge_node(&self, label: &str, key: &str, properties: &Properties) -> StoreResult<()> {
        let client = self.client()?;
        let label = validate_identifier(label)?;
        let cypher = format!("MERGE (n:{label} {{guid: $key}}) SET n += $props");
        client
            .execute(
                &cypher,
                vec![("key", BoltType::from(key)), ("props", BoltType::Map(to_bolt_map(properties)))],
            )
            .await
    }

    async fn merge_nodes(&self, label: &str, nodes: &[NodeUpsert]) -> StoreResult<()> {
        let client = self.client()?;
        let label = validate_identifier(label)?;
        if nodes.is_empty() {
            return Ok(());
        }
        let cypher = format!("UNWIND $rows AS row MERGE (n:{label} {{guid: row.key}}) SET n += row.props");
        let rows = bolt_rows(nodes.iter().map(|(key, props)| keyed_row(key, props)));
        Self::run_in_txn(&client, label, &cypher, rows).await
    }

    async fn merge_periods(&self, periods: &[Period]) -> StoreResult<usize> {
        let client = self.client()?;
        for level in PeriodLevel::ALL {
            let rows: Vec<BoltType> = periods
                .iter()
                .filter(|p| p.level == level)
                .map(period_row)
                .collect();
            if rows.is_empty() {
                continue;
            }

            let label = level.label();
            let cypher = match level.parent() {
                Some(parent) => format!(
                    "UNWIND $rows AS row \
                     MERGE (p:{label} {{id: row.id}}) SET p += row.props \
                     WITH p, row WHERE row.parent IS NOT NULL \
                     MATCH (parent:{parent_label} {{id: row.parent}}) \
                     MERGE (parent)-[:CONTAINS]->(p)",
                    parent_label = parent.label()
                ),
                None => format!("UNWIND $rows AS row MERGE (p:{label} {{id: row.id}}) SET p += row.props"),
            };
            debug!(label, count = rows.len(), "Merging periods");
            Self::run_in_txn(&client, label, &cypher, BoltType::List(list_of(rows))).await?;
        }
        Ok(periods.len())
    }

    async fn link_by_foreign_key(&self, link: &ForeignKeyLink) -> StoreResult<LinkOutcome> {
        let client = self.client()?;
        let holder = validate_identifier(link.holder_label)?;
        let referenced = validate_identifier(link.referenced_label)?;
        let fk = validate_identifier(link.fk_property)?;
        let rel = validate_identifier(link.rel_type)?;

        let merge = match link.direction {
            LinkDirection::FromReferenced => format!("MERGE (r)-[:{rel}]->(h)"),
            LinkDirection::FromHolder => format!("MERGE (h)-[:{rel}]->(r)"),
        };
        let cypher = format!(
            "MATCH (h:{holder}) WHERE h.{fk} IS NOT NULL \
             OPTIONAL MATCH (r:{referenced} {{guid: h.{fk}}}) \
             FOREACH (_ IN CASE WHEN r IS NULL THEN [] ELSE [1] END | {merge}) \
             RETURN count(r) AS linked, count(h) - count(r) AS dangling, \
                    collect(CASE WHEN r IS NULL THEN toString(h.{fk}) END)[..{MISSING_KEY_SAMPLE}] AS missing"
        );

        let rows = client.query(&cypher, Vec::new()).await?;
        let Some(row) = rows.first() else {
            return Ok(LinkOutcome::default());
        };
        Ok(LinkOutcome {
            linked: read_count(row, "linked")?,
            dangling: read_count(row, "dangling")?,
            missing_keys: row.get::<Vec<String>>("missing").unwrap_or_default(),
        })
    }

    async fn link_facts_to_months(&self, fact_label: &str, date_property: &str) -> StoreResult<FactLinkOutcome> {
        let client = self.client()?;
        let label = validate_identifier(fact_label)?;
        let date = validate_identifier(date_property)?;
        let cypher = format!(
            "MATCH (f:{label}) WHERE f.{date} IS NOT NULL \
             OPTIONAL MATCH (m:Month {{id: substring(toString(f.{date}), 0, 7)}}) \
             FOREACH (_ IN CASE WHEN m IS NULL THEN [] ELSE [1] END | MERGE (f)-[:RECORDED_IN]->(m)) \
             RETURN count(m) AS linked, count(f) - count(m) AS skipped"
        );

        let rows = client.query(&cypher, Vec::new()).await?;
        let Some(row) = rows.first() else {
            return Ok(FactLinkOutcome::default());
        };
        Ok(FactLinkOutcome {
            linked: read_count(row, "linked")?,
            skipped: read_count(row, "skipped")?,
        })
    }

    async fn fact_totals(
        &self,
        scope: FactScope,
        keys: Option<&[String]>,
        schema: &FactSchema,
    ) -> StoreResult<Vec<(String, FactTotals)>> {
        let client = self.client()?;
        let hours = &schema.hours;
        let revenue = &schema.revenue;

        let mut totals: BTreeMap<String, FactTotals> = BTreeMap::new();

        let (scope_match, optional) = scope_clauses(scope, hours.label, hours.date_property, keys)?;
        let cypher = format!(
            "{scope_match} {optional} \
             RETURN s.{key} AS key, \
                    toFloat(sum(coalesce(f.{quantity}, 0))) AS hours, \
                    toFloat(sum(CASE WHEN f.{billable} = true THEN coalesce(f.{quantity}, 0) ELSE 0 END)) AS billable, \
                    toFloat(sum(coalesce(f.{quantity}, 0) * coalesce(f.{unit_cost}, 0))) AS cost, \
                    count(f) AS facts, \
                    count(DISTINCT f.{user_key}) AS users, \
                    count(DISTINCT f.{project_key}) AS projects",
            key = scope_key(scope),
            quantity = validate_identifier(hours.quantity)?,
            billable = validate_identifier(hours.billable)?,
            unit_cost = validate_identifier(hours.unit_cost)?,
            user_key = validate_identifier(hours.user_key)?,
            project_key = validate_identifier(hours.project_key)?,
        );
        for row in client.query(&cypher, keys_param(keys)).await? {
            let key: String = row.get("key").map_err(|e| StoreError::decode(format!("key: {e:?}")))?;
            let entry = totals.entry(key).or_default();
            entry.hours = read_float(&row, "hours")?;
            entry.billable_hours = read_float(&row, "billable")?;
            entry.cost = read_float(&row, "cost")?;
            entry.hour_facts = read_count(&row, "facts")? as u64;
            entry.unique_users = read_count(&row, "users")? as u64;
            entry.unique_projects = read_count(&row, "projects")? as u64;
        }

        let (scope_match, optional) = scope_clauses(scope, revenue.label, revenue.date_property, keys)?;
        let cypher = format!(
            "{scope_match} {optional} \
             RETURN s.{key} AS key, toFloat(sum(coalesce(f.{amount}, 0))) AS revenue, count(f) AS facts",
            key = scope_key(scope),
            amount = validate_identifier(revenue.amount)?,
        );
        for row in client.query(&cypher, keys_param(keys)).await? {
            let key: String = row.get("key").map_err(|e| StoreError::decode(format!("key: {e:?}")))?;
            let entry = totals.entry(key).or_default();
            entry.revenue = read_float(&row, "revenue")?;
            entry.revenue_facts = read_count(&row, "facts")? as u64;
        }

        Ok(totals.into_iter().collect())
    }

    async fn child_rollups(
        &self,
        rollup: &ChildRollup,
        keys: Option<&[String]>,
    ) -> StoreResult<Vec<(String, RollupTotals)>> {
        let client = self.client()?;
        let parent = validate_identifier(rollup.parent_label)?;
        let rel = validate_identifier(rollup.relationship)?;
        let child = validate_identifier(rollup.child_label)?;

        let mut sums = Vec::with_capacity(rollup.sum_properties.len());
        for (i, property) in rollup.sum_properties.iter().enumerate() {
            let property = validate_identifier(property)?;
            sums.push(format!("toFloat(sum(coalesce(c.{property}, 0))) AS s{i}"));
        }
        let sums = if sums.is_empty() {
            String::new()
        } else {
            format!(", {}", sums.join(", "))
        };

        let cypher = format!(
            "MATCH (p:{parent}) {filter} \
             OPTIONAL MATCH (p)-[:{rel}]->(c:{child}) \
             RETURN p.guid AS key, count(c) AS children{sums}",
            filter = keys_filter("p", "guid", keys)
        );

        let mut out = Vec::new();
        for row in client.query(&cypher, keys_param(keys)).await? {
            let key: String = row.get("key").map_err(|e| StoreError::decode(format!("key: {e:?}")))?;
            let mut totals = RollupTotals {
                children: read_count(&row, "children")? as u64,
                sums: Vec::with_capacity(rollup.sum_properties.len()),
            };
            for i in 0..rollup.sum_properties.len() {
                totals.sums.push(read_float(&row, &format!("s{i}"))?);
            }
            out.push((key, totals));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn set_properties(
        &self,
        label: &str,
        key_property: &str,
        updates: &[NodeUpsert],
    ) -> StoreResult<usize> {
        let client = self.client()?;
        if updates.is_empty() {
            return Ok(0);
        }
        let label = validate_identifier(label)?;
        let key_property = validate_identifier(key_property)?;
        let cypher = format!(
            "UNWIND $rows AS row MATCH (n:{label} {{{key_property}: row.key}}) \
             SET n += row.props RETURN count(n) AS updated"
        );
        let rows = bolt_rows(updates.iter().map(|(key, props)| keyed_row(key, props)));
        client.query_count(&cypher, vec![("rows", rows)], "updated").await
    }

    async fn apply_schema(&self, statement: &str) -> StoreResult<()> {
        let client = self.client()?;
        client.execute(statement, Vec::new()).await
    }

    async fn pending_indexes(&self) -> StoreResult<Vec<IndexState>> {
        let client = self.client()?;
        let rows = client
            .query(
                "SHOW INDEXES YIELD name, state WHERE state <> 'ONLINE' RETURN name, state",
                Vec::new(),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| IndexState {
                name: row.get("name").unwrap_or_default(),
                state: row.get("state").unwrap_or_default(),
            })
            .collect())
    }

    async fn counts(&self) -> StoreResult<GraphCounts> {
        let client = self.client()?;
        client.get_counts().await
    }

    async fn close(&self) -> StoreResult<()> {
        let client = self.client.lock().unwrap_or_else(PoisonError::into_inner).take();
        if client.is_some() {
            info!("Neo4j connection closed");
        }
        Ok(())
    }
}

/// `MATCH (s:...)` for the scope nodes and the `OPTIONAL MATCH` reaching their facts.
fn scope_clauses(
    scope: FactScope,
    fact_label: &str,
    date_property: &str,
    keys: Option<&[String]>,
) -> StoreResult<(String, String)> {
    let fact = validate_identifier(fact_label)?;
    let date = validate_identifier(date_property)?;

    let (scope_label, pattern) = match scope {
        FactScope::Period(PeriodLevel::Month) => ("Month", format!("(s)<-[:RECORDED_IN]-(f:{fact})")),
        FactScope::Period(PeriodLevel::Quarter) => (
            "Quarter",
            format!("(s)-[:CONTAINS]->(:Month)<-[:RECORDED_IN]-(f:{fact})"),
        ),
        FactScope::Period(PeriodLevel::Year) => (
            "Year",
            format!("(s)-[:CONTAINS]->(:Quarter)-[:CONTAINS]->(:Month)<-[:RECORDED_IN]-(f:{fact})"),
        ),
        FactScope::Period(PeriodLevel::Day) => (
            "Day",
            format!(
                "(s)<-[:CONTAINS]-(:Month)<-[:RECORDED_IN]-(f:{fact}) \
                 WHERE substring(toString(f.{date}), 0, 10) = s.id"
            ),
        ),
        FactScope::Entity { label, relationship } => {
            let rel = validate_identifier(relationship)?;
            (validate_identifier(label)?, format!("(s)<-[:{rel}]-(f:{fact})"))
        }
    };

    Ok((
        format!("MATCH (s:{scope_label}) {}", keys_filter("s", scope_key(scope), keys)),
        format!("OPTIONAL MATCH {pattern}"),
    ))
}

fn scope_key(scope: FactScope) -> &'static str {
    match scope {
        FactScope::Period(_) => "id",
        FactScope::Entity { .. } => "guid",
    }
}

fn keys_filter(var: &str, key: &str, keys: Option<&[String]>) -> String {
    match keys {
        Some(_) => format!("WHERE {var}.{key} IN $keys"),
        None => String::new(),
    }
}

fn keys_param(keys: Option<&[String]>) -> Vec<(&'static str, BoltType)> {
    match keys {
        Some(keys) => vec![(
            "keys",
            BoltType::List(list_of(keys.iter().map(|k| BoltType::from(k.as_str())).collect())),
        )],
        None => Vec::new(),
    }
}

fn read_count(row: &neo4rs::Row, field: &str) -> StoreResult<usize> {
    let value: i64 = row
        .get(field)
        .map_err(|e| StoreError::decode(format!("field '{field}': {e:?}")))?;
    Ok(usize::try_from(value).unwrap_or(0))
}

fn read_float(row: &neo4rs::Row, field: &str) -> StoreResult<f64> {
    row.get::<f64>(field)
        .map_err(|e| StoreError::decode(format!("field '{field}': {e:?}")))
}

fn period_row(period: &Period) -> BoltType {
    let mut row = BoltMap::new();
    row.put(BoltString::from("id"), BoltType::from(period.id.as_str()));
    row.put(
        BoltString::from("parent"),
        period
            .parent_id
            .as_deref()
            .map(BoltType::from)
            .unwrap_or(BoltType::Null(BoltNull)),
    );
    row.put(BoltString::from("props"), BoltType::Map(to_bolt_map(&period.properties())));
    BoltType::Map(row)
}

fn keyed_row(key: &str, props: &Properties) -> BoltType {
    let mut row = BoltMap::new();
    row.put(BoltString::from("key"), BoltType::from(key));
    row.put(BoltString::from("props"), BoltType::Map(to_bolt_map(props)));
    BoltType::Map(row)
}

fn bolt_rows(rows: impl Iterator<Item = BoltType>) -> BoltType {
    BoltType::List(list_of(rows.collect()))
}

fn list_of(items: Vec<BoltType>) -> BoltList {
    let mut list = BoltList::new();
    for item in items {
        list.push(item);
    }
    list
}

fn to_bolt_map(map: &Properties) -> BoltMap {
    let mut out = BoltMap::new();
    for (key, value) in map {
        out.put(BoltString::from(key.as_str()), to_bolt(value));
    }
    out
}

/// Convert a JSON value into its Bolt equivalent.
pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::Integer(BoltInteger::new(i)),
            None => BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or_default())),
        },
        Value::String(s) => BoltType::String(BoltString::from(s.as_str())),
        Value::Array(items) => BoltType::List(list_of(items.iter().map(to_bolt).collect())),
        Value::Object(map) => BoltType::Map(to_bolt_map(map)),
    }
}
