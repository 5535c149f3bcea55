//! In-memory `GraphStore`.
//!
//! Mirrors the Neo4j semantics the pipeline relies on: MERGE by key,
//! `SET +=` removing `null` properties, relationships that are never
//! duplicated and never create their endpoints. Failures can be injected
//! per label, per node or per schema statement.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use apigraph_core::period::{month_id_for, parse_fact_date};
use apigraph_core::{Period, PeriodLevel, Properties, KEY_FIELD};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    ChildRollup, FactLinkOutcome, FactSchema, FactScope, FactTotals, ForeignKeyLink, GraphStore,
    IndexState, LinkDirection, LinkOutcome, NodeUpsert, RollupTotals,
};
use crate::client::GraphCounts;
use crate::error::{validate_identifier, StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub label: String,
    pub key: String,
}

impl NodeRef {
    pub fn new(label: &str, key: &str) -> Self {
        Self {
            label: label.to_string(),
            key: key.to_string(),
        }
    }
}

type Edge = (String, NodeRef, NodeRef);

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<NodeRef, Properties>,
    edges: BTreeSet<Edge>,
    schema: Vec<String>,
    failing_relationships: HashSet<String>,
    failing_nodes: HashSet<NodeRef>,
    failing_statements: Vec<String>,
    pending_indexes: Vec<IndexState>,
}

impl State {
    fn check_writable(&self, label: &str, key: &str) -> StoreResult<()> {
        if self.failing_nodes.contains(&NodeRef::new(label, key)) {
            return Err(StoreError::Rejected(format!("{label} {key}")));
        }
        Ok(())
    }

    fn upsert(&mut self, node: NodeRef, key_property: &str, properties: &Properties) {
        let key = node.key.clone();
        let stored = self.nodes.entry(node).or_default();
        stored.insert(key_property.to_string(), Value::String(key));
        apply_properties(stored, properties);
    }

    fn add_edge(&mut self, rel: &str, from: NodeRef, to: NodeRef) {
        self.edges.insert((rel.to_string(), from, to));
    }

    fn nodes_with_label<'a>(&'a self, label: &'a str) -> impl Iterator<Item = (&'a NodeRef, &'a Properties)> + 'a {
        self.nodes.iter().filter(move |(node, _)| node.label == label)
    }

    fn outgoing<'a>(&'a self, rel: &'a str, from: &'a NodeRef, to_label: &'a str) -> impl Iterator<Item = &'a NodeRef> + 'a {
        self.edges
            .iter()
            .filter(move |(r, f, t)| r == rel && f == from && t.label == to_label)
            .map(|(_, _, t)| t)
    }

    fn incoming<'a>(&'a self, rel: &'a str, to: &'a NodeRef, from_label: &'a str) -> impl Iterator<Item = &'a NodeRef> + 'a {
        self.edges
            .iter()
            .filter(move |(r, f, t)| r == rel && t == to && f.label == from_label)
            .map(|(_, f, _)| f)
    }

    /// Month nodes whose facts count towards a period node.
    fn months_of(&self, period: &NodeRef, level: PeriodLevel) -> Vec<NodeRef> {
        match level {
            PeriodLevel::Month => vec![period.clone()],
            PeriodLevel::Quarter => self.outgoing("CONTAINS", period, "Month").cloned().collect(),
            PeriodLevel::Year => self
                .outgoing("CONTAINS", period, "Quarter")
                .flat_map(|q| self.outgoing("CONTAINS", q, "Month"))
                .cloned()
                .collect(),
            PeriodLevel::Day => self.incoming("CONTAINS", period, "Month").cloned().collect(),
        }
    }

    /// Facts of `fact_label` reaching a scope node.
    fn facts_for(&self, scope: FactScope, node: &NodeRef, fact_label: &str, date_property: &str) -> BTreeSet<NodeRef> {
        match scope {
            FactScope::Entity { relationship, .. } => self.incoming(relationship, node, fact_label).cloned().collect(),
            FactScope::Period(level) => {
                let day = match level {
                    PeriodLevel::Day => parse_fact_date(&node.key),
                    _ => None,
                };
                self.months_of(node, level)
                    .iter()
                    .flat_map(|month| self.incoming("RECORDED_IN", month, fact_label).cloned().collect::<Vec<_>>())
                    .filter(|fact| match day {
                        Some(day) => self
                            .nodes
                            .get(fact)
                            .and_then(|props| props.get(date_property))
                            .and_then(Value::as_str)
                            .and_then(parse_fact_date)
                            == Some(day),
                        None => true,
                    })
                    .collect()
            }
        }
    }
}

/// Neo4j `SET n += $props`: `null` removes the property.
fn apply_properties(target: &mut Properties, properties: &Properties) {
    for (name, value) in properties {
        if value.is_null() {
            target.remove(name);
        } else {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(props: &Properties, name: &str) -> f64 {
    props.get(name).and_then(Value::as_f64).unwrap_or(0.0)
}

fn in_keys(key: &str, keys: Option<&[String]>) -> bool {
    keys.map_or(true, |keys| keys.iter().any(|k| k == key))
}

/// In-memory graph for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Make linking by `rel_type` fail.
    pub async fn fail_relationship(&self, rel_type: &str) {
        self.state.write().await.failing_relationships.insert(rel_type.to_string());
    }

    /// Make writes to one node fail.
    pub async fn fail_node(&self, label: &str, key: &str) {
        self.state.write().await.failing_nodes.insert(NodeRef::new(label, key));
    }

    /// Make schema statements containing `pattern` fail.
    pub async fn fail_statements_containing(&self, pattern: &str) {
        self.state.write().await.failing_statements.push(pattern.to_string());
    }

    pub async fn set_pending_indexes(&self, pending: Vec<IndexState>) {
        self.state.write().await.pending_indexes = pending;
    }

    pub async fn node(&self, label: &str, key: &str) -> Option<Properties> {
        self.state.read().await.nodes.get(&NodeRef::new(label, key)).cloned()
    }

    pub async fn node_count(&self, label: &str) -> usize {
        self.state.read().await.nodes_with_label(label).count()
    }

    pub async fn has_edge(&self, rel: &str, from: (&str, &str), to: (&str, &str)) -> bool {
        let edge = (rel.to_string(), NodeRef::new(from.0, from.1), NodeRef::new(to.0, to.1));
        self.state.read().await.edges.contains(&edge)
    }

    pub async fn edge_count(&self, rel: &str) -> usize {
        self.state.read().await.edges.iter().filter(|(r, _, _)| r == rel).count()
    }

    pub async fn schema_statements(&self) -> Vec<String> {
        self.state.read().await.schema.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Accept calls again after `close()`, keeping the stored graph.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn merge_node(&self, label: &str, key: &str, properties: &Properties) -> StoreResult<()> {
        self.ensure_open()?;
        validate_identifier(label)?;
        let mut state = self.state.write().await;
        state.check_writable(label, key)?;
        state.upsert(NodeRef::new(label, key), KEY_FIELD, properties);
        Ok(())
    }

    async fn merge_nodes(&self, label: &str, nodes: &[NodeUpsert]) -> StoreResult<()> {
        self.ensure_open()?;
        validate_identifier(label)?;
        let mut state = self.state.write().await;
        for (key, _) in nodes {
            state.check_writable(label, key)?;
        }
        for (key, properties) in nodes {
            state.upsert(NodeRef::new(label, key), KEY_FIELD, properties);
        }
        Ok(())
    }

    async fn merge_periods(&self, periods: &[Period]) -> StoreResult<usize> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        for period in periods {
            let label = period.level.label();
            state.check_writable(label, &period.id)?;
            let node = NodeRef::new(label, &period.id);
            state.upsert(node.clone(), "id", &period.properties());

            if let (Some(parent_level), Some(parent_id)) = (period.level.parent(), &period.parent_id) {
                let parent = NodeRef::new(parent_level.label(), parent_id);
                if state.nodes.contains_key(&parent) {
                    state.add_edge("CONTAINS", parent, node);
                }
            }
        }
        Ok(periods.len())
    }

    async fn link_by_foreign_key(&self, link: &ForeignKeyLink) -> StoreResult<LinkOutcome> {
        self.ensure_open()?;
        validate_identifier(link.rel_type)?;
        validate_identifier(link.holder_label)?;
        validate_identifier(link.referenced_label)?;
        validate_identifier(link.fk_property)?;

        let mut state = self.state.write().await;
        if state.failing_relationships.contains(link.rel_type) {
            return Err(StoreError::Rejected(link.rel_type.to_string()));
        }
        let holders: Vec<(NodeRef, String)> = state
            .nodes_with_label(link.holder_label)
            .filter_map(|(node, props)| {
                props
                    .get(link.fk_property)
                    .and_then(key_of)
                    .map(|fk| (node.clone(), fk))
            })
            .collect();

        let mut outcome = LinkOutcome::default();
        for (holder, fk) in holders {
            let referenced = NodeRef::new(link.referenced_label, &fk);
            if !state.nodes.contains_key(&referenced) {
                outcome.dangling += 1;
                if outcome.missing_keys.len() < 5 {
                    outcome.missing_keys.push(fk);
                }
                continue;
            }
            match link.direction {
                LinkDirection::FromReferenced => state.add_edge(link.rel_type, referenced, holder),
                LinkDirection::FromHolder => state.add_edge(link.rel_type, holder, referenced),
            }
            outcome.linked += 1;
        }
        Ok(outcome)
    }

    async fn link_facts_to_months(&self, fact_label: &str, date_property: &str) -> StoreResult<FactLinkOutcome> {
        self.ensure_open()?;
        validate_identifier(fact_label)?;
        validate_identifier(date_property)?;

        let mut state = self.state.write().await;
        let facts: Vec<(NodeRef, Option<String>)> = state
            .nodes_with_label(fact_label)
            .filter_map(|(node, props)| match props.get(date_property) {
                None | Some(Value::Null) => None,
                Some(value) => Some((node.clone(), value.as_str().and_then(month_id_for))),
            })
            .collect();

        let mut outcome = FactLinkOutcome::default();
        for (fact, month_id) in facts {
            let month = month_id.map(|id| NodeRef::new("Month", &id));
            match month {
                Some(month) if state.nodes.contains_key(&month) => {
                    state.add_edge("RECORDED_IN", fact, month);
                    outcome.linked += 1;
                }
                _ => outcome.skipped += 1,
            }
        }
        Ok(outcome)
    }

    async fn fact_totals(
        &self,
        scope: FactScope,
        keys: Option<&[String]>,
        schema: &FactSchema,
    ) -> StoreResult<Vec<(String, FactTotals)>> {
        self.ensure_open()?;
        let scope_label = match scope {
            FactScope::Period(level) => level.label(),
            FactScope::Entity { label, relationship } => {
                validate_identifier(relationship)?;
                validate_identifier(label)?
            }
        };

        let state = self.state.read().await;
        let hours = &schema.hours;
        let revenue = &schema.revenue;

        let mut out = Vec::new();
        for (node, _) in state.nodes_with_label(scope_label) {
            if !in_keys(&node.key, keys) {
                continue;
            }

            let mut totals = FactTotals::default();
            let mut users = BTreeSet::new();
            let mut projects = BTreeSet::new();
            for fact in state.facts_for(scope, node, hours.label, hours.date_property) {
                let Some(props) = state.nodes.get(&fact) else { continue };
                let quantity = number(props, hours.quantity);
                totals.hours += quantity;
                if props.get(hours.billable) == Some(&Value::Bool(true)) {
                    totals.billable_hours += quantity;
                }
                totals.cost += quantity * number(props, hours.unit_cost);
                totals.hour_facts += 1;
                if let Some(user) = props.get(hours.user_key).and_then(key_of) {
                    users.insert(user);
                }
                if let Some(project) = props.get(hours.project_key).and_then(key_of) {
                    projects.insert(project);
                }
            }
            totals.unique_users = users.len() as u64;
            totals.unique_projects = projects.len() as u64;

            for fact in state.facts_for(scope, node, revenue.label, revenue.date_property) {
                let Some(props) = state.nodes.get(&fact) else { continue };
                totals.revenue += number(props, revenue.amount);
                totals.revenue_facts += 1;
            }

            out.push((node.key.clone(), totals));
        }
        Ok(out)
    }

    async fn child_rollups(
        &self,
        rollup: &ChildRollup,
        keys: Option<&[String]>,
    ) -> StoreResult<Vec<(String, RollupTotals)>> {
        self.ensure_open()?;
        validate_identifier(rollup.parent_label)?;
        validate_identifier(rollup.relationship)?;
        validate_identifier(rollup.child_label)?;

        let state = self.state.read().await;
        let mut out = Vec::new();
        for (parent, _) in state.nodes_with_label(rollup.parent_label) {
            if !in_keys(&parent.key, keys) {
                continue;
            }
            let mut totals = RollupTotals {
                children: 0,
                sums: vec![0.0; rollup.sum_properties.len()],
            };
            for child in state.outgoing(rollup.relationship, parent, rollup.child_label) {
                totals.children += 1;
                if let Some(props) = state.nodes.get(child) {
                    for (sum, property) in totals.sums.iter_mut().zip(rollup.sum_properties) {
                        *sum += number(props, property);
                    }
                }
            }
            out.push((parent.key.clone(), totals));
        }
        Ok(out)
    }

    async fn set_properties(
        &self,
        label: &str,
        key_property: &str,
        updates: &[NodeUpsert],
    ) -> StoreResult<usize> {
        self.ensure_open()?;
        validate_identifier(label)?;
        validate_identifier(key_property)?;

        let mut state = self.state.write().await;
        for (key, _) in updates {
            state.check_writable(label, key)?;
        }
        let mut updated = 0;
        for (key, properties) in updates {
            if let Some(stored) = state.nodes.get_mut(&NodeRef::new(label, key)) {
                apply_properties(stored, properties);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn apply_schema(&self, statement: &str) -> StoreResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        if state.failing_statements.iter().any(|p| statement.contains(p.as_str())) {
            return Err(StoreError::Rejected(statement.to_string()));
        }
        if !state.schema.iter().any(|s| s == statement) {
            state.schema.push(statement.to_string());
        }
        Ok(())
    }

    async fn pending_indexes(&self) -> StoreResult<Vec<IndexState>> {
        self.ensure_open()?;
        Ok(self.state.read().await.pending_indexes.clone())
    }

    async fn counts(&self) -> StoreResult<GraphCounts> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let mut labels: BTreeMap<String, usize> = BTreeMap::new();
        for node in state.nodes.keys() {
            *labels.entry(node.label.clone()).or_default() += 1;
        }
        Ok(GraphCounts {
            nodes: state.nodes.len(),
            relationships: state.edges.len(),
            labels: labels.into_iter().collect(),
        })
    }

    async fn close(&self) -> StoreResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
