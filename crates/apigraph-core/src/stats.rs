//! Counters accumulated over one sync run.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::stage::SyncStage;

/// Per-entity merge counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub synced: usize,
    pub failed: usize,
}

/// Per-relationship-type linkage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounts {
    pub linked: usize,
    /// Foreign keys whose referenced node does not exist.
    pub dangling: usize,
    pub failed: usize,
}

/// Statistics of one run, reported by the SUMMARY stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub entities: BTreeMap<String, EntityCounts>,
    pub relationships: BTreeMap<String, LinkCounts>,
    pub schema_statements: usize,
    pub metrics_calculated: usize,
    pub periods_merged: usize,
    pub facts_linked: usize,
    pub periods_denormalized: usize,
    pub summaries_denormalized: usize,
    pub stages_completed: Vec<SyncStage>,
    pub elapsed: Duration,
}

impl RunStats {
    pub fn record_synced(&mut self, entity: &str) {
        self.entities.entry(entity.to_string()).or_default().synced += 1;
    }

    pub fn record_synced_count(&mut self, entity: &str, count: usize) {
        self.entities.entry(entity.to_string()).or_default().synced += count;
    }

    pub fn record_failed(&mut self, entity: &str) {
        self.entities.entry(entity.to_string()).or_default().failed += 1;
    }

    pub fn record_link(&mut self, relationship: &str, linked: usize, dangling: usize) {
        let counts = self.relationships.entry(relationship.to_string()).or_default();
        counts.linked += linked;
        counts.dangling += dangling;
    }

    pub fn record_link_failed(&mut self, relationship: &str) {
        self.relationships.entry(relationship.to_string()).or_default().failed += 1;
    }

    pub fn entity(&self, entity: &str) -> EntityCounts {
        self.entities.get(entity).copied().unwrap_or_default()
    }

    pub fn relationship(&self, relationship: &str) -> LinkCounts {
        self.relationships.get(relationship).copied().unwrap_or_default()
    }

    pub fn total_synced(&self) -> usize {
        self.entities.values().map(|c| c.synced).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.entities.values().map(|c| c.failed).sum()
    }

    pub fn relationships_linked(&self) -> usize {
        self.relationships.values().map(|c| c.linked).sum()
    }

    pub fn relationships_failed(&self) -> usize {
        self.relationships.values().map(|c| c.failed).sum()
    }

    pub fn completed(&self, stage: SyncStage) -> bool {
        self.stages_completed.contains(&stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut stats = RunStats::default();
        stats.record_synced("Customer");
        stats.record_synced("Customer");
        stats.record_failed("Customer");
        stats.record_synced("User");
        stats.record_link("HAS_PROJECT", 3, 1);
        stats.record_link("HAS_PROJECT", 2, 0);
        stats.record_link_failed("LOGGED_BY");

        assert_eq!(stats.entity("Customer"), EntityCounts { synced: 2, failed: 1 });
        assert_eq!(stats.total_synced(), 3);
        assert_eq!(stats.total_failed(), 1);
        assert_eq!(stats.relationship("HAS_PROJECT").linked, 5);
        assert_eq!(stats.relationship("HAS_PROJECT").dangling, 1);
        assert_eq!(stats.relationships_linked(), 5);
        assert_eq!(stats.relationships_failed(), 1);
        assert_eq!(stats.entity("Invoice"), EntityCounts::default());
    }
}
