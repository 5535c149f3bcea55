//! Pipeline stages, in execution order.

use std::fmt;

use serde::Serialize;

/// One step of a sync run. Ordering follows execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStage {
    Auth,
    Index,
    Reference,
    CoreEntities,
    Transactional,
    Relationships,
    Metrics,
    Analytics,
    Summary,
}

impl SyncStage {
    pub const ALL: [SyncStage; 9] = [
        Self::Auth,
        Self::Index,
        Self::Reference,
        Self::CoreEntities,
        Self::Transactional,
        Self::Relationships,
        Self::Metrics,
        Self::Analytics,
        Self::Summary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::Index => "INDEX",
            Self::Reference => "REFERENCE",
            Self::CoreEntities => "CORE_ENTITIES",
            Self::Transactional => "TRANSACTIONAL",
            Self::Relationships => "RELATIONSHIPS",
            Self::Metrics => "METRICS",
            Self::Analytics => "ANALYTICS",
            Self::Summary => "SUMMARY",
        }
    }

    /// 1-based position in the run, used in stage banners.
    pub fn step(&self) -> usize {
        *self as usize + 1
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert!(SyncStage::Auth < SyncStage::Index);
        assert!(SyncStage::Relationships < SyncStage::Metrics);
        assert_eq!(SyncStage::Auth.step(), 1);
        assert_eq!(SyncStage::Summary.step(), 9);
        assert_eq!(SyncStage::ALL.last(), Some(&SyncStage::Summary));
    }
}
