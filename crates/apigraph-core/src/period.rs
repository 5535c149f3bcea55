//! Time-period index: Year → Quarter → Month → Day.
//!
//! Periods are keyed by canonical identifiers (`2025`, `2025-Q1`,
//! `2025-01`, `2025-01-15`) and each one knows its single parent, so the
//! index is a strict containment tree.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::CoreError;
use crate::record::Properties;

/// Granularity of a period node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodLevel {
    Year,
    Quarter,
    Month,
    Day,
}

impl PeriodLevel {
    pub const ALL: [PeriodLevel; 4] = [Self::Year, Self::Quarter, Self::Month, Self::Day];

    /// Node label used in the graph.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Year => "Year",
            Self::Quarter => "Quarter",
            Self::Month => "Month",
            Self::Day => "Day",
        }
    }

    /// Level of the containing period, if any.
    pub fn parent(&self) -> Option<PeriodLevel> {
        match self {
            Self::Year => None,
            Self::Quarter => Some(Self::Year),
            Self::Month => Some(Self::Quarter),
            Self::Day => Some(Self::Month),
        }
    }
}

impl fmt::Display for PeriodLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PeriodLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "year" => Ok(Self::Year),
            "quarter" => Ok(Self::Quarter),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            _ => Err(CoreError::InvalidPeriodType(s.to_string())),
        }
    }
}

/// A single node of the period index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Period {
    pub level: PeriodLevel,
    pub id: String,
    pub parent_id: Option<String>,
    pub year: i32,
    pub quarter: Option<u32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
}

impl Period {
    pub fn year(year: i32) -> Self {
        Self {
            level: PeriodLevel::Year,
            id: year.to_string(),
            parent_id: None,
            year,
            quarter: None,
            month: None,
            day: None,
        }
    }

    pub fn quarter(year: i32, quarter: u32) -> Self {
        Self {
            level: PeriodLevel::Quarter,
            id: quarter_id(year, quarter),
            parent_id: Some(year.to_string()),
            year,
            quarter: Some(quarter),
            month: None,
            day: None,
        }
    }

    pub fn month(year: i32, month: u32) -> Self {
        let quarter = quarter_of(month);
        Self {
            level: PeriodLevel::Month,
            id: month_id(year, month),
            parent_id: Some(quarter_id(year, quarter)),
            year,
            quarter: Some(quarter),
            month: Some(month),
            day: None,
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self {
            level: PeriodLevel::Day,
            id: date.format("%Y-%m-%d").to_string(),
            parent_id: Some(month_id(date.year(), date.month())),
            year: date.year(),
            quarter: Some(quarter_of(date.month())),
            month: Some(date.month()),
            day: Some(date.day()),
        }
    }

    /// Descriptive properties stored on the node besides its `id`.
    pub fn properties(&self) -> Properties {
        let mut props = Properties::new();
        props.insert("year".into(), json!(self.year));
        match self.level {
            PeriodLevel::Year => {
                props.insert("yearString".into(), json!(self.id));
            }
            PeriodLevel::Quarter => {
                props.insert("quarter".into(), json!(self.quarter));
                props.insert("yearQuarter".into(), json!(self.id));
            }
            PeriodLevel::Month => {
                props.insert("quarter".into(), json!(self.quarter));
                props.insert("month".into(), json!(self.month));
                props.insert("yearMonth".into(), json!(self.id));
            }
            PeriodLevel::Day => {
                props.insert("month".into(), json!(self.month));
                props.insert("day".into(), json!(self.day));
                props.insert("date".into(), json!(self.id));
            }
        }
        props
    }

}

/// Years, quarters and months for `[start_year, end_year]`, parents first.
pub fn hierarchy(start_year: i32, end_year: i32) -> Vec<Period> {
    let years: Vec<i32> = (start_year..=end_year).collect();
    let mut periods: Vec<Period> = years.iter().map(|y| Period::year(*y)).collect();
    periods.extend(years.iter().flat_map(|y| (1..=4).map(move |q| Period::quarter(*y, q))));
    periods.extend(years.iter().flat_map(|y| (1..=12).map(move |m| Period::month(*y, m))));
    periods
}

/// Day periods from `start` to `end` inclusive.
pub fn day_range(start: NaiveDate, end: NaiveDate) -> Vec<Period> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .map(Period::day)
        .collect()
}

/// Parse the calendar date at the start of a date or datetime string.
pub fn parse_fact_date(value: &str) -> Option<NaiveDate> {
    let prefix = value.trim().get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

/// Month identifier a fact date belongs to (`2025-01-15T08:00:00Z` → `2025-01`).
pub fn month_id_for(value: &str) -> Option<String> {
    parse_fact_date(value).map(|d| month_id(d.year(), d.month()))
}

pub fn quarter_of(month: u32) -> u32 {
    (month.saturating_sub(1)) / 3 + 1
}

fn quarter_id(year: i32, quarter: u32) -> String {
    format!("{year}-Q{quarter}")
}

fn month_id(year: i32, month: u32) -> String {
    format!("{year}-{month:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_is_parent_first() {
        let periods = hierarchy(2025, 2026);
        assert_eq!(periods.len(), 2 + 8 + 24);
        assert_eq!(periods[0].id, "2025");
        assert_eq!(periods[2].id, "2025-Q1");
        assert_eq!(periods[2].parent_id.as_deref(), Some("2025"));

        let march = periods.iter().find(|p| p.id == "2026-03").unwrap();
        assert_eq!(march.parent_id.as_deref(), Some("2026-Q1"));
        let october = periods.iter().find(|p| p.id == "2025-10").unwrap();
        assert_eq!(october.parent_id.as_deref(), Some("2025-Q4"));
    }

    #[test]
    fn test_day_range_inclusive() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let ids: Vec<String> = day_range(start, end).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["2024-02-28", "2024-02-29", "2024-03-01"]);
    }

    #[test]
    fn test_month_truncation() {
        assert_eq!(month_id_for("2025-01-15"), Some("2025-01".to_string()));
        assert_eq!(month_id_for("2025-12-01T23:59:00Z"), Some("2025-12".to_string()));
        assert_eq!(month_id_for("15/01/2025"), None);
        assert_eq!(month_id_for(""), None);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("Month".parse::<PeriodLevel>().unwrap(), PeriodLevel::Month);
        assert!("week".parse::<PeriodLevel>().is_err());
    }
}
