//! Configuration for the API client and the sync pipeline.
//!
//! Values normally come from CLI flags or the environment; every struct
//! also deserializes from TOML and has defaults matching the deployment
//! most syncs run with.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// How the client proves its identity to the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// OAuth 2.0 client-credentials grant.
    ClientCredentials { client_id: String, client_secret: String },
    /// Static key sent as the bearer token.
    ApiKey { key: String },
}

/// Where the next-page cursor is read from. One mechanism per API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "location", content = "name", rename_all = "snake_case")]
pub enum CursorLocation {
    Header(String),
    BodyField(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationConfig {
    pub cursor: CursorLocation,
    /// Query parameter carrying the cursor on follow-up requests.
    pub page_param: String,
    /// Response body field holding the page items.
    pub items_field: String,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            cursor: CursorLocation::Header("NextPageToken".to_string()),
            page_param: "pageToken".to_string(),
            items_field: "items".to_string(),
        }
    }
}

/// Remote API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub credentials: Credentials,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Length of one backoff unit; the n-th retry waits `2^n` units.
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_token_path() -> String {
    "/oauth/token".to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_request_timeout() -> u64 {
    60
}

fn default_backoff_unit() -> u64 {
    1000
}

fn default_user_agent() -> String {
    format!("apigraph-sync/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.example.com/v1".to_string(),
            credentials: Credentials::ClientCredentials {
                client_id: String::new(),
                client_secret: String::new(),
            },
            token_path: default_token_path(),
            max_retries: default_max_retries(),
            request_timeout_secs: default_request_timeout(),
            backoff_unit_ms: default_backoff_unit(),
            pagination: PaginationConfig::default(),
            user_agent: default_user_agent(),
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Check required settings before any request is made.
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(CoreError::config("API base URL is required"));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(CoreError::config(format!(
                "API base URL must be http(s): {}",
                self.base_url
            )));
        }
        match &self.credentials {
            Credentials::ClientCredentials { client_id, client_secret }
                if client_id.is_empty() || client_secret.is_empty() =>
            {
                return Err(CoreError::config(
                    "Either OAuth credentials (client id and secret) or an API key is required",
                ));
            }
            Credentials::ApiKey { key } if key.is_empty() => {
                return Err(CoreError::config("API key is empty"));
            }
            _ => {}
        }
        if self.max_retries == 0 {
            return Err(CoreError::config("max_retries must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::config("request timeout must be positive"));
        }
        if self.pagination.page_param.is_empty() || self.pagination.items_field.is_empty() {
            return Err(CoreError::config("pagination page_param and items_field are required"));
        }
        Ok(())
    }
}

/// Inclusive date range requested from a transactional endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookbackWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Pipeline behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub default_days_back: u32,
    /// Per-entity lookback overrides, keyed by entity name (`workhours`).
    pub days_back: BTreeMap<String, u32>,
    /// Per-entity fixed start dates; these win over `days_back`.
    pub start_dates: BTreeMap<String, NaiveDate>,
    pub enable_metrics: bool,
    pub enable_analytics: bool,
    pub create_indexes: bool,
    pub period_start_year: i32,
    pub period_end_year: i32,
    pub build_day_nodes: bool,
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            default_days_back: 365,
            days_back: BTreeMap::new(),
            start_dates: BTreeMap::new(),
            enable_metrics: true,
            enable_analytics: true,
            create_indexes: true,
            period_start_year: 2020,
            period_end_year: 2030,
            build_day_nodes: false,
            dry_run: false,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::config("batch_size must be at least 1"));
        }
        if self.period_start_year > self.period_end_year {
            return Err(CoreError::config(format!(
                "period range is empty: {} > {}",
                self.period_start_year, self.period_end_year
            )));
        }
        Ok(())
    }

    /// Date range to request for `entity`, ending at `today`.
    pub fn lookback_window(&self, entity: &str, today: NaiveDate) -> LookbackWindow {
        let entity = entity.to_ascii_lowercase();
        if let Some(start) = self.start_dates.get(&entity) {
            return LookbackWindow { start: *start, end: today };
        }
        let days = self.days_back.get(&entity).copied().unwrap_or(self.default_days_back);
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        LookbackWindow { start, end: today }
    }

    /// Read `SYNC_<ENTITY>_DAYS_BACK` and `SYNC_<ENTITY>_START_DATE` for each entity.
    pub fn apply_env_overrides(&mut self, entities: &[&str]) -> CoreResult<()> {
        for entity in entities {
            let upper = entity.to_ascii_uppercase();
            let name = entity.to_ascii_lowercase();

            if let Ok(value) = std::env::var(format!("SYNC_{upper}_DAYS_BACK")) {
                let days = value.trim().parse::<u32>().map_err(|_| {
                    CoreError::config(format!("SYNC_{upper}_DAYS_BACK is not a number: {value}"))
                })?;
                self.days_back.insert(name.clone(), days);
            }
            if let Ok(value) = std::env::var(format!("SYNC_{upper}_START_DATE")) {
                let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
                    .map_err(|_| CoreError::InvalidDate { value: value.clone() })?;
                self.start_dates.insert(name, date);
            }
        }
        Ok(())
    }
}
