//! Connection and pipeline flags shared by the commands.
//!
//! Every flag can also come from the environment. Values left unset fall
//! back to the `--config` file, then to the built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use apigraph_core::{ApiConfig, Credentials, CursorLocation, SyncConfig};
use apigraph_graph::GraphConfig;
use clap::Args;

#[derive(Args, Debug, Clone)]
pub struct ApiArgs {
    /// Base URL of the remote API
    #[arg(long, env = "API_URL")]
    pub api_url: String,

    /// OAuth client id
    #[arg(long, env = "API_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret
    #[arg(long, env = "API_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Static API key, used instead of client credentials
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Token endpoint path
    #[arg(long, env = "API_TOKEN_PATH")]
    pub token_path: Option<String>,

    /// Attempts per request before giving up
    #[arg(long, env = "SYNC_MAX_RETRIES")]
    pub max_retries: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long, env = "SYNC_REQUEST_TIMEOUT")]
    pub request_timeout: Option<u64>,

    /// Read the next-page cursor from this response header
    #[arg(long, env = "API_CURSOR_HEADER", conflicts_with = "cursor_field")]
    pub cursor_header: Option<String>,

    /// Read the next-page cursor from this body field
    #[arg(long, env = "API_CURSOR_FIELD")]
    pub cursor_field: Option<String>,

    /// Query parameter carrying the cursor
    #[arg(long, env = "API_PAGE_PARAM")]
    pub page_param: Option<String>,

    /// Body field holding the page items
    #[arg(long, env = "API_ITEMS_FIELD")]
    pub items_field: Option<String>,
}

impl ApiArgs {
    pub fn to_config(&self) -> Result<ApiConfig> {
        let credentials = match (&self.api_key, &self.client_id, &self.client_secret) {
            (Some(key), _, _) => Credentials::ApiKey { key: key.clone() },
            (None, Some(client_id), Some(client_secret)) => Credentials::ClientCredentials {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
            },
            _ => bail!("Set API_KEY, or both API_CLIENT_ID and API_CLIENT_SECRET"),
        };

        let mut config = ApiConfig {
            base_url: self.api_url.clone(),
            credentials,
            ..ApiConfig::default()
        };
        if let Some(path) = &self.token_path {
            config.token_path = path.clone();
        }
        if let Some(retries) = self.max_retries {
            config.max_retries = retries;
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout_secs = timeout;
        }
        if let Some(header) = &self.cursor_header {
            config.pagination.cursor = CursorLocation::Header(header.clone());
        }
        if let Some(field) = &self.cursor_field {
            config.pagination.cursor = CursorLocation::BodyField(field.clone());
        }
        if let Some(param) = &self.page_param {
            config.pagination.page_param = param.clone();
        }
        if let Some(field) = &self.items_field {
            config.pagination.items_field = field.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct GraphArgs {
    /// Neo4j Bolt URI
    #[arg(long, env = "NEO4J_URI", default_value = "bolt://localhost:7687")]
    pub neo4j_uri: String,

    #[arg(long, env = "NEO4J_USERNAME", default_value = "neo4j")]
    pub neo4j_user: String,

    #[arg(long, env = "NEO4J_PASSWORD", hide_env_values = true, default_value = "")]
    pub neo4j_password: String,

    #[arg(long, env = "NEO4J_DATABASE", default_value = "neo4j")]
    pub neo4j_database: String,

    /// Connection pool size
    #[arg(long, env = "NEO4J_MAX_CONNECTIONS", default_value_t = 4)]
    pub neo4j_max_connections: usize,
}

impl GraphArgs {
    pub fn to_config(&self) -> GraphConfig {
        GraphConfig {
            uri: self.neo4j_uri.clone(),
            user: self.neo4j_user.clone(),
            password: self.neo4j_password.clone(),
            database: self.neo4j_database.clone(),
            max_connections: self.neo4j_max_connections,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct PipelineArgs {
    /// TOML file with pipeline settings
    #[arg(long, env = "SYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Nodes per reference-data batch
    #[arg(long, env = "SYNC_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Default lookback for transactional entities, in days
    #[arg(long, env = "SYNC_DAYS_BACK")]
    pub days_back: Option<u32>,

    #[arg(long, env = "SYNC_ENABLE_METRICS")]
    pub enable_metrics: Option<bool>,

    #[arg(long, env = "SYNC_ENABLE_ANALYTICS")]
    pub enable_analytics: Option<bool>,

    #[arg(long, env = "SYNC_CREATE_INDEXES")]
    pub create_indexes: Option<bool>,

    /// First year of the period index
    #[arg(long, env = "SYNC_PERIOD_START_YEAR")]
    pub period_start_year: Option<i32>,

    /// Last year of the period index
    #[arg(long, env = "SYNC_PERIOD_END_YEAR")]
    pub period_end_year: Option<i32>,

    /// Also build Day nodes
    #[arg(long, env = "SYNC_BUILD_DAY_NODES")]
    pub build_day_nodes: Option<bool>,

    /// Authenticate only; write nothing
    #[arg(long, env = "SYNC_DRY_RUN")]
    pub dry_run: bool,
}

impl PipelineArgs {
    /// Resolve the pipeline settings. `entities` are the names that accept
    /// `SYNC_<ENTITY>_DAYS_BACK` and `SYNC_<ENTITY>_START_DATE`.
    pub fn to_config(&self, entities: &[&str]) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_file(path)?,
            None => SyncConfig::default(),
        };

        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        if let Some(days) = self.days_back {
            config.default_days_back = days;
        }
        if let Some(enabled) = self.enable_metrics {
            config.enable_metrics = enabled;
        }
        if let Some(enabled) = self.enable_analytics {
            config.enable_analytics = enabled;
        }
        if let Some(enabled) = self.create_indexes {
            config.create_indexes = enabled;
        }
        if let Some(year) = self.period_start_year {
            config.period_start_year = year;
        }
        if let Some(year) = self.period_end_year {
            config.period_end_year = year;
        }
        if let Some(enabled) = self.build_day_nodes {
            config.build_day_nodes = enabled;
        }
        config.dry_run |= self.dry_run;

        config.apply_env_overrides(entities)?;
        config.validate()?;
        Ok(config)
    }
}

fn load_config_file(path: &Path) -> Result<SyncConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_args() -> ApiArgs {
        ApiArgs {
            api_url: "https://api.example.com/v1".into(),
            client_id: None,
            client_secret: None,
            api_key: None,
            token_path: None,
            max_retries: None,
            request_timeout: None,
            cursor_header: None,
            cursor_field: None,
            page_param: None,
            items_field: None,
        }
    }

    #[test]
    fn test_api_key_wins_over_client_credentials() {
        let args = ApiArgs {
            api_key: Some("k-1".into()),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            ..api_args()
        };
        let config = args.to_config().unwrap();
        assert!(matches!(config.credentials, Credentials::ApiKey { ref key } if key == "k-1"));
    }

    #[test]
    fn test_missing_credentials_are_rejected() {
        let args = ApiArgs {
            client_id: Some("id".into()),
            ..api_args()
        };
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_cursor_field_and_retries() {
        let args = ApiArgs {
            api_key: Some("k".into()),
            cursor_field: Some("nextCursor".into()),
            max_retries: Some(5),
            ..api_args()
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.pagination.cursor, CursorLocation::BodyField("nextCursor".into()));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_flags_override_config_file() {
        let path = std::env::temp_dir().join(format!("apigraph-test-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "batch_size = 25\nenable_analytics = false\n\n[days_back]\nworkhours = 30\n",
        )
        .unwrap();

        let args = PipelineArgs {
            config: Some(path.clone()),
            batch_size: Some(50),
            ..PipelineArgs::default()
        };
        let config = args.to_config(&[]).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.batch_size, 50);
        assert!(!config.enable_analytics);
        assert!(config.enable_metrics);
        assert_eq!(config.days_back.get("workhours"), Some(&30));
    }

    #[test]
    fn test_invalid_pipeline_settings_are_rejected() {
        let args = PipelineArgs {
            period_start_year: Some(2030),
            period_end_year: Some(2020),
            ..PipelineArgs::default()
        };
        assert!(args.to_config(&[]).is_err());
    }
}
