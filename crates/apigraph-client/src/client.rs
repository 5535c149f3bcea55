//! API client: authentication, bounded retry, pagination.

use std::collections::BTreeMap;
use std::time::Duration;

use apigraph_core::{ApiConfig, Credentials, CursorLocation, Record};
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::session::AuthSession;

/// Query parameters sent with a request; the cursor parameter is added per page.
pub type QueryParams = BTreeMap<String, String>;

/// One page of results and the cursor to the next, if any.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Record>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Result of one HTTP attempt, consumed by the retry loop in [`ApiClient::fetch_page`].
#[derive(Debug)]
enum AttemptOutcome {
    Success(Page),
    ReauthRequired,
    RateLimited,
    ServerError(StatusCode),
    PermanentError { status: StatusCode, body: String },
    TransportError(reqwest::Error),
    InvalidBody(String),
}

/// Client for the remote REST API.
///
/// Owns its [`AuthSession`]; every operation that may refresh the token
/// takes `&mut self`.
pub struct ApiClient {
    config: ApiConfig,
    http: Client,
    session: AuthSession,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> ClientResult<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config,
            http,
            session: AuthSession::default(),
        })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    /// Obtain a fresh bearer token. Logs and returns `false` on any failure.
    pub async fn authenticate(&mut self) -> bool {
        info!("Authenticating with API");
        let credentials = self.config.credentials.clone();
        match credentials {
            Credentials::ApiKey { key } => {
                self.session.set(key, None, Utc::now());
                info!("Using static API key");
                true
            }
            Credentials::ClientCredentials {
                client_id,
                client_secret,
            } => match self.request_token(&client_id, &client_secret).await {
                Ok(token) => {
                    self.session.set(token.access_token, token.expires_in, Utc::now());
                    info!(expires_in = ?token.expires_in, "Authentication successful");
                    true
                }
                Err(e) => {
                    error!(error = %e, "Authentication failed");
                    self.session.clear();
                    false
                }
            },
        }
    }

    async fn request_token(&self, client_id: &str, client_secret: &str) -> ClientResult<TokenResponse> {
        let url = self.url(&self.config.token_path);
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "grant_type": "client_credentials",
                "client_id": client_id,
                "client_secret": client_secret,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Authentication(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            ClientError::Authentication(format!("token response is not valid: {e}"))
        })?;
        if token.access_token.is_empty() {
            return Err(ClientError::Authentication("token response has an empty access_token".into()));
        }
        Ok(token)
    }

    /// Fetch every page behind `endpoint` and return the accumulated items.
    ///
    /// Stops when the API stops sending a cursor, or repeats the one just used.
    pub async fn fetch_all(&mut self, endpoint: &str, params: &QueryParams) -> ClientResult<Vec<Record>> {
        let url = self.url(endpoint);
        let page_param = self.config.pagination.page_param.clone();
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page_number = 1usize;

        loop {
            let mut page_params = params.clone();
            if let Some(c) = &cursor {
                page_params.insert(page_param.clone(), c.clone());
            }

            debug!(endpoint, page = page_number, "Fetching page");
            let page = self.fetch_page(&url, &page_params).await?;
            let received = page.items.len();
            all.extend(page.items);
            debug!(endpoint, page = page_number, received, total = all.len(), "Page received");

            match page.cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(endpoint, cursor = %next, "API repeated the previous cursor; stopping");
                    break;
                }
                Some(next) => {
                    cursor = Some(next);
                    page_number += 1;
                }
                None => break,
            }
        }

        info!(endpoint, pages = page_number, records = all.len(), "Fetched all pages");
        Ok(all)
    }

    /// Fetch one page, retrying transient failures up to `max_retries` attempts.
    ///
    /// A 401 triggers at most one re-authentication per call; a second 401
    /// is returned as [`ClientError::Unauthorized`]. The request repeated
    /// after re-authenticating does not use up an attempt.
    pub async fn fetch_page(&mut self, url: &str, params: &QueryParams) -> ClientResult<Page> {
        if self.session.is_expired(Utc::now()) {
            info!("Access token expired; refreshing");
            if !self.authenticate().await {
                return Err(ClientError::Authentication("token refresh failed".into()));
            }
        }

        let attempts = self.config.max_retries;
        let mut reauthenticated = false;
        let mut last_error = String::from("no attempt made");

        let mut attempt = 0;
        while attempt < attempts {
            match self.attempt(url, params).await {
                AttemptOutcome::Success(page) => return Ok(page),
                AttemptOutcome::ReauthRequired => {
                    if reauthenticated {
                        return Err(ClientError::Unauthorized { url: url.to_string() });
                    }
                    reauthenticated = true;
                    warn!(url, attempt = attempt + 1, "Received 401; re-authenticating");
                    if !self.authenticate().await {
                        return Err(ClientError::Authentication(format!(
                            "re-authentication after 401 from {url} failed"
                        )));
                    }
                    last_error = "401 Unauthorized".to_string();
                    continue;
                }
                AttemptOutcome::RateLimited => {
                    last_error = "429 Too Many Requests".to_string();
                }
                AttemptOutcome::ServerError(status) => {
                    last_error = status.to_string();
                }
                AttemptOutcome::TransportError(e) => {
                    last_error = e.to_string();
                }
                AttemptOutcome::PermanentError { status, body } => {
                    error!(url, status = status.as_u16(), "Request rejected");
                    return Err(ClientError::PermanentRequest {
                        status: status.as_u16(),
                        url: url.to_string(),
                        body,
                    });
                }
                AttemptOutcome::InvalidBody(message) => {
                    return Err(ClientError::InvalidResponse {
                        url: url.to_string(),
                        message,
                    });
                }
            }

            if attempt + 1 < attempts {
                let wait = self.backoff_delay(attempt);
                warn!(
                    url,
                    attempt = attempt + 1,
                    wait_ms = wait.as_millis() as u64,
                    error = %last_error,
                    "Transient failure; backing off"
                );
                tokio::time::sleep(wait).await;
            }
            attempt += 1;
        }

        error!(url, attempts, error = %last_error, "Max retries exceeded");
        Err(ClientError::MaxRetriesExceeded {
            url: url.to_string(),
            attempts,
            last_error,
        })
    }

    /// Wait before retry number `attempt + 1`: `2^attempt` backoff units.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.config
            .backoff_unit()
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    async fn attempt(&self, url: &str, params: &QueryParams) -> AttemptOutcome {
        let mut request = self.http.get(url).query(params);
        if let Some(token) = self.session.token() {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return AttemptOutcome::TransportError(e),
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return AttemptOutcome::ReauthRequired;
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return AttemptOutcome::RateLimited;
        }
        if status.is_server_error() {
            return AttemptOutcome::ServerError(status);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return AttemptOutcome::PermanentError { status, body };
        }

        let header_cursor = match &self.config.pagination.cursor {
            CursorLocation::Header(name) => response
                .headers()
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            CursorLocation::BodyField(_) => None,
        };

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return AttemptOutcome::TransportError(e),
        };
        let body: Value = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            Err(e) => return AttemptOutcome::InvalidBody(format!("body is not JSON: {e}")),
        };

        AttemptOutcome::Success(self.parse_page(body, header_cursor))
    }

    fn parse_page(&self, body: Value, header_cursor: Option<String>) -> Page {
        let pagination = &self.config.pagination;
        let cursor = match &pagination.cursor {
            CursorLocation::Header(_) => header_cursor,
            CursorLocation::BodyField(field) => body.get(field).and_then(Value::as_str).map(str::to_string),
        }
        .filter(|c| !c.trim().is_empty());

        let items = match body {
            Value::Object(mut map) => match map.remove(&pagination.items_field) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => {
                    debug!(field = %pagination.items_field, "Response has no items field");
                    Vec::new()
                }
                Some(_) => {
                    warn!(field = %pagination.items_field, "Items field is not an array");
                    Vec::new()
                }
            },
            Value::Array(items) => items,
            _ => Vec::new(),
        };

        let items = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                other => {
                    warn!(item = %other, "Skipping non-object item");
                    None
                }
            })
            .collect();

        Page { items, cursor }
    }

    fn url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }
}
