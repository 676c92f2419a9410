use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::clock::{Clock, SystemClock};
use crate::error::ClientError;
use crate::token::{CachedToken, DEFAULT_TOKEN_TTL_SECS, TokenPhase, TokenResponse, TokenState};

pub const DEFAULT_BASE_URL: &str = "https://api.kayzen.io/v1";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

const AUTH_TOKEN_PATH: &str = "/auth/token";
const REPORTS_PATH: &str = "/reports";

/// API location and secrets, fixed for the lifetime of a client.
#[derive(Clone)]
pub struct Credentials {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Token lifetime used when the auth endpoint does not declare one
    pub default_token_ttl: Duration,
    pub http_timeout: std::time::Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_token_ttl: Duration::seconds(DEFAULT_TOKEN_TTL_SECS),
            http_timeout: std::time::Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

/// Body of `POST /reports`. Every field is forwarded unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRequest {
    pub report_type: String,
    pub start_date: String,
    pub end_date: String,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
}

impl ReportRequest {
    pub fn to_body(&self) -> Value {
        json!({
            "report_type": self.report_type,
            "start_date": self.start_date,
            "end_date": self.end_date,
            "dimensions": self.dimensions,
            "metrics": self.metrics,
        })
    }
}

/// Optional date filters for report results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultsWindow {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl ResultsWindow {
    fn query_pairs(&self) -> Vec<(&'static str, &str)> {
        let mut pairs = Vec::new();
        if let Some(start) = &self.start_date {
            pairs.push(("start_date", start.as_str()));
        }
        if let Some(end) = &self.end_date {
            pairs.push(("end_date", end.as_str()));
        }
        pairs
    }
}

/// Client for the Kayzen reporting API.
///
/// Holds the only copy of the bearer token. The cache lock is held across a
/// refresh, so callers that find the token expired at the same time share one
/// credential exchange.
pub struct ApiClient {
    credentials: Credentials,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
    default_token_ttl: Duration,
    token: Mutex<TokenState>,
}

impl ApiClient {
    pub fn new(credentials: Credentials, options: ClientOptions) -> Result<Self, ClientError> {
        // Fail at startup rather than on the first tool call.
        reqwest::Url::parse(&credentials.base_url).map_err(|e| ClientError::InvalidUrl {
            url: credentials.base_url.clone(),
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(options.http_timeout)
            .build()?;
        Ok(Self {
            credentials,
            http,
            clock: Arc::new(SystemClock),
            default_token_ttl: options.default_token_ttl,
            token: Mutex::new(TokenState::Absent),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.credentials.base_url
    }

    pub async fn token_phase(&self) -> TokenPhase {
        self.token.lock().await.phase_at(self.clock.now())
    }

    pub async fn token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.token.lock().await.expires_at()
    }

    /// Return the cached bearer token, exchanging credentials for a new one
    /// when none is cached or the cached one has expired.
    ///
    /// On failure the cache keeps whatever it held before.
    pub async fn get_auth_token(&self) -> Result<String, ClientError> {
        let mut state = self.token.lock().await;
        let now = self.clock.now();
        if let Some(token) = state.usable_at(now) {
            return Ok(token.to_string());
        }

        tracing::debug!(phase = state.phase_at(now).as_str(), "requesting auth token");
        let fresh = self.exchange_credentials().await?;
        tracing::info!(expires_at = %fresh.expires_at, "auth token refreshed");
        let value = fresh.value.clone();
        state.replace(fresh);
        Ok(value)
    }

    async fn exchange_credentials(&self) -> Result<CachedToken, ClientError> {
        let url = self.endpoint(AUTH_TOKEN_PATH)?;
        let response = self
            .http
            .post(url)
            .json(&json!({
                "api_key": self.credentials.api_key,
                "api_secret": self.credentials.api_secret,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(err) => {
                    tracing::debug!(error = %err, "could not read auth error body");
                    String::new()
                }
            };
            tracing::warn!(status = status.as_u16(), "auth token exchange rejected");
            return Err(ClientError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        let parsed: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::AuthResponse(e.to_string()))?;
        if parsed.token.trim().is_empty() {
            return Err(ClientError::AuthResponse("token was empty".to_string()));
        }

        Ok(CachedToken::issue(
            parsed.token,
            self.clock.now(),
            parsed.expires_in,
            self.default_token_ttl,
        ))
    }

    /// Issue an authenticated call and return the parsed JSON body.
    ///
    /// An empty success body comes back as `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        self.request_with_query(method, path, &[], body).await
    }

    async fn request_with_query(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let span = tracing::debug_span!("kayzen_request", method = %method, path);
        async {
            let token = self.get_auth_token().await?;
            let mut url = self.endpoint(path)?;
            if !query.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in query {
                    pairs.append_pair(key, value);
                }
            }

            let mut request = self
                .http
                .request(method.clone(), url)
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(CONTENT_TYPE, "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            let bytes = response.bytes().await?;
            tracing::debug!(status = status.as_u16(), bytes = bytes.len(), "response received");

            if !status.is_success() {
                return Err(ClientError::Request {
                    method: method.to_string(),
                    path: path.to_string(),
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&bytes).to_string(),
                });
            }
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
                path: path.to_string(),
                source,
            })
        }
        .instrument(span)
        .await
    }

    pub async fn create_report(&self, report: &ReportRequest) -> Result<Value, ClientError> {
        self.request(Method::POST, REPORTS_PATH, Some(&report.to_body()))
            .await
    }

    pub async fn list_reports(&self) -> Result<Value, ClientError> {
        self.request(Method::GET, REPORTS_PATH, None).await
    }

    pub async fn get_report_status(&self, report_id: &str) -> Result<Value, ClientError> {
        let path = report_path(report_id, "status")?;
        self.request(Method::GET, &path, None).await
    }

    pub async fn get_report_results(&self, report_id: &str) -> Result<Value, ClientError> {
        self.get_report_results_in_window(report_id, &ResultsWindow::default())
            .await
    }

    pub async fn get_report_results_in_window(
        &self,
        report_id: &str,
        window: &ResultsWindow,
    ) -> Result<Value, ClientError> {
        let path = report_path(report_id, "results")?;
        self.request_with_query(Method::GET, &path, &window.query_pairs(), None)
            .await
    }

    fn endpoint(&self, path: &str) -> Result<reqwest::Url, ClientError> {
        let raw = format!(
            "{}{}",
            self.credentials.base_url.trim_end_matches('/'),
            path
        );
        reqwest::Url::parse(&raw).map_err(|e| ClientError::InvalidUrl {
            url: raw,
            reason: e.to_string(),
        })
    }
}

/// `/reports/{id}/{leaf}`, with the id forwarded exactly as given.
///
/// Ids that URL parsing would rewrite are rejected: dot segments, separators,
/// percent escapes, control characters and surrounding whitespace.
fn report_path(report_id: &str, leaf: &str) -> Result<String, ClientError> {
    let rewritten = report_id.is_empty()
        || report_id.trim() != report_id
        || matches!(report_id, "." | "..")
        || report_id.contains(['/', '\\', '?', '#', '%'])
        || report_id.chars().any(char::is_control);
    if rewritten {
        return Err(ClientError::InvalidReportId(report_id.to_string()));
    }
    Ok(format!("{REPORTS_PATH}/{report_id}/{leaf}"))
}
