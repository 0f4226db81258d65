//! HTTP provider client for the racing results API
//!
//! Issues `GET {base}/v1/results` with HTTP basic auth and maps each response
//! status onto a [`ProviderError`] class. Retrying, pacing and pagination are
//! the fetch client's job; this client performs exactly one request per call.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{Page, PageResponse, ProviderClient, ProviderError};
use crate::RegionFilter;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.theracingapi.com";

/// Time to establish a TCP connection.
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Overall time for one request.
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Error bodies are truncated to this many characters in messages.
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Connection settings for [`HttpProviderClient`].
///
/// Credentials are only passed through to the provider; they are never
/// persisted by the backfill.
#[derive(Clone)]
pub struct ProviderConfig {
    /// API root, without trailing slash
    pub base_url: String,
    /// Basic-auth username
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ProviderConfig {
    /// Config for `base_url` with the given credentials and default timeouts.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            connect_timeout: Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Read `RACING_API_BASE_URL`, `RACING_API_USERNAME` and `RACING_API_PASSWORD`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("RACING_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            std::env::var("RACING_API_USERNAME").unwrap_or_default(),
            std::env::var("RACING_API_PASSWORD").unwrap_or_default(),
        )
    }
}

/// Wire shape of one results page.
#[derive(Debug, Deserialize)]
struct ResultsPage {
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    total: Option<usize>,
    #[serde(default)]
    skip: Option<usize>,
}

/// Provider client backed by `reqwest`.
pub struct HttpProviderClient {
    client: Client,
    config: ProviderConfig,
}

impl HttpProviderClient {
    /// Build the client with explicit timeouts.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// API root in use.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn query(
        date: NaiveDate,
        region: &RegionFilter,
        skip: usize,
        limit: usize,
    ) -> Vec<(&'static str, String)> {
        let day = date.format("%Y-%m-%d").to_string();
        let mut params = vec![
            ("start_date", day.clone()),
            ("end_date", day),
            ("limit", limit.to_string()),
            ("skip", skip.to_string()),
        ];
        params.extend(region.codes().iter().map(|code| ("region", code.clone())));
        params
    }
}

/// Parse a `Retry-After` header given in seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn truncate(body: String) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body
    } else {
        body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>() + "..."
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else if err.is_connect() {
        ProviderError::Connect(err.to_string())
    } else {
        ProviderError::Transport(err.to_string())
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn fetch_page(
        &self,
        date: NaiveDate,
        region: &RegionFilter,
        skip: usize,
        limit: usize,
    ) -> Result<PageResponse, ProviderError> {
        let url = format!("{}/v1/results", self.config.base_url);
        debug!(%url, %date, %region, skip, limit, "Requesting results page");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&Self::query(date, region, skip, limit))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => return Ok(PageResponse::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ProviderError::Auth {
                    status: status.as_u16(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(ProviderError::Throttled {
                    retry_after: parse_retry_after(response.headers()),
                })
            }
            _ => {}
        }

        if status.is_server_error() || status.is_client_error() {
            let body = truncate(response.text().await.unwrap_or_default());
            return Err(if status.is_server_error() {
                ProviderError::Server {
                    status: status.as_u16(),
                    message: body,
                }
            } else {
                ProviderError::Client {
                    status: status.as_u16(),
                    message: body,
                }
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        let page: ResultsPage =
            serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))?;

        let received = page.results.len();
        let offset = page.skip.unwrap_or(skip);
        let has_more = match page.total {
            Some(total) => received > 0 && offset + received < total,
            // Without a total, a full page implies there may be more
            None => received >= limit && received > 0,
        };

        Ok(PageResponse::Page(Page {
            records: page.results,
            has_more,
        }))
    }
}
