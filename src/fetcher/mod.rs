//! Provider clients and the rate-limited fetch client
//!
//! The backfill core only depends on the [`ProviderClient`] contract: fetch one
//! page of results for a date and region filter. [`FetchClient`] wraps any
//! provider with the rate gate, the retry policy and pagination, and turns a
//! work unit into either a [`RawPayload`](crate::RawPayload) or "no data".

use crate::RegionFilter;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::time::Duration;

pub mod client;
pub mod http;
pub mod retry_formatter;

pub use client::{FetchClient, FetchOutcome, FetchStats, FetchStatsSnapshot};
pub use http::{HttpProviderClient, ProviderConfig};
pub use retry_formatter::{RetryContext, RetryErrorType};

/// One page of provider results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    /// Raw result entries
    pub records: Vec<serde_json::Value>,
    /// Whether another page follows
    pub has_more: bool,
}

/// Successful provider responses.
#[derive(Debug, Clone, PartialEq)]
pub enum PageResponse {
    /// A page of results (possibly empty)
    Page(Page),
    /// The provider has nothing for this date
    NotFound,
}

/// Failures reported by a provider client, one variant per handling class.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderError {
    /// Provider signalled throttling (HTTP 429)
    #[error("throttled by provider")]
    Throttled {
        /// Provider-requested wait, if any
        retry_after: Option<Duration>,
    },

    /// Credentials rejected (HTTP 401/403)
    #[error("authentication failed ({status})")]
    Auth {
        /// HTTP status code
        status: u16,
    },

    /// Server-side failure (HTTP 5xx)
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Request rejected as invalid (HTTP 4xx other than 401/403/404/429)
    #[error("client error {status}: {message}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response body excerpt
        message: String,
    },

    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Other transport failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Terminal failure of a unit fetch, after the retry policy gave up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    /// Credentials rejected; backoff cannot fix this
    #[error("authentication rejected by provider (HTTP {status})")]
    Auth {
        /// HTTP status code
        status: u16,
    },

    /// Response class that is never retried (bad request, malformed body)
    #[error("non-retryable provider error: {0}")]
    NonRetryable(ProviderError),

    /// The day has more pages than the fetch client will follow; the
    /// entries already received are discarded rather than loaded as a
    /// truncated day
    #[error("page cap exceeded: provider still had more results after {pages} pages ({entries} entries)")]
    PageCapExceeded {
        /// Pages received
        pages: u32,
        /// Entries received before giving up
        entries: usize,
    },

    /// Every attempt failed with a retryable error
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Message of the final error
        last_error: String,
    },
}

/// Provider contract consumed by the backfill core.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch one page of results for `date` restricted to `region`.
    ///
    /// # Arguments
    /// * `date` - Calendar day to fetch
    /// * `region` - Region filter (empty means all regions)
    /// * `skip` - Number of records already received for this date
    /// * `limit` - Page size
    async fn fetch_page(
        &self,
        date: NaiveDate,
        region: &RegionFilter,
        skip: usize,
        limit: usize,
    ) -> Result<PageResponse, ProviderError>;
}
