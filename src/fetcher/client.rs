//! Rate-limited, retrying fetch client
//!
//! Wraps a [`ProviderClient`] with:
//! - the minimum-interval rate gate (every page, every attempt)
//! - the retry policy (linear backoff, longer waits when throttled,
//!   immediate failure on auth errors)
//! - pagination, so one call returns every entry for a day
//! - shared request/retry/error counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::retry_formatter::{RetryContext, RetryErrorType};
use super::{FetchError, PageResponse, ProviderClient, ProviderError};
use crate::backfill::config::{FetchPolicy, MAX_PAGES_PER_UNIT};
use crate::backfill::rate_limit::RateLimiter;
use crate::backfill::BackfillError;
use crate::metrics;
use crate::{RawPayload, WorkUnit};

/// Result of fetching one unit.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// The provider returned at least one entry
    Data(RawPayload),
    /// Not found, or zero entries: a successful, empty day
    NoData,
}

/// Counters shared between the fetch client, the engine and diagnostics.
#[derive(Debug, Default)]
pub struct FetchStats {
    requests: AtomicU64,
    retries: AtomicU64,
    throttled: AtomicU64,
    terminal_errors: AtomicU64,
}

impl FetchStats {
    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        metrics::record_request();
    }

    fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_terminal_error(&self, error_type: RetryErrorType) {
        self.terminal_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_fetch_error(error_type.label());
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            terminal_errors: self.terminal_errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`FetchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStatsSnapshot {
    /// Requests issued (every attempt counts)
    pub requests: u64,
    /// Retries performed
    pub retries: u64,
    /// Throttled responses received
    pub throttled: u64,
    /// Page fetches that ended in a terminal error
    pub terminal_errors: u64,
}

/// Rate-limited, retrying, paginating wrapper around a provider client.
pub struct FetchClient {
    provider: Arc<dyn ProviderClient>,
    limiter: RateLimiter,
    policy: FetchPolicy,
    stats: Arc<FetchStats>,
}

impl FetchClient {
    /// Create a fetch client for `provider` under `policy`.
    pub fn new(provider: Arc<dyn ProviderClient>, policy: FetchPolicy) -> Result<Self, BackfillError> {
        policy.validate()?;
        let limiter = RateLimiter::min_interval(policy.min_interval());
        Ok(Self {
            provider,
            limiter,
            policy,
            stats: Arc::new(FetchStats::default()),
        })
    }

    /// Shared counters.
    pub fn stats(&self) -> Arc<FetchStats> {
        Arc::clone(&self.stats)
    }

    /// Active policy.
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetch every page for `unit`.
    ///
    /// Not-found on the first page and an empty first page both mean
    /// [`FetchOutcome::NoData`]. Any page failing terminally fails the unit,
    /// and so does a day still reporting more results after
    /// [`MAX_PAGES_PER_UNIT`] pages.
    pub async fn fetch(&self, unit: &WorkUnit) -> Result<FetchOutcome, FetchError> {
        let mut entries = Vec::new();
        let mut pages = 0u32;

        loop {
            let skip = entries.len();
            match self.fetch_page_with_retry(unit, skip).await? {
                PageResponse::NotFound => {
                    debug!(date = %unit.date(), pages, "Provider reported no results");
                    break;
                }
                PageResponse::Page(page) => {
                    pages += 1;
                    let received = page.records.len();
                    entries.extend(page.records);

                    if !page.has_more || received == 0 {
                        break;
                    }
                    if pages >= MAX_PAGES_PER_UNIT {
                        error!(
                            date = %unit.date(),
                            pages,
                            entries = entries.len(),
                            "Page cap reached with more results pending"
                        );
                        return Err(FetchError::PageCapExceeded {
                            pages,
                            entries: entries.len(),
                        });
                    }
                }
            }
        }

        if entries.is_empty() {
            return Ok(FetchOutcome::NoData);
        }

        debug!(date = %unit.date(), pages, entries = entries.len(), "Fetched unit");
        Ok(FetchOutcome::Data(RawPayload {
            date: unit.date(),
            entries,
            pages,
        }))
    }

    async fn fetch_page_with_retry(
        &self,
        unit: &WorkUnit,
        skip: usize,
    ) -> Result<PageResponse, FetchError> {
        let max_attempts = self.policy.max_attempts;
        let mut attempt = 0u32;
        let mut last_retry: Option<RetryContext> = None;

        loop {
            attempt += 1;
            let waited = self.limiter.acquire().await;
            metrics::record_rate_gate_wait(waited);
            self.stats.record_request();

            let error = match self
                .provider
                .fetch_page(unit.date(), unit.region(), skip, self.policy.page_size)
                .await
            {
                Ok(response) => {
                    if let Some(mut context) = last_retry.take() {
                        context.attempt = attempt;
                        info!("{}", context.format_success());
                    }
                    return Ok(response);
                }
                Err(error) => error,
            };

            let error_type = RetryErrorType::from_provider_error(&error);
            if matches!(error, ProviderError::Throttled { .. }) {
                self.stats.record_throttled();
            }

            if !error_type.is_retryable() {
                self.stats.record_terminal_error(error_type);
                error!(date = %unit.date(), attempt, error = %error, "Non-retryable provider error");
                return Err(match error {
                    ProviderError::Auth { status } => FetchError::Auth { status },
                    other => FetchError::NonRetryable(other),
                });
            }

            let backoff = match &error {
                ProviderError::Throttled { retry_after } => {
                    self.policy.throttle_backoff(attempt, *retry_after)
                }
                _ => self.policy.transient_backoff(attempt),
            };
            let context = RetryContext::new(attempt, max_attempts, &error, backoff, unit.date(), skip);

            if attempt >= max_attempts {
                self.stats.record_terminal_error(error_type);
                error!("{}", context.format_failure());
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                });
            }

            warn!(
                date = %unit.date(),
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "{}",
                context.format_retry()
            );
            self.stats.record_retry();
            metrics::record_retry_backoff(backoff, attempt);
            last_retry = Some(context);
            tokio::time::sleep(backoff).await;
        }
    }
}
