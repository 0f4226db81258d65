//! Backfill configuration and retry/backoff constants

use crate::RegionFilter;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::Duration;

use super::BackfillError;

/// Default request budget. 2 requests/second is the provider's basic-plan limit.
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

/// Default number of attempts per page (initial attempt included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Base delay for generic transient errors; grows linearly with the attempt number.
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 2_000;

/// Base delay after a throttled response. Kept well above the generic base so a
/// throttled retry always waits longer than any other retry at the same attempt.
pub const DEFAULT_THROTTLE_BACKOFF_MS: u64 = 10_000;

/// Ceiling for any single backoff wait.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Provider page size.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Safety cap on pages per day; a day never has anywhere near this many results.
pub const MAX_PAGES_PER_UNIT: u32 = 200;

/// Checkpoint interval (save state every N units).
/// At one unit per calendar day, an interruption loses at most ten days of progress.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 10;

/// Progress/ETA reporting interval in units.
pub const DEFAULT_PROGRESS_EVERY: usize = 10;

/// Default checkpoint file location.
pub const DEFAULT_CHECKPOINT_PATH: &str = "backfill_checkpoint.json";

/// Default error log location.
pub const DEFAULT_ERROR_LOG_PATH: &str = "backfill_errors.jsonl";

/// Longest gap the rate gate will impose between two requests.
pub const MAX_REQUEST_INTERVAL: Duration = Duration::from_secs(3600);

/// Minimum interval for a budget of `rate` requests per second.
///
/// `None` for non-positive or non-finite rates and for rates so low the
/// interval exceeds [`MAX_REQUEST_INTERVAL`].
pub fn request_interval(rate: f64) -> Option<Duration> {
    if !(rate.is_finite() && rate > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate)
        .ok()
        .filter(|interval| *interval <= MAX_REQUEST_INTERVAL)
}

/// Calculate a linear backoff delay: `base * attempt`, capped at `max`.
///
/// `attempt` is 1-based (the attempt that just failed).
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    base.saturating_mul(attempt.max(1)).min(max)
}

/// Retry and rate limit policy for the fetch client.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    /// Request budget per second; the minimum interval is its inverse
    pub requests_per_second: f64,
    /// Attempts per page before giving up (includes the first attempt)
    pub max_attempts: u32,
    /// Linear backoff base for transport and server errors
    pub base_backoff: Duration,
    /// Linear backoff base for throttled responses
    pub throttle_backoff: Duration,
    /// Cap on a single backoff wait
    pub max_backoff: Duration,
    /// Records requested per page
    pub page_size: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            throttle_backoff: Duration::from_millis(DEFAULT_THROTTLE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl FetchPolicy {
    /// Minimum interval between two outbound requests.
    ///
    /// Rates rejected by [`FetchPolicy::validate`] map to [`MAX_REQUEST_INTERVAL`].
    pub fn min_interval(&self) -> Duration {
        request_interval(self.requests_per_second).unwrap_or(MAX_REQUEST_INTERVAL)
    }

    /// Backoff before retrying after a generic transient error.
    pub fn transient_backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_backoff, self.max_backoff)
    }

    /// Backoff before retrying after a throttled response.
    ///
    /// A provider-supplied `Retry-After` is honoured when it asks for longer.
    pub fn throttle_backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let computed = calculate_backoff(attempt, self.throttle_backoff, self.max_backoff);
        retry_after.map_or(computed, |ra| ra.max(computed))
    }

    /// Reject configurations that can never make progress.
    pub fn validate(&self) -> Result<(), BackfillError> {
        if request_interval(self.requests_per_second).is_none() {
            return Err(BackfillError::Config(format!(
                "requests per second must be positive and at least one per {}s, got {}",
                MAX_REQUEST_INTERVAL.as_secs(),
                self.requests_per_second
            )));
        }
        if self.max_attempts == 0 {
            return Err(BackfillError::Config(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(BackfillError::Config(
                "page size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters of one backfill run.
///
/// Built once per run and handed to the engine; nothing here is process-global.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillConfig {
    /// First date (inclusive)
    pub start_date: NaiveDate,
    /// Last date (inclusive)
    pub end_date: NaiveDate,
    /// Region filter applied to every unit
    pub region: RegionFilter,
    /// Continue from the checkpoint instead of starting fresh
    pub resume: bool,
    /// Fast mode: load races and runners only
    pub skip_enrichment: bool,
    /// Save the checkpoint every N processed units
    pub checkpoint_every: usize,
    /// Emit a progress/ETA line every N processed units
    pub progress_every: usize,
    /// Checkpoint file path
    pub checkpoint_path: PathBuf,
    /// Error log file path
    pub error_log_path: PathBuf,
}

impl BackfillConfig {
    /// Configuration for `[start_date, end_date]` with defaults for everything else.
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            region: RegionFilter::all(),
            resume: false,
            skip_enrichment: false,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            progress_every: DEFAULT_PROGRESS_EVERY,
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            error_log_path: PathBuf::from(DEFAULT_ERROR_LOG_PATH),
        }
    }

    /// Set the region filter.
    pub fn with_region(mut self, region: RegionFilter) -> Self {
        self.region = region;
        self
    }

    /// Enable or disable resume.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Enable or disable fast mode.
    pub fn with_skip_enrichment(mut self, skip: bool) -> Self {
        self.skip_enrichment = skip;
        self
    }

    /// Set the checkpoint interval.
    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every;
        self
    }

    /// Set the progress interval.
    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    /// Set the checkpoint file path.
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = path.into();
        self
    }

    /// Set the error log path.
    pub fn with_error_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.error_log_path = path.into();
        self
    }

    /// Number of calendar days in the configured range (0 when start > end).
    pub fn total_days(&self) -> u64 {
        if self.start_date > self.end_date {
            0
        } else {
            (self.end_date - self.start_date).num_days() as u64 + 1
        }
    }

    /// Reject configurations the engine cannot run.
    pub fn validate(&self) -> Result<(), BackfillError> {
        if self.checkpoint_every == 0 {
            return Err(BackfillError::Config(
                "checkpoint interval must be at least 1".to_string(),
            ));
        }
        if self.progress_every == 0 {
            return Err(BackfillError::Config(
                "progress interval must be at least 1".to_string(),
            ));
        }
        if self.checkpoint_path == self.error_log_path {
            return Err(BackfillError::Config(
                "checkpoint file and error log must be different files".to_string(),
            ));
        }
        Ok(())
    }
}
