//! Retry classification and message formatting for provider requests.
//!
//! Every [`ProviderError`] is mapped to a [`RetryErrorType`], which decides
//! whether the fetch client retries and which backoff schedule applies, and
//! supplies the wording of retry/failure log lines.

use chrono::NaiveDate;
use std::time::Duration;

use super::ProviderError;

/// Classification of provider errors for retry decisions and user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 429 throttling
    Throttled,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Other client errors (4xx)
    ClientError(u16),
    /// Body could not be decoded
    MalformedResponse,
    /// Generic transport fallback
    NetworkGeneric,
}

impl RetryErrorType {
    /// Classify a provider error.
    pub fn from_provider_error(error: &ProviderError) -> Self {
        match error {
            ProviderError::Throttled { .. } => Self::Throttled,
            ProviderError::Auth { status } => Self::AuthFailed(*status),
            ProviderError::Server { status, .. } => Self::ServerError(*status),
            ProviderError::Client { status, .. } => Self::ClientError(*status),
            ProviderError::Timeout(_) => Self::NetworkTimeout,
            ProviderError::Connect(_) => Self::NetworkOffline,
            ProviderError::Transport(_) => Self::NetworkGeneric,
            ProviderError::Decode(_) => Self::MalformedResponse,
        }
    }

    /// User-friendly description used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::Throttled => "provider throttling",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::AuthFailed(_) => "authentication failed",
            Self::ClientError(_) => "request rejected",
            Self::MalformedResponse => "malformed response",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Stable snake_case identifier, used as a metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network_timeout",
            Self::NetworkOffline => "network_offline",
            Self::Throttled => "throttled",
            Self::ServerError(_) => "server_error",
            Self::AuthFailed(_) => "auth_failed",
            Self::ClientError(_) => "client_error",
            Self::MalformedResponse => "malformed_response",
            Self::NetworkGeneric => "network_generic",
        }
    }

    /// Suggested remediation shown with the final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::Throttled => "Lower --requests-per-second or check the plan's request quota",
            Self::ServerError(_) => "The provider may be degraded, re-run the date later",
            Self::AuthFailed(_) => "Verify RACING_API_USERNAME / RACING_API_PASSWORD",
            Self::ClientError(_) => "Check the region codes and date range for typos",
            Self::MalformedResponse => "The provider returned an unexpected body, re-run the date",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether the error class is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::AuthFailed(_) | Self::ClientError(_) | Self::MalformedResponse
        )
    }
}

/// Context for formatting retry messages.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Maximum number of attempts configured
    pub max_attempts: u32,
    /// Type of error that triggered the retry
    pub error_type: RetryErrorType,
    /// Backoff duration until next attempt
    pub backoff_duration: Duration,
    /// Date being fetched
    pub date: NaiveDate,
    /// Records already received for this date
    pub skip: usize,
    /// Original error message
    pub error_message: String,
}

impl RetryContext {
    /// Build a context for one failed attempt.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        error: &ProviderError,
        backoff_duration: Duration,
        date: NaiveDate,
        skip: usize,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            error_type: RetryErrorType::from_provider_error(error),
            backoff_duration,
            date,
            skip,
            error_message: error.to_string(),
        }
    }

    /// Standardized retry message with attempt counters and context.
    pub fn format_retry(&self) -> String {
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({}",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.date
        );
        if self.skip > 0 {
            message.push_str(&format!(", offset {}", self.skip));
        }
        message.push(')');
        message
    }

    /// Message for a retry that eventually succeeded.
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded ({})",
            self.attempt, self.max_attempts, self.date
        )
    }

    /// Final failure summary with an actionable suggestion.
    pub fn format_failure(&self) -> String {
        [
            format!("[FAILED] {} after {} attempts", self.date, self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Suggestion: {}", self.error_type.suggestion()),
        ]
        .join("\n")
    }
}
