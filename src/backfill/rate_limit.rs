//! Minimum-interval rate gate
//!
//! Every outbound provider request passes through [`RateLimiter::acquire`],
//! which blocks the caller until at least `min_interval` has elapsed since the
//! previous request started. The gate is the only blocking point of the
//! pipeline apart from retry backoff.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Rate gate enforcing a fixed minimum interval between request starts.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
}

impl RateLimiter {
    /// Create a gate with an explicit minimum interval.
    pub fn min_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a gate from a request budget per second.
    pub fn per_second(requests_per_second: f64) -> Result<Self, RateLimitError> {
        if !(requests_per_second.is_finite() && requests_per_second > 0.0) {
            return Err(RateLimitError::InvalidRate(requests_per_second));
        }
        Ok(Self::min_interval(Duration::from_secs_f64(
            1.0 / requests_per_second,
        )))
    }

    /// Configured minimum interval.
    pub fn interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be issued, then claim the slot.
    ///
    /// Returns how long the caller was held back. The lock is held across
    /// the wait so concurrent callers are admitted strictly one per interval.
    pub async fn acquire(&self) -> Duration {
        let mut last = self.last_request.lock().await;
        let now = Instant::now();
        let mut waited = Duration::ZERO;

        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if ready_at > now {
                waited = ready_at - now;
                debug!(wait_ms = waited.as_millis() as u64, "Rate gate holding request");
                sleep_until(ready_at).await;
            }
        }

        *last = Some(Instant::now());
        waited
    }
}

/// Rate limiter errors
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    /// Non-positive or non-finite request budget
    #[error("invalid request rate: {0} requests/second")]
    InvalidRate(f64),
}
