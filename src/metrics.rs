//! Observability metrics for backfill runs
//!
//! Counters and histograms go through the `metrics` facade. Without an
//! installed recorder they are no-ops; the binary installs the Prometheus
//! exporter when `--metrics-addr` is given.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Global metrics registry initialization flag
static METRICS_INITIALIZED: Lazy<Arc<RwLock<bool>>> = Lazy::new(|| Arc::new(RwLock::new(false)));

/// Outcome label for `backfill_units_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Loaded at least one entry
    Data,
    /// Confirmed empty
    NoData,
    /// Failed at some stage
    Failed,
}

impl UnitOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::NoData => "no_data",
            Self::Failed => "failed",
        }
    }
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are ignored.
///
/// # Arguments
/// * `addr` - Socket address for the scrape endpoint (e.g., "0.0.0.0:9090")
pub async fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut initialized = METRICS_INITIALIZED.write().await;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "backfill_requests_total",
        Unit::Count,
        "Total number of provider requests issued, retries included"
    );

    describe_counter!(
        "backfill_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "backfill_retry_backoff_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_counter!(
        "backfill_fetch_errors_total",
        Unit::Count,
        "Page fetches that ended in a terminal error"
    );

    describe_histogram!(
        "backfill_rate_gate_wait_seconds",
        Unit::Seconds,
        "Time spent waiting at the rate gate before a request"
    );

    describe_counter!(
        "backfill_units_total",
        Unit::Count,
        "Work units processed, by outcome"
    );

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Record one outbound provider request
pub fn record_request() {
    counter!("backfill_requests_total").increment(1);
}

/// Record retry backoff duration
pub fn record_retry_backoff(duration: Duration, attempt: u32) {
    counter!(
        "backfill_retries_total",
        "attempt" => attempt.to_string(),
    )
    .increment(1);

    histogram!(
        "backfill_retry_backoff_seconds",
        "attempt" => attempt.to_string(),
    )
    .record(duration.as_secs_f64());
}

/// Record a terminal fetch error; `kind` is a [`RetryErrorType::label`]
///
/// [`RetryErrorType::label`]: crate::fetcher::RetryErrorType::label
pub fn record_fetch_error(kind: &'static str) {
    counter!(
        "backfill_fetch_errors_total",
        "kind" => kind,
    )
    .increment(1);
}

/// Record time spent at the rate gate
pub fn record_rate_gate_wait(waited: Duration) {
    if !waited.is_zero() {
        histogram!("backfill_rate_gate_wait_seconds").record(waited.as_secs_f64());
    }
}

/// Record a processed unit
pub fn record_unit_outcome(outcome: UnitOutcome) {
    counter!(
        "backfill_units_total",
        "outcome" => outcome.label(),
    )
    .increment(1);
}

/// Check if metrics system is initialized
pub async fn is_initialized() -> bool {
    *METRICS_INITIALIZED.read().await
}
