//! Progress and ETA estimation for long-running backfills.
//!
//! Throughput is units completed over wall-clock time since the session
//! started. The engine reports every N units rather than per unit, so one slow
//! or fast day does not dominate the estimate.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Throughput and completion projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Estimate {
    /// Units per second
    pub rate: f64,
    /// Seconds until the remaining units are done; `None` when the rate is 0
    pub remaining_seconds: Option<f64>,
    /// Projected completion time; `None` when the rate is 0
    pub eta: Option<DateTime<Utc>>,
}

/// Project completion from `units_completed` of `total_units` after `elapsed_seconds`.
///
/// Zero (or negative) elapsed time yields rate 0 and no ETA.
pub fn estimate(
    units_completed: u64,
    total_units: u64,
    elapsed_seconds: f64,
    now: DateTime<Utc>,
) -> Estimate {
    if elapsed_seconds.is_nan() || elapsed_seconds <= 0.0 || units_completed == 0 {
        return Estimate {
            rate: 0.0,
            remaining_seconds: None,
            eta: None,
        };
    }

    let rate = units_completed as f64 / elapsed_seconds;
    let remaining_units = total_units.saturating_sub(units_completed);
    // remaining / rate, without rounding through the rate
    let remaining_seconds = remaining_units as f64 * elapsed_seconds / units_completed as f64;
    let eta = Duration::try_from_secs_f64(remaining_seconds)
        .ok()
        .and_then(|d| chrono::Duration::from_std(d).ok())
        .and_then(|d| now.checked_add_signed(d));

    Estimate {
        rate,
        remaining_seconds: Some(remaining_seconds),
        eta,
    }
}

/// Progress of the current session.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Units finished this session
    pub units_completed: u64,
    /// Units planned this session
    pub total_units: u64,
    /// Errors recorded this session
    pub errors: u64,
    /// Errors recorded by earlier sessions of a resumed run
    pub prior_errors: u64,
    /// Records loaded this session
    pub records_loaded: u64,
    /// Most recently finished date
    pub current_date: Option<NaiveDate>,
    /// When the session started
    pub start_time: Instant,
}

impl ProgressState {
    /// Fresh state for a plan of `total_units`.
    pub fn new(total_units: u64) -> Self {
        Self {
            units_completed: 0,
            total_units,
            errors: 0,
            prior_errors: 0,
            records_loaded: 0,
            current_date: None,
            start_time: Instant::now(),
        }
    }

    /// Carry over the error count of a resumed checkpoint.
    pub fn with_prior_errors(mut self, errors: u64) -> Self {
        self.prior_errors = errors;
        self
    }

    /// Errors across every session of the run.
    pub fn total_errors(&self) -> u64 {
        self.prior_errors + self.errors
    }

    /// Count one finished unit.
    pub fn record_unit(&mut self, date: NaiveDate, records_loaded: u64, errors: u64) {
        self.units_completed += 1;
        self.records_loaded += records_loaded;
        self.errors += errors;
        self.current_date = Some(date);
    }

    /// Whether a report is due: every `every` units and at the last unit.
    pub fn should_report(&self, every: usize) -> bool {
        self.units_completed > 0
            && (self.units_completed % every.max(1) as u64 == 0
                || self.units_completed == self.total_units)
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> f64 {
        if self.total_units == 0 {
            return 100.0;
        }
        self.units_completed as f64 / self.total_units as f64 * 100.0
    }

    /// Current estimate from wall-clock time.
    pub fn estimate(&self) -> Estimate {
        estimate(
            self.units_completed,
            self.total_units,
            self.start_time.elapsed().as_secs_f64(),
            Utc::now(),
        )
    }

    /// Human-readable progress string for logging.
    pub fn format_progress(&self) -> String {
        self.format_with(&self.estimate())
    }

    /// Progress string for a given estimate.
    pub fn format_with(&self, estimate: &Estimate) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] {}/{} days - {:.1}% complete",
            self.units_completed,
            self.total_units,
            self.percentage()
        )];

        if let Some(date) = self.current_date {
            parts.push(format!("(at {date})"));
        }

        if estimate.rate > 0.0 {
            parts.push(format!("at {:.2} days/sec", estimate.rate));
        }

        parts.push(format!(
            "- {} records loaded, {} errors",
            self.records_loaded,
            self.total_errors()
        ));
        if self.prior_errors > 0 {
            parts.push(format!("({} this session)", self.errors));
        }

        if let Some(remaining) = estimate.remaining_seconds {
            parts.push(format!(
                "- ~{} remaining",
                format_duration(Duration::try_from_secs_f64(remaining).unwrap_or(Duration::MAX))
            ));
        }
        if let Some(eta) = estimate.eta {
            parts.push(format!("(ETA {})", eta.format("%Y-%m-%d %H:%M UTC")));
        }

        parts.join(" ")
    }
}

/// Compact duration: `45s`, `12m`, `3.5h`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
