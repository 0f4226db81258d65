//! # Racing Backfill Library
//!
//! A resumable historical backfill engine for time-partitioned racing results.
//! It turns "fetch everything from date A to date B" into a crash-safe,
//! rate-limited, checkpointed sequence of per-day fetch/transform/load steps.
//!
//! ## Features
//!
//! - **Resume Capability**: Versioned checkpoint file flushed every N days
//! - **Rate Limiting**: Minimum interval between provider requests
//! - **Retry Policy**: Linear backoff, longer waits when throttled, no retry on auth failures
//! - **Failure Isolation**: One bad day is logged and skipped, never aborts the run
//! - **Progress/ETA**: Periodic throughput and completion estimates
//! - **Coverage Audit**: Per-table, per-year record counts to decide backfill ranges
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use racing_backfill::backfill::{BackfillConfig, BackfillEngine, FetchPolicy};
//! use racing_backfill::fetcher::{FetchClient, HttpProviderClient, ProviderConfig};
//! use racing_backfill::store::SqliteStore;
//! use racing_backfill::RegionFilter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = HttpProviderClient::new(ProviderConfig::from_env())?;
//! let fetch = FetchClient::new(Arc::new(provider), FetchPolicy::default())?;
//! let store = SqliteStore::open("racing.sqlite").await?;
//!
//! let config = BackfillConfig::new(
//!     NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
//! )
//! .with_region(RegionFilter::new(["gb", "ire"]))
//! .with_resume(true);
//!
//! let mut engine = BackfillEngine::new(config, fetch, Arc::new(store))?;
//! let summary = engine.run().await?;
//! println!("{}", summary.format_summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`fetcher`] - Provider client contract, HTTP implementation, rate-limited fetch client
//! - [`backfill`] - Partitioner, transform, pipeline, progress estimator and the run engine
//! - [`resume`] - Checkpoint store, run lock and error log
//! - [`store`] - Store client contract with SQLite and in-memory implementations
//! - [`coverage`] - Read-only gap analyzer over the store
//! - [`cli`] - Command line surface used by the binary

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Backfill planning, pipeline and run engine
pub mod backfill;

/// CLI command implementations
pub mod cli;

/// Coverage/gap analysis over the store
pub mod coverage;

/// Provider clients and the rate-limited fetch client
pub mod fetcher;

/// Metrics facade wiring
pub mod metrics;

/// Checkpoint, run lock and error log persistence
pub mod resume;

/// Cancellation shared between the signal handler and the run loop
pub mod shutdown;

/// Store client contract and implementations
pub mod store;

/// Region filter passed unchanged to every provider request of a run.
///
/// Codes are normalized to lowercase and deduplicated; an empty filter
/// means "all regions".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionFilter(Vec<String>);

impl RegionFilter {
    /// Build a filter from region codes (e.g. `gb`, `ire`).
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = codes
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        normalized.sort();
        normalized.dedup();
        Self(normalized)
    }

    /// Filter that does not restrict regions.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    /// Region codes in this filter.
    pub fn codes(&self) -> &[String] {
        &self.0
    }

    /// Whether the filter matches every region.
    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "all")
        } else {
            write!(f, "{}", self.0.join(","))
        }
    }
}

/// One atomic fetch target: a calendar date plus the run's region filter.
///
/// Identity is the date; the region filter is fixed for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkUnit {
    date: NaiveDate,
    region: RegionFilter,
}

impl WorkUnit {
    /// Create a unit for `date`.
    pub fn new(date: NaiveDate, region: RegionFilter) -> Self {
        Self { date, region }
    }

    /// Calendar date of this unit.
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Region filter of this unit.
    pub fn region(&self) -> &RegionFilter {
        &self.region
    }

    /// Identity string (`YYYY-MM-DD`).
    pub fn id(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.date, self.region)
    }
}

/// Lifecycle of a work unit inside one run.
///
/// `Pending -> Fetched -> (Succeeded | Failed)`; a unit may also fail before
/// it is fetched. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    /// Planned, not started
    Pending,
    /// Provider call completed
    Fetched,
    /// Loaded (or confirmed empty)
    Succeeded,
    /// Fetch, transform or load failed
    Failed,
}

impl UnitStatus {
    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Move to `next`, refusing transitions out of a terminal state or backwards.
    pub fn advance(self, next: UnitStatus) -> Result<UnitStatus, String> {
        let allowed = matches!(
            (self, next),
            (Self::Pending, Self::Fetched)
                | (Self::Pending, Self::Failed)
                | (Self::Fetched, Self::Succeeded)
                | (Self::Fetched, Self::Failed)
        );
        if allowed {
            Ok(next)
        } else {
            Err(format!("invalid unit transition {self:?} -> {next:?}"))
        }
    }
}

/// Raw provider payload for one unit: every entry of every page.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    /// Date the payload was fetched for
    pub date: NaiveDate,
    /// Raw result entries as returned by the provider
    pub entries: Vec<serde_json::Value>,
    /// Number of pages requested
    pub pages: u32,
}

/// A record ready for the store, keyed by its identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// Primary key within its table
    pub key: String,
    /// Date column used by coverage counts, if the table carries one
    pub record_date: Option<NaiveDate>,
    /// Column values; missing or malformed optional values are `null`
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Role of a batch in the downstream schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Top-level records (races)
    Parent,
    /// Records owned by a parent (runners)
    Child,
    /// Reference data derived from entries (horses, jockeys, pedigrees, ...)
    Enrichment,
}

/// Normalized records destined for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    /// Target table
    pub table: String,
    /// Role of the records
    pub kind: RecordKind,
    /// Records to upsert
    pub records: Vec<NormalizedRecord>,
}

impl RecordBatch {
    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
