//! Versioned checkpoint document
//!
//! The checkpoint is the single source of truth for resume: a date listed in
//! `processed_dates` is never fetched again, whether it produced data or not.

use super::state::ResumeError;
use crate::RegionFilter;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Current checkpoint schema version
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 2;

/// Inclusive date range of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    /// First date
    pub start: NaiveDate,
    /// Last date
    pub end: NaiveDate,
}

/// Running totals of a backfill. Only ever grow within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateCounters {
    /// Units in the current plan plus those already processed
    pub total_units: u64,
    /// Units attempted (succeeded or failed)
    pub units_processed: u64,
    /// Units that returned at least one entry
    pub dates_with_data: u64,
    /// Units confirmed empty
    pub dates_no_data: u64,
    /// Parent records loaded
    pub races: u64,
    /// Child records loaded
    pub runners: u64,
    /// Enrichment records loaded
    pub enrichment: u64,
    /// Entries rejected for missing identity
    pub rejected_entries: u64,
    /// Records inserted or updated in the store
    pub records_loaded: u64,
    /// Error log entries written
    pub errors: u64,
    /// When the session began
    pub start_time: DateTime<Utc>,
}

impl AggregateCounters {
    /// Zeroed counters for a session starting at `start_time`.
    pub fn new(total_units: u64, start_time: DateTime<Utc>) -> Self {
        Self {
            total_units,
            units_processed: 0,
            dates_with_data: 0,
            dates_no_data: 0,
            races: 0,
            runners: 0,
            enrichment: 0,
            rejected_entries: 0,
            records_loaded: 0,
            errors: 0,
            start_time,
        }
    }
}

/// Persisted resume state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Schema version of this document
    pub schema_version: u32,
    /// Time of the last save
    pub timestamp: DateTime<Utc>,
    /// Range of the run that wrote the checkpoint
    pub range: DateRange,
    /// Region filter of that run
    #[serde(default)]
    pub region: RegionFilter,
    /// Aggregate counters
    pub stats: AggregateCounters,
    /// Dates attempted so far, ascending
    pub processed_dates: BTreeSet<NaiveDate>,
    /// Greatest processed date
    pub last_date: Option<NaiveDate>,
}

impl Checkpoint {
    /// Empty checkpoint for a new session.
    pub fn new(range: DateRange, region: RegionFilter, total_units: u64) -> Self {
        let now = Utc::now();
        Self {
            schema_version: CHECKPOINT_SCHEMA_VERSION,
            timestamp: now,
            range,
            region,
            stats: AggregateCounters::new(total_units, now),
            processed_dates: BTreeSet::new(),
            last_date: None,
        }
    }

    /// Record `date` as processed.
    pub fn mark_processed(&mut self, date: NaiveDate) {
        self.processed_dates.insert(date);
        self.last_date = self.processed_dates.last().copied();
    }

    /// Whether `date` was already processed.
    pub fn is_processed(&self, date: NaiveDate) -> bool {
        self.processed_dates.contains(&date)
    }

    /// Refresh the save timestamp.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    /// Dates of `previous` missing from this checkpoint.
    pub fn missing_from(&self, previous: &BTreeSet<NaiveDate>) -> Vec<NaiveDate> {
        previous.difference(&self.processed_dates).copied().collect()
    }

    /// Check the document shape before trusting `processed_dates`.
    pub fn validate(&self) -> Result<(), ResumeError> {
        if self.schema_version != CHECKPOINT_SCHEMA_VERSION {
            return Err(ResumeError::SchemaVersionMismatch {
                expected: CHECKPOINT_SCHEMA_VERSION,
                found: self.schema_version,
            });
        }
        let max = self.processed_dates.last().copied();
        if self.last_date != max {
            return Err(ResumeError::InvalidCheckpoint(format!(
                "last_date {:?} does not match greatest processed date {:?}",
                self.last_date, max
            )));
        }
        if self.stats.units_processed < self.processed_dates.len() as u64 {
            return Err(ResumeError::InvalidCheckpoint(format!(
                "{} processed dates but only {} units counted",
                self.processed_dates.len(),
                self.stats.units_processed
            )));
        }
        Ok(())
    }
}
