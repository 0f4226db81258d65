//! Store client contract and implementations
//!
//! The backfill loads normalized records through [`StoreClient::upsert_batch`]
//! and the coverage analyzer reads counts through [`StoreClient::count`].
//! Both use the same client.

use crate::NormalizedRecord;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::ops::AddAssign;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Per-batch upsert result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    /// Keys that did not exist before
    pub inserted: u64,
    /// Keys that were overwritten
    pub updated: u64,
}

impl UpsertCounts {
    /// Inserted plus updated.
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

impl AddAssign for UpsertCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}

/// Row filter for [`StoreClient::count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountFilter {
    /// Every row
    All,
    /// Rows whose record date is in `[from, to_exclusive)`
    DateRange {
        /// First date (inclusive)
        from: NaiveDate,
        /// End date (exclusive)
        to_exclusive: NaiveDate,
    },
}

impl CountFilter {
    /// Filter covering one calendar year.
    pub fn year(year: i32) -> Option<Self> {
        Some(Self::DateRange {
            from: NaiveDate::from_ymd_opt(year, 1, 1)?,
            to_exclusive: NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        })
    }

    /// Whether a record with `date` passes the filter.
    pub fn matches(&self, date: Option<NaiveDate>) -> bool {
        match (self, date) {
            (Self::All, _) => true,
            (Self::DateRange { from, to_exclusive }, Some(d)) => d >= *from && d < *to_exclusive,
            (Self::DateRange { .. }, None) => false,
        }
    }
}

/// Store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Table name outside `[a-z_][a-z0-9_]*`
    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    /// Database failure
    #[error("database error: {0}")]
    Database(String),

    /// Record could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Store contract consumed by the pipeline and the coverage analyzer.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Insert or replace `records` in `table`, keyed by [`NormalizedRecord::key`].
    async fn upsert_batch(
        &self,
        table: &str,
        records: &[NormalizedRecord],
    ) -> Result<UpsertCounts, StoreError>;

    /// Count rows of `table` passing `filter`. A table that does not exist yet counts 0.
    async fn count(&self, table: &str, filter: &CountFilter) -> Result<u64, StoreError>;
}

/// Validate a table name so it can be interpolated into SQL.
pub fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let mut chars = table.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_first && valid_rest && table.len() <= 63 {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}
