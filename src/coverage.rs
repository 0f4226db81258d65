//! Coverage/gap analysis over the store
//!
//! Read-only: issues count queries through the same [`StoreClient`] the
//! backfill loads with. A table with no rows (or not created yet) is reported
//! as uncovered, never as an error.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::debug;

use crate::backfill::transform::{RACES_TABLE, RUNNERS_TABLE};
use crate::store::{CountFilter, StoreClient, StoreError};

/// A table to audit, and whether its rows carry a date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name
    pub name: String,
    /// Whether per-year counts apply
    pub dated: bool,
}

impl TableSpec {
    /// Table with a date column.
    pub fn dated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dated: true,
        }
    }

    /// Reference table without dates.
    pub fn undated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dated: false,
        }
    }

    /// Spec for a table loaded by the backfill: races and runners are dated.
    pub fn for_table(name: &str) -> Self {
        if name == RACES_TABLE || name == RUNNERS_TABLE {
            Self::dated(name)
        } else {
            Self::undated(name)
        }
    }
}

/// Counts for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCoverage {
    /// Table name
    pub table: String,
    /// Whether the table has per-year counts
    pub dated: bool,
    /// Total rows
    pub total: u64,
    /// Rows per year (dated tables only)
    pub per_year: BTreeMap<i32, u64>,
}

impl TableCoverage {
    /// Years of the audited range with zero rows.
    pub fn uncovered_years(&self) -> Vec<i32> {
        self.per_year
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(year, _)| *year)
            .collect()
    }
}

/// Result of one audit. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageReport {
    /// Audited years, inclusive
    pub years: (i32, i32),
    /// Per-table counts, in request order
    pub tables: Vec<TableCoverage>,
}

impl CoverageReport {
    /// Years where at least one dated table has no rows.
    pub fn uncovered_years(&self) -> BTreeSet<i32> {
        self.tables
            .iter()
            .filter(|t| t.dated)
            .flat_map(TableCoverage::uncovered_years)
            .collect()
    }

    /// Undated tables with no rows at all.
    pub fn empty_undated_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| !t.dated && t.total == 0)
            .map(|t| t.table.as_str())
            .collect()
    }

    /// Date range spanning every uncovered year, ending no later than `today`.
    pub fn suggested_range(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let uncovered = self.uncovered_years();
        let first = *uncovered.first()?;
        let last = *uncovered.last()?;
        let start = NaiveDate::from_ymd_opt(first, 1, 1)?;
        let end = NaiveDate::from_ymd_opt(last, 12, 31)?.min(today);
        (start <= end).then_some((start, end))
    }

    /// Plain-text table for the terminal.
    pub fn format(&self) -> String {
        let (from, to) = self.years;
        let mut out = format!("Coverage {from}-{to}\n");
        out.push_str(&format!("{:<12} {:>10}", "table", "total"));
        for year in from..=to {
            out.push_str(&format!(" {year:>8}"));
        }
        out.push('\n');

        for table in &self.tables {
            out.push_str(&format!("{:<12} {:>10}", table.table, table.total));
            for year in from..=to {
                match table.per_year.get(&year) {
                    Some(count) => out.push_str(&format!(" {count:>8}")),
                    None => out.push_str(&format!(" {:>8}", "-")),
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Read-only auditor over a store client.
pub struct GapAnalyzer {
    store: Arc<dyn StoreClient>,
}

impl GapAnalyzer {
    /// Analyzer over `store`.
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Self { store }
    }

    /// Count every table in total and, for dated tables, per year of `years`.
    pub async fn analyze(
        &self,
        tables: &[TableSpec],
        years: RangeInclusive<i32>,
    ) -> Result<CoverageReport, StoreError> {
        let mut report = CoverageReport {
            years: (*years.start(), *years.end()),
            tables: Vec::with_capacity(tables.len()),
        };

        for spec in tables {
            let total = self.store.count(&spec.name, &CountFilter::All).await?;
            let mut per_year = BTreeMap::new();
            if spec.dated {
                for year in years.clone() {
                    let Some(filter) = CountFilter::year(year) else {
                        continue;
                    };
                    per_year.insert(year, self.store.count(&spec.name, &filter).await?);
                }
            }
            debug!(table = %spec.name, total, "Counted table");
            report.tables.push(TableCoverage {
                table: spec.name.clone(),
                dated: spec.dated,
                total,
                per_year,
            });
        }
        Ok(report)
    }
}
