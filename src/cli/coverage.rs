//! `coverage` command: per-table, per-year counts and a suggested range

use chrono::{Datelike, Utc};
use clap::Args;
use std::sync::Arc;

use super::{Cli, CliError};
use crate::backfill::transform::{ENRICHMENT_TABLES, RACES_TABLE, RUNNERS_TABLE};
use crate::coverage::{CoverageReport, GapAnalyzer, TableSpec};
use crate::store::{validate_table_name, SqliteStore};

/// Earliest year audited when `--from-year` is omitted
pub const DEFAULT_FROM_YEAR: i32 = 2015;

fn default_tables() -> Vec<String> {
    [RACES_TABLE, RUNNERS_TABLE]
        .into_iter()
        .chain(ENRICHMENT_TABLES)
        .map(str::to_string)
        .collect()
}

/// Arguments of `coverage`
#[derive(Debug, Clone, Args)]
pub struct CoverageArgs {
    /// Tables to audit (comma-separated); races and runners are counted per year
    #[arg(long, value_delimiter = ',', default_values_t = default_tables())]
    pub tables: Vec<String>,

    /// First year to audit
    #[arg(long, default_value_t = DEFAULT_FROM_YEAR)]
    pub from_year: i32,

    /// Last year to audit (defaults to the current year)
    #[arg(long)]
    pub to_year: Option<i32>,
}

impl CoverageArgs {
    /// Audit the database and print the report.
    pub async fn execute(&self, cli: &Cli) -> Result<CoverageReport, CliError> {
        let today = Utc::now().date_naive();
        let to_year = self.to_year.unwrap_or_else(|| today.year());
        if self.from_year > to_year {
            return Err(CliError::InvalidArgument(format!(
                "--from-year {} is after --to-year {}",
                self.from_year, to_year
            )));
        }
        for table in &self.tables {
            validate_table_name(table)?;
        }
        if !cli.database.exists() {
            return Err(CliError::InvalidArgument(format!(
                "database {} does not exist",
                cli.database.display()
            )));
        }

        let store = SqliteStore::open(&cli.database).await?;
        let specs: Vec<TableSpec> = self.tables.iter().map(|t| TableSpec::for_table(t)).collect();
        let report = GapAnalyzer::new(Arc::new(store))
            .analyze(&specs, self.from_year..=to_year)
            .await?;

        print!("{}", report.format());

        let uncovered = report.uncovered_years();
        if uncovered.is_empty() {
            println!("\nEvery audited year has races and runners.");
        } else {
            let years: Vec<String> = uncovered.iter().map(i32::to_string).collect();
            println!("\nYears without data: {}", years.join(", "));
        }
        let empty = report.empty_undated_tables();
        if !empty.is_empty() {
            println!("Empty reference tables: {}", empty.join(", "));
        }
        if let Some((start, end)) = report.suggested_range(today) {
            println!("Suggested backfill: racing-backfill backfill --start {start} --end {end} --resume");
        }

        Ok(report)
    }
}
