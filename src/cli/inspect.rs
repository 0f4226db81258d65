//! Read-only `errors` and `status` commands

use clap::Args;
use std::collections::BTreeMap;

use super::{Cli, CliError};
use crate::backfill::progress::format_duration;
use crate::resume::{read_checkpoint, Checkpoint, ErrorEntry, ErrorLog};

/// Arguments of `errors`
#[derive(Debug, Clone, Args)]
pub struct ErrorsArgs {
    /// Print only the distinct failed dates, one per line
    #[arg(long, default_value_t = false)]
    pub dates_only: bool,
}

impl ErrorsArgs {
    /// Print the error log.
    pub fn execute(&self, cli: &Cli) -> Result<Vec<ErrorEntry>, CliError> {
        let log = ErrorLog::new(&cli.error_log);
        let entries = log.read_all()?;

        if self.dates_only {
            for date in log.failed_dates()? {
                println!("{date}");
            }
            return Ok(entries);
        }

        if entries.is_empty() {
            println!("No errors recorded in {}", cli.error_log.display());
            return Ok(entries);
        }

        print!("{}", format_error_report(&entries));
        Ok(entries)
    }
}

/// How to re-run a failed date without touching the main run's checkpoint.
pub const REPLAY_HINT: &str = "Replay a date with its own checkpoint: racing-backfill \
     --checkpoint-file replay_checkpoint.json backfill --start <date> --end <date>";

/// Entries grouped by date, with the replay hint.
pub fn format_error_report(entries: &[ErrorEntry]) -> String {
    let mut by_date: BTreeMap<_, Vec<&ErrorEntry>> = BTreeMap::new();
    for entry in entries {
        by_date.entry(entry.date).or_default().push(entry);
    }

    let mut out = format!(
        "{} error entries across {} dates\n",
        entries.len(),
        by_date.len()
    );
    for (date, group) in &by_date {
        for entry in group {
            out.push_str(&format!(
                "  {date} [{}] {} ({})\n",
                entry.stage,
                entry.error,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
    }
    out.push_str(&format!("{REPLAY_HINT}\n"));
    out
}

/// Arguments of `status`
#[derive(Debug, Clone, Args)]
pub struct StatusArgs {}

impl StatusArgs {
    /// Print the checkpoint summary; never takes the run lock.
    pub fn execute(&self, cli: &Cli) -> Result<Option<Checkpoint>, CliError> {
        match read_checkpoint(&cli.checkpoint_file)? {
            Some(checkpoint) => {
                print!("{}", format_checkpoint_status(&checkpoint));
                Ok(Some(checkpoint))
            }
            None => {
                println!("No checkpoint at {}", cli.checkpoint_file.display());
                Ok(None)
            }
        }
    }
}

/// Human-readable checkpoint summary.
pub fn format_checkpoint_status(checkpoint: &Checkpoint) -> String {
    let stats = &checkpoint.stats;
    let elapsed = (checkpoint.timestamp - stats.start_time)
        .to_std()
        .unwrap_or_default();
    let last = checkpoint
        .last_date
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    out.push_str(&format!(
        "Range:      {} to {} [{}]\n",
        checkpoint.range.start, checkpoint.range.end, checkpoint.region
    ));
    out.push_str(&format!(
        "Processed:  {}/{} days (last {})\n",
        stats.units_processed, stats.total_units, last
    ));
    out.push_str(&format!(
        "Days:       {} with data, {} without\n",
        stats.dates_with_data, stats.dates_no_data
    ));
    out.push_str(&format!(
        "Records:    {} loaded ({} races, {} runners, {} enrichment)\n",
        stats.records_loaded, stats.races, stats.runners, stats.enrichment
    ));
    out.push_str(&format!(
        "Errors:     {} ({} rejected entries)\n",
        stats.errors, stats.rejected_entries
    ));
    out.push_str(&format!(
        "Saved:      {} (session running {})\n",
        checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        format_duration(elapsed)
    ));
    out
}
