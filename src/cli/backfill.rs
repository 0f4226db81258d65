//! Top-level CLI definition and the `backfill` command

use chrono::NaiveDate;
use clap::builder::TypedValueParser;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{BufRead, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use super::coverage::CoverageArgs;
use super::inspect::{ErrorsArgs, StatusArgs};
use super::CliError;
use crate::backfill::config::{
    request_interval, DEFAULT_CHECKPOINT_EVERY, DEFAULT_CHECKPOINT_PATH,
    DEFAULT_ERROR_LOG_PATH, DEFAULT_MAX_ATTEMPTS, DEFAULT_PROGRESS_EVERY,
    DEFAULT_REQUESTS_PER_SECOND, MAX_REQUEST_INTERVAL,
};
use crate::backfill::{BackfillConfig, BackfillEngine, FetchPolicy, RunSummary};
use crate::fetcher::http::DEFAULT_BASE_URL;
use crate::fetcher::{FetchClient, HttpProviderClient, ProviderConfig};
use crate::metrics;
use crate::shutdown::SharedShutdown;
use crate::store::SqliteStore;
use crate::RegionFilter;

/// Plans larger than this many days ask for confirmation unless `--yes` is given.
pub const CONFIRM_THRESHOLD_UNITS: usize = 30;

/// Parse a `YYYY-MM-DD` date argument.
pub fn parse_date(input: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{input}' (expected YYYY-MM-DD): {e}"))
}

fn parse_rate(input: &str) -> Result<f64, String> {
    let value: f64 = input
        .parse()
        .map_err(|_| format!("'{input}' is not a valid number"))?;
    if request_interval(value).is_none() {
        return Err(format!(
            "requests per second must be positive and at least one per {}s",
            MAX_REQUEST_INTERVAL.as_secs()
        ));
    }
    Ok(value)
}

/// Racing results historical backfill
#[derive(Debug, Parser)]
#[command(name = "racing-backfill")]
#[command(about = "Resumable historical backfill of racing results", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// SQLite database file
    #[arg(long, global = true, env = "BACKFILL_DATABASE", default_value = "racing.sqlite")]
    pub database: PathBuf,

    /// Checkpoint file
    #[arg(long, global = true, default_value = DEFAULT_CHECKPOINT_PATH)]
    pub checkpoint_file: PathBuf,

    /// Error log file (JSON Lines)
    #[arg(long, global = true, default_value = DEFAULT_ERROR_LOG_PATH)]
    pub error_log: PathBuf,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Fetch, transform and load every day of a date range
    Backfill(BackfillArgs),
    /// Per-table, per-year record counts and a suggested backfill range
    Coverage(CoverageArgs),
    /// List dates recorded in the error log
    Errors(ErrorsArgs),
    /// Show the checkpoint without taking the run lock
    Status(StatusArgs),
}

/// Arguments of `backfill`
#[derive(Debug, Clone, Args)]
pub struct BackfillArgs {
    /// First date (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub start: NaiveDate,

    /// Last date (YYYY-MM-DD, inclusive)
    #[arg(long, value_parser = parse_date)]
    pub end: NaiveDate,

    /// Continue from the checkpoint, skipping processed days
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Do not ask for confirmation before large runs
    #[arg(short = 'y', long, default_value_t = false)]
    pub yes: bool,

    /// Fast mode: load races and runners only, skip enrichment tables
    #[arg(long, default_value_t = false)]
    pub fast: bool,

    /// Region codes (repeat or comma-separate); all regions when omitted
    #[arg(long = "region", value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Provider request budget per second
    #[arg(long, default_value_t = DEFAULT_REQUESTS_PER_SECOND, value_parser = parse_rate)]
    pub requests_per_second: f64,

    /// Retries per page after the first attempt (range: 0-20)
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS - 1, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Save the checkpoint every N days
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_EVERY, value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize))]
    pub checkpoint_every: usize,

    /// Log progress every N days
    #[arg(long, default_value_t = DEFAULT_PROGRESS_EVERY, value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize))]
    pub progress_every: usize,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9090)
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,

    /// Provider API root
    #[arg(long, env = "RACING_API_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Provider username
    #[arg(long, env = "RACING_API_USERNAME", hide_env_values = true)]
    pub username: Option<String>,

    /// Provider password
    #[arg(long, env = "RACING_API_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl BackfillArgs {
    /// Run configuration from the arguments and global paths.
    pub fn config(&self, cli: &Cli) -> BackfillConfig {
        BackfillConfig::new(self.start, self.end)
            .with_region(RegionFilter::new(&self.regions))
            .with_resume(self.resume)
            .with_skip_enrichment(self.fast)
            .with_checkpoint_every(self.checkpoint_every)
            .with_progress_every(self.progress_every)
            .with_checkpoint_path(&cli.checkpoint_file)
            .with_error_log_path(&cli.error_log)
    }

    /// Retry and rate limit policy.
    pub fn policy(&self) -> FetchPolicy {
        FetchPolicy {
            requests_per_second: self.requests_per_second,
            max_attempts: self.max_retries + 1,
            ..FetchPolicy::default()
        }
    }

    /// Provider connection settings; credentials are required.
    pub fn provider_config(&self) -> Result<ProviderConfig, CliError> {
        let username = self.username.clone().filter(|u| !u.is_empty()).ok_or_else(|| {
            CliError::ConfigurationError(
                "provider username missing (set RACING_API_USERNAME or --username)".to_string(),
            )
        })?;
        let password = self.password.clone().unwrap_or_default();
        Ok(ProviderConfig::new(&self.base_url, username, password))
    }

    /// Execute the backfill.
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<RunSummary, CliError> {
        if self.start > self.end {
            return Err(CliError::InvalidArgument(format!(
                "start date {} is after end date {}",
                self.start, self.end
            )));
        }

        if !self.resume && !self.yes && cli.checkpoint_file.exists() {
            let prompt = format!(
                "{} holds the checkpoint of an earlier run; without --resume it is replaced \
                 by a new one for {} to {}. Use --checkpoint-file to replay days separately. \
                 Replace it? [y/N] ",
                cli.checkpoint_file.display(),
                self.start,
                self.end
            );
            let stdin = std::io::stdin();
            let confirmed = confirm(&prompt, &mut stdin.lock(), &mut std::io::stderr())
                .map_err(|e| CliError::InvalidArgument(format!("failed to read confirmation: {e}")))?;
            if !confirmed {
                return Err(CliError::Aborted);
            }
        }

        if let Some(addr) = self.metrics_addr {
            metrics::init_metrics(addr)
                .await
                .map_err(|e| CliError::ConfigurationError(e.to_string()))?;
        }

        let provider = HttpProviderClient::new(self.provider_config()?)?;
        info!(provider = %provider.base_url(), "Provider client ready");
        let fetch = FetchClient::new(Arc::new(provider), self.policy())?;
        let store = SqliteStore::open(&cli.database).await?;

        let mut engine = BackfillEngine::new(self.config(cli), fetch, Arc::new(store))?
            .with_shutdown(shutdown);

        let prepared = engine.prepare()?;
        info!(
            days = prepared.len(),
            skipped = prepared.skipped,
            database = %cli.database.display(),
            "Backfill planned"
        );

        if prepared.len() > CONFIRM_THRESHOLD_UNITS && !self.yes {
            let prompt = format!(
                "About to backfill {} days ({} to {}). Continue? [y/N] ",
                prepared.len(),
                self.start,
                self.end
            );
            let stdin = std::io::stdin();
            let confirmed = confirm(&prompt, &mut stdin.lock(), &mut std::io::stderr())
                .map_err(|e| CliError::InvalidArgument(format!("failed to read confirmation: {e}")))?;
            if !confirmed {
                return Err(CliError::Aborted);
            }
        }

        engine = engine.with_progress_bar(create_progress_bar(prepared.len() as u64));
        let summary = engine.execute(prepared).await?;
        println!("{}", summary.format_summary());

        if summary.is_success() {
            Ok(summary)
        } else {
            Err(CliError::RunIncomplete {
                processed: summary.processed,
                planned: summary.planned,
                failed: summary.failures.len(),
                cancelled: summary.cancelled,
            })
        }
    }
}

/// Ask a yes/no question; only `y` or `yes` confirms.
pub fn confirm(
    prompt: &str,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> std::io::Result<bool> {
    write!(output, "{prompt}")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn create_progress_bar(total_days: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_days);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} days ({percent}%) {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}
