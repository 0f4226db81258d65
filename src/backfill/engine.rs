//! Backfill run engine
//!
//! ```text
//! INIT -> PLANNING -> RUNNING -> COMPLETING -> DONE
//!                        \-> INTERRUPTED (checkpoint flushed)
//! ```
//!
//! Units run strictly sequentially in ascending date order. Every unit is
//! recorded in the checkpoint once attempted, failed or not; failures go to
//! the error log. The checkpoint is saved every `checkpoint_every` units and
//! once more when the loop ends.

use chrono::NaiveDate;
use indicatif::ProgressBar;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::config::BackfillConfig;
use super::partition::{already_done_in_range, plan};
use super::pipeline::{Pipeline, PipelineStage, UnitResult};
use super::progress::{format_duration, ProgressState};
use super::transform::{ResultsTransformer, TransformOptions, Transformer};
use super::BackfillError;
use crate::fetcher::{FetchClient, FetchStatsSnapshot};
use crate::metrics::{self, UnitOutcome};
use crate::resume::{AggregateCounters, Checkpoint, CheckpointStore, DateRange, ErrorEntry, ErrorLog};
use crate::shutdown::SharedShutdown;
use crate::store::StoreClient;
use crate::WorkUnit;

/// Phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Engine constructed, checkpoint not yet consulted
    Init,
    /// Building the plan
    Planning,
    /// Processing units
    Running,
    /// Final checkpoint flush
    Completing,
    /// Every planned unit attempted
    Done,
    /// Stopped early on cancellation
    Interrupted,
}

/// A planned run, ready for [`BackfillEngine::execute`].
#[derive(Debug, Clone)]
pub struct PreparedRun {
    /// Units to process, ascending
    pub plan: Vec<WorkUnit>,
    /// Checkpoint the run starts from
    pub checkpoint: Checkpoint,
    /// Whether a previous checkpoint was resumed
    pub resumed: bool,
    /// Dates of the range skipped as already processed
    pub skipped: usize,
}

impl PreparedRun {
    /// Number of units to process.
    pub fn len(&self) -> usize {
        self.plan.len()
    }

    /// Whether there is nothing to process.
    pub fn is_empty(&self) -> bool {
        self.plan.is_empty()
    }
}

/// A date recorded in the error log during this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    /// Unit date
    pub date: NaiveDate,
    /// Stage that failed
    pub stage: PipelineStage,
    /// Error message
    pub error: String,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Counters as saved in the final checkpoint
    pub counters: AggregateCounters,
    /// Provider request statistics
    pub fetch: FetchStatsSnapshot,
    /// Dates recorded in the error log this run
    pub failures: Vec<UnitFailure>,
    /// Units planned
    pub planned: usize,
    /// Units attempted
    pub processed: usize,
    /// Dates skipped as already processed
    pub skipped: usize,
    /// Stopped by cancellation
    pub cancelled: bool,
    /// Final phase
    pub phase: RunPhase,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl RunSummary {
    /// Every planned unit attempted with no errors recorded.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.processed == self.planned && self.failures.is_empty()
    }

    /// Multi-line report for the terminal.
    pub fn format_summary(&self) -> String {
        let c = &self.counters;
        let mut lines = vec![
            format!(
                "Backfill {}: {}/{} days processed ({} skipped as already done) in {}",
                if self.cancelled { "interrupted" } else { "finished" },
                self.processed,
                self.planned,
                self.skipped,
                format_duration(self.elapsed)
            ),
            format!(
                "  Dates with data: {}, without data: {}",
                c.dates_with_data, c.dates_no_data
            ),
            format!(
                "  Records loaded: {} (races {}, runners {}, enrichment {})",
                c.records_loaded, c.races, c.runners, c.enrichment
            ),
            format!(
                "  Requests: {}, retries: {}, throttled: {}",
                self.fetch.requests, self.fetch.retries, self.fetch.throttled
            ),
            format!(
                "  Errors this run: {} (all sessions: {})",
                self.failures.len(),
                c.errors
            ),
        ];
        for failure in &self.failures {
            lines.push(format!(
                "    {} [{}] {}",
                failure.date, failure.stage, failure.error
            ));
        }
        lines.join("\n")
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_summary())
    }
}

/// Drives one backfill run over a date range.
pub struct BackfillEngine {
    config: BackfillConfig,
    pipeline: Pipeline,
    checkpoints: CheckpointStore,
    error_log: ErrorLog,
    shutdown: Option<SharedShutdown>,
    progress_bar: Option<ProgressBar>,
    phase: RunPhase,
}

impl BackfillEngine {
    /// Build an engine and take the checkpoint lock.
    ///
    /// Fails if the configuration is invalid or another run holds the checkpoint.
    pub fn new(
        config: BackfillConfig,
        fetch: FetchClient,
        store: Arc<dyn StoreClient>,
    ) -> Result<Self, BackfillError> {
        config.validate()?;
        let checkpoints = CheckpointStore::open(&config.checkpoint_path)?;
        let error_log = ErrorLog::new(&config.error_log_path);
        let options = TransformOptions {
            skip_enrichment: config.skip_enrichment,
        };
        let pipeline = Pipeline::new(fetch, Arc::new(ResultsTransformer::new()), store, options);

        Ok(Self {
            config,
            pipeline,
            checkpoints,
            error_log,
            shutdown: None,
            progress_bar: None,
            phase: RunPhase::Init,
        })
    }

    /// Use a different transformer.
    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.pipeline.set_transformer(transformer);
        self
    }

    /// Check `shutdown` before each unit.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Advance `bar` once per processed unit.
    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.progress_bar = Some(bar);
        self
    }

    /// Run configuration.
    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    fn transition(&mut self, next: RunPhase) {
        info!(from = ?self.phase, to = ?next, "Run phase");
        self.phase = next;
    }

    /// INIT and PLANNING: load the checkpoint (on resume) and build the plan.
    pub fn prepare(&mut self) -> Result<PreparedRun, BackfillError> {
        self.transition(RunPhase::Init);
        let range = DateRange {
            start: self.config.start_date,
            end: self.config.end_date,
        };

        let loaded = if self.config.resume {
            let loaded = self.checkpoints.load();
            if loaded.is_none() {
                info!("No usable checkpoint to resume, starting fresh");
            }
            loaded
        } else {
            if self.checkpoints.path().exists() {
                warn!(
                    path = %self.checkpoints.path().display(),
                    "Existing checkpoint will be replaced (run without --resume)"
                );
            }
            None
        };

        self.transition(RunPhase::Planning);
        let resumed = loaded.is_some();
        let mut checkpoint = match loaded {
            Some(mut checkpoint) => {
                if checkpoint.region != self.config.region {
                    warn!(
                        previous = %checkpoint.region,
                        current = %self.config.region,
                        "Region filter differs from the checkpoint; processed dates still skipped"
                    );
                }
                checkpoint.range = range;
                checkpoint.region = self.config.region.clone();
                checkpoint
            }
            None => Checkpoint::new(range, self.config.region.clone(), 0),
        };

        let units = plan(
            range.start,
            range.end,
            &checkpoint.processed_dates,
            &self.config.region,
        );
        let skipped = already_done_in_range(range.start, range.end, &checkpoint.processed_dates);
        checkpoint.stats.total_units = checkpoint.stats.units_processed + units.len() as u64;

        info!(
            start = %range.start,
            end = %range.end,
            region = %self.config.region,
            planned = units.len(),
            skipped,
            resumed,
            "Plan ready"
        );

        Ok(PreparedRun {
            plan: units,
            checkpoint,
            resumed,
            skipped,
        })
    }

    /// RUNNING and COMPLETING: process every planned unit.
    ///
    /// Unit failures are recorded and skipped. Only checkpoint or error log
    /// persistence failures abort the run.
    #[tracing::instrument(
        name = "backfill_run",
        skip_all,
        fields(
            start = %self.config.start_date,
            end = %self.config.end_date,
            resume = self.config.resume,
            planned = prepared.plan.len()
        )
    )]
    pub async fn execute(&mut self, prepared: PreparedRun) -> Result<RunSummary, BackfillError> {
        let PreparedRun {
            plan,
            mut checkpoint,
            skipped,
            ..
        } = prepared;
        let started = Instant::now();
        self.transition(RunPhase::Running);

        let mut progress =
            ProgressState::new(plan.len() as u64).with_prior_errors(checkpoint.stats.errors);
        let mut failures = Vec::new();
        let mut since_checkpoint = 0usize;
        let mut processed = 0usize;
        let mut cancelled = false;

        if let Some(bar) = &self.progress_bar {
            bar.set_length(plan.len() as u64);
        }

        for unit in &plan {
            if self
                .shutdown
                .as_ref()
                .is_some_and(|s| s.is_shutdown_requested())
            {
                warn!(next = %unit.date(), processed, "Cancellation requested, stopping before next day");
                cancelled = true;
                break;
            }

            let result = self.pipeline.process(unit).await;
            let errors_before = failures.len();
            self.record(&mut checkpoint, &result, &mut failures)?;
            checkpoint.mark_processed(unit.date());

            processed += 1;
            since_checkpoint += 1;
            progress.record_unit(
                unit.date(),
                result.records_loaded,
                (failures.len() - errors_before) as u64,
            );

            if since_checkpoint >= self.config.checkpoint_every {
                checkpoint.touch();
                self.checkpoints.save(&checkpoint)?;
                since_checkpoint = 0;
            }

            if progress.should_report(self.config.progress_every) {
                info!("{}", progress.format_progress());
            }
            if let Some(bar) = &self.progress_bar {
                bar.set_message(unit.date().to_string());
                bar.inc(1);
            }
        }

        if !cancelled {
            self.transition(RunPhase::Completing);
        }
        checkpoint.touch();
        self.checkpoints.save(&checkpoint)?;
        if let Some(bar) = &self.progress_bar {
            bar.finish_and_clear();
        }

        self.transition(if cancelled {
            RunPhase::Interrupted
        } else {
            RunPhase::Done
        });

        let summary = RunSummary {
            counters: checkpoint.stats.clone(),
            fetch: self.pipeline.fetch_client().stats().snapshot(),
            failures,
            planned: plan.len(),
            processed,
            skipped,
            cancelled,
            phase: self.phase,
            elapsed: started.elapsed(),
        };
        info!(
            processed = summary.processed,
            planned = summary.planned,
            errors = summary.failures.len(),
            records_loaded = summary.counters.records_loaded,
            cancelled,
            "Backfill run finished"
        );
        Ok(summary)
    }

    /// Prepare and execute in one call.
    pub async fn run(&mut self) -> Result<RunSummary, BackfillError> {
        let prepared = self.prepare()?;
        self.execute(prepared).await
    }

    /// Fold one unit result into the counters and the error log.
    fn record(
        &self,
        checkpoint: &mut Checkpoint,
        result: &UnitResult,
        failures: &mut Vec<UnitFailure>,
    ) -> Result<(), BackfillError> {
        let stats = &mut checkpoint.stats;
        stats.units_processed += result.dates_attempted();
        if result.fetched {
            if result.has_data {
                stats.dates_with_data += 1;
            } else {
                stats.dates_no_data += 1;
            }
        }
        stats.races += result.parents;
        stats.runners += result.children;
        stats.enrichment += result.enrichment;
        stats.rejected_entries += result.rejected.len() as u64;
        stats.records_loaded += result.records_loaded;

        let failure = if let Some(error) = &result.error {
            warn!(date = %result.date, stage = %error.stage(), error = %error, "Day failed");
            metrics::record_unit_outcome(UnitOutcome::Failed);
            Some((error.stage(), error.to_string()))
        } else {
            metrics::record_unit_outcome(if result.has_data {
                UnitOutcome::Data
            } else {
                UnitOutcome::NoData
            });
            result.rejected.first().map(|first| {
                (
                    PipelineStage::Transform,
                    format!(
                        "{} entries rejected (first: entry {}: {})",
                        result.rejected.len(),
                        first.index,
                        first.reason
                    ),
                )
            })
        };

        if let Some((stage, error)) = failure {
            self.error_log
                .append(&ErrorEntry::new(result.date, stage, error.clone()))?;
            stats.errors += 1;
            failures.push(UnitFailure {
                date: result.date,
                stage,
                error,
            });
        }
        Ok(())
    }
}
