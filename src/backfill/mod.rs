//! Backfill planning, pipeline and run engine
//!
//! - [`partition`] expands a date range into ordered work units
//! - [`rate_limit`] is the minimum-interval gate in front of the provider
//! - [`transform`] normalizes raw entries into record batches
//! - [`pipeline`] runs fetch, transform and load for one unit
//! - [`progress`] estimates throughput and ETA
//! - [`engine`] drives a whole run with checkpoints and the error log

pub mod config;
pub mod engine;
pub mod partition;
pub mod pipeline;
pub mod progress;
pub mod rate_limit;
pub mod transform;

pub use config::{BackfillConfig, FetchPolicy};
pub use engine::{BackfillEngine, PreparedRun, RunPhase, RunSummary, UnitFailure};
pub use partition::plan;
pub use pipeline::{Pipeline, PipelineError, PipelineStage, UnitResult};
pub use progress::{estimate, Estimate, ProgressState};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use transform::{
    RejectedEntry, ResultsTransformer, TransformError, TransformOptions, TransformOutput,
    Transformer,
};

use crate::resume::ResumeError;

/// Failures that abort a whole run.
#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Configuration cannot produce a working run
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Checkpoint or error log could not be persisted, or the checkpoint is locked
    #[error("resume state error: {0}")]
    Resume(#[from] ResumeError),
}
