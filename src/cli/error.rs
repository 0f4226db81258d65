//! CLI error types and conversions

use crate::backfill::BackfillError;
use crate::fetcher::ProviderError;
use crate::resume::ResumeError;
use crate::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Run could not start or aborted
    #[error("backfill error: {0}")]
    BackfillError(#[from] BackfillError),

    /// Provider client could not be built
    #[error("provider error: {0}")]
    ProviderError(#[from] ProviderError),

    /// Store error
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Operator declined the confirmation prompt
    #[error("aborted by user")]
    Aborted,

    /// Run finished without processing every unit cleanly
    #[error("backfill incomplete: {processed}/{planned} days processed, {failed} with errors (cancelled: {cancelled})")]
    RunIncomplete {
        /// Units attempted
        processed: usize,
        /// Units planned
        planned: usize,
        /// Units recorded in the error log
        failed: usize,
        /// Stopped by cancellation
        cancelled: bool,
    },
}
