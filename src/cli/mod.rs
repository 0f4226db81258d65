//! CLI command implementations

pub mod backfill;
pub mod coverage;
pub mod error;
pub mod inspect;

pub use backfill::{BackfillArgs, Cli, Commands};
pub use coverage::CoverageArgs;
pub use error::CliError;
pub use inspect::{ErrorsArgs, StatusArgs};
