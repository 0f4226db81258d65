//! Resume capability for backfill runs
//!
//! Versioned checkpoint with atomic writes, the run lock that keeps two
//! engines off the same checkpoint, and the append-only error log.

pub mod checkpoint;
pub mod error_log;
pub mod lock;
pub mod state;

pub use checkpoint::{AggregateCounters, Checkpoint, DateRange, CHECKPOINT_SCHEMA_VERSION};
pub use error_log::{ErrorEntry, ErrorLog};
pub use lock::RunLock;
pub use state::{read as read_checkpoint, CheckpointStore, ResumeError};
