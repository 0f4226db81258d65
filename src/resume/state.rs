//! Checkpoint persistence
//!
//! Atomic writes (temp file, fsync, rename) so a reader never observes a
//! half-written checkpoint, plus the non-shrinking guard on `processed_dates`.

use super::checkpoint::Checkpoint;
use super::lock::RunLock;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Maximum accepted checkpoint size (10 MB) to prevent memory exhaustion
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Owner of one checkpoint file for the duration of a run.
///
/// Holds the run lock; a second store on the same path fails to open.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    last_saved: Option<BTreeSet<NaiveDate>>,
    _lock: RunLock,
}

impl CheckpointStore {
    /// Lock `path` and return a store for it. The file itself may not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ResumeError> {
        let path = path.into();
        let lock = RunLock::try_acquire(&path)?;
        debug!(checkpoint = %path.display(), lock = %lock.path().display(), "Checkpoint store opened");
        Ok(Self {
            path,
            last_saved: None,
            _lock: lock,
        })
    }

    /// Checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint.
    ///
    /// A missing, unreadable, or invalid file is reported as absent (the
    /// caller falls back to a fresh run); the reason is logged.
    pub fn load(&self) -> Option<Checkpoint> {
        match read(&self.path) {
            Ok(Some(checkpoint)) => {
                info!(
                    path = %self.path.display(),
                    processed = checkpoint.processed_dates.len(),
                    last_date = ?checkpoint.last_date,
                    "Checkpoint loaded"
                );
                Some(checkpoint)
            }
            Ok(None) => {
                debug!(path = %self.path.display(), "No checkpoint file");
                None
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unusable checkpoint, starting fresh"
                );
                None
            }
        }
    }

    /// Persist `checkpoint` atomically.
    ///
    /// Refuses to save when a date recorded by a previous save of this store
    /// is missing from `checkpoint`.
    pub fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), ResumeError> {
        if let Some(previous) = &self.last_saved {
            let missing = checkpoint.missing_from(previous);
            if let Some(first) = missing.first() {
                return Err(ResumeError::Regression {
                    missing: missing.len(),
                    first: *first,
                });
            }
        }

        debug!(
            path = %self.path.display(),
            processed = checkpoint.processed_dates.len(),
            "Saving checkpoint"
        );

        let json = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        write_atomic(&self.path, json.as_bytes())?;
        self.last_saved = Some(checkpoint.processed_dates.clone());

        info!(
            path = %self.path.display(),
            processed = checkpoint.processed_dates.len(),
            last_date = ?checkpoint.last_date,
            "Checkpoint saved"
        );
        Ok(())
    }
}

/// Read and validate a checkpoint without taking the run lock.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read(path: &Path) -> Result<Option<Checkpoint>, ResumeError> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ResumeError::IoError(e.to_string())),
    };
    if metadata.len() > MAX_STATE_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_STATE_FILE_SIZE,
        });
    }

    let contents = std::fs::read_to_string(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    let checkpoint: Checkpoint = serde_json::from_str(&contents)
        .map_err(|e| ResumeError::DeserializationError(e.to_string()))?;
    checkpoint.validate()?;
    Ok(Some(checkpoint))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ResumeError> {
    let parent_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(bytes)
        .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

    // Make the rename itself durable
    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Errors related to checkpoint and error log persistence
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: u32,
        /// Found schema version
        found: u32,
    },

    /// Checkpoint parsed but its contents are inconsistent
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// A save would drop previously recorded dates
    #[error("checkpoint regression: {missing} processed date(s) would be lost (first: {first})")]
    Regression {
        /// Number of dates missing
        missing: usize,
        /// Earliest missing date
        first: NaiveDate,
    },

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Another run holds the checkpoint
    #[error("checkpoint is locked by another run ({path}, pid {pid:?})")]
    Locked {
        /// Lock file path
        path: String,
        /// Process holding the lock, if recorded
        pid: Option<u32>,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
