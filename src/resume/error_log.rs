//! Append-only error log (JSON Lines)
//!
//! One `{"timestamp","date","stage","error"}` object per line. The engine only
//! appends; operators read it back to decide which dates to replay.

use super::state::ResumeError;
use crate::backfill::PipelineStage;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One failed (or partially rejected) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// When the failure was recorded
    pub timestamp: DateTime<Utc>,
    /// Unit date
    pub date: NaiveDate,
    /// Pipeline stage that failed
    pub stage: PipelineStage,
    /// Error message
    pub error: String,
}

impl ErrorEntry {
    /// Entry stamped with the current time.
    pub fn new(date: NaiveDate, stage: PipelineStage, error: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            date,
            stage,
            error: error.into(),
        }
    }
}

/// Error log file handle.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: PathBuf,
}

impl ErrorLog {
    /// Log at `path`; the file is created on first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and sync it to disk.
    pub fn append(&self, entry: &ErrorEntry) -> Result<(), ResumeError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let mut line = serde_json::to_string(entry)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ResumeError::IoError(format!("Failed to open error log: {e}")))?;
        file.write_all(line.as_bytes())
            .map_err(|e| ResumeError::IoError(format!("Failed to append to error log: {e}")))?;
        file.sync_data()
            .map_err(|e| ResumeError::IoError(format!("Failed to sync error log: {e}")))?;
        Ok(())
    }

    /// Every readable entry, oldest first. A missing file is an empty log.
    pub fn read_all(&self) -> Result<Vec<ErrorEntry>, ResumeError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        };

        let mut entries = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| ResumeError::IoError(e.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ErrorEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable error log line"
                ),
            }
        }
        Ok(entries)
    }

    /// Distinct dates with at least one entry, ascending.
    pub fn failed_dates(&self) -> Result<BTreeSet<NaiveDate>, ResumeError> {
        Ok(self.read_all()?.into_iter().map(|e| e.date).collect())
    }
}
