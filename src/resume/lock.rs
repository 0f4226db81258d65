//! Advisory run lock next to the checkpoint file
//!
//! One backfill run owns a checkpoint file at a time. The lock is an `fs2`
//! exclusive lock on `<checkpoint>.lock`, held until [`RunLock`] is dropped.

use super::state::ResumeError;
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock guarding one checkpoint file.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    lock_path: PathBuf,
}

impl RunLock {
    /// Lock file path for `checkpoint_path` (`<checkpoint>.lock`).
    pub fn lock_path_for(checkpoint_path: &Path) -> PathBuf {
        let mut name = OsString::from(checkpoint_path.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Try to lock `checkpoint_path` without blocking.
    ///
    /// Fails with [`ResumeError::Locked`] when another run holds it.
    pub fn try_acquire(checkpoint_path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = checkpoint_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let lock_path = Self::lock_path_for(checkpoint_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                let mut holder = String::new();
                let _ = file.read_to_string(&mut holder);
                return Err(ResumeError::Locked {
                    path: lock_path.display().to_string(),
                    pid: holder.trim().parse().ok(),
                });
            }
            Err(e) => {
                return Err(ResumeError::LockError(format!("Failed to acquire lock: {e}")));
            }
        }

        // Record the holder for operators inspecting a stuck lock
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| write!(file, "{}", std::process::id()))
            .map_err(|e| ResumeError::LockError(format!("Failed to write lock owner: {e}")))?;

        debug!(path = %lock_path.display(), "Acquired run lock");
        Ok(Self { file, lock_path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.lock_path.display(), "Released run lock");
    }
}
