//! core::ops::lock
//!
//! Exclusive file locks guarding config scopes and image cache entries.
//!
//! # Architecture
//!
//! Writers of a Value Store take an exclusive lock on `<file>.lock` for the
//! whole read-modify-write cycle. The image cache takes one lock per
//! `(cacheRoot, name:tag)` entry and the oc cache one per version. All are
//! OS-level locks via `fs2`, so they serialize across processes as well as
//! threads.
//!
//! # Invariants
//!
//! - `acquire` blocks until the lock is free
//! - A lock is released when its guard drops, including during unwinding
//! - Lock files are left in place; only the OS lock is released
//!
//! # Example
//!
//! ```ignore
//! use minicluster::core::ops::{lock_path_for, FileLock};
//!
//! let _lock = FileLock::acquire(&lock_path_for(&config_path))?;
//! // read, modify, write
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::trace;

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to create lock file '{}': {source}", path.display())]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to lock '{}': {source}", path.display())]
    Acquire {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Guard holding an exclusive lock on a lock file.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    file: File,
}

impl FileLock {
    /// Lock `path`, creating it and its parent directories if needed.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let create = |source| LockError::Create {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(create)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(create)?;

        file.lock_exclusive().map_err(|source| LockError::Acquire {
            path: path.to_path_buf(),
            source,
        })?;
        trace!(path = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        trace!(path = %self.path.display(), "lock released");
    }
}

/// Lock file path guarding a data file: `<file>.lock`.
pub fn lock_path_for(file: &Path) -> PathBuf {
    let mut name = file
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    file.with_file_name(name)
}
