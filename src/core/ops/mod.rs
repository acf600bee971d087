//! core::ops
//!
//! Cross-process coordination primitives.
//!
//! # Modules
//!
//! - [`lock`] - Exclusive file locks for config scopes and cache entries
//!
//! # Architecture
//!
//! Every write to persisted state:
//! 1. Acquires the lock guarding the target file
//! 2. Re-reads the file so concurrent writers are not clobbered
//! 3. Writes atomically (temp file, fsync, rename)
//! 4. Releases the lock on drop

pub mod lock;

pub use lock::{lock_path_for, FileLock, LockError};
