//! core::config::persist
//!
//! Atomic JSON persistence for Value Stores.
//!
//! # Invariants
//!
//! - A missing file reads as an empty map, never an error
//! - Writes go to a sibling temp file, are fsynced, then renamed over the
//!   target, so readers see either the old or the new document
//! - Output is indented with keys in sorted order, so textual diffs of the
//!   file are meaningful and `read(write(c)) == c`
//!
//! This layer holds no state between calls.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use super::ConfigError;

/// A persisted config document: top-level keys in sorted order.
pub type Document = BTreeMap<String, serde_json::Value>;

/// Read a config document.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or is not a
/// JSON object.
pub fn read(path: &Path) -> Result<Document, ConfigError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if contents.trim().is_empty() {
        return Ok(Document::new());
    }

    serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Write a config document atomically.
pub fn write(path: &Path, document: &Document) -> Result<(), ConfigError> {
    let mut contents =
        serde_json::to_string_pretty(document).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    contents.push('\n');

    write_atomic(path, contents.as_bytes()).map_err(|e| ConfigError::WriteError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Create the file as an empty JSON object if it does not exist yet.
pub fn ensure_exists(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    write(path, &Document::new())
}

/// Write bytes to `path` through a temp file, fsync, and rename.
///
/// Shared with the binary and image caches, which stage their payloads the
/// same way.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_sibling(path);
    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn temp_sibling(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}
