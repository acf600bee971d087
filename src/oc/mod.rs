//! oc
//!
//! Version-keyed cache of the `oc` client binary.
//!
//! # Architecture
//!
//! For cluster version `v` the binary lives at
//! `<cache>/oc/<v>/oc` (`oc.exe` on Windows). [`OcCache::ensure_cached`]
//! returns that path if an executable file is already there; otherwise it
//! downloads the binary through a [`Fetcher`], verifies it against the
//! published `.sha256` when one exists, writes it atomically, and makes it
//! executable.
//!
//! Concurrent `start` invocations for the same version serialize on a lock
//! next to the binary, and the second one finds the file already cached.
//!
//! # Modules
//!
//! - [`fetch`] - The download seam and its `reqwest` implementation
//! - [`flags`] - Parsing `oc cluster up -h` for supported flags
//!
//! # Example
//!
//! ```ignore
//! use minicluster::oc::{OcCache, fetch::HttpFetcher};
//!
//! let cache = OcCache::new(paths.oc_cache_dir(), Arc::new(HttpFetcher::default()));
//! let oc = cache.ensure_cached("v3.6.0")?;
//! ```

pub mod fetch;
pub mod flags;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::core::config::persist::write_atomic;
use crate::core::ops::{lock_path_for, FileLock, LockError};
use fetch::{FetchError, Fetcher};

/// Where release binaries are published.
pub const DEFAULT_BASE_URL: &str = "https://mirror.openshift.com/pub/openshift-v3/clients";

/// Errors from the binary cache.
#[derive(Debug, Error)]
pub enum OcCacheError {
    #[error("no oc binary published for version {version} at {url}")]
    NotPublished { version: String, url: String },

    #[error("failed to download oc {version}: {source}")]
    Download {
        version: String,
        source: FetchError,
    },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    Checksum {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("oc cache lock: {0}")]
    Lock(#[from] LockError),
}

/// Name of the binary on this platform.
pub fn binary_name() -> &'static str {
    if cfg!(windows) {
        "oc.exe"
    } else {
        "oc"
    }
}

/// Platform directory name used by the release mirror.
fn platform_dir() -> &'static str {
    if cfg!(target_os = "macos") {
        "macosx"
    } else if cfg!(windows) {
        "windows"
    } else {
        "linux"
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Cache of `oc` binaries keyed by cluster version.
#[derive(Clone)]
pub struct OcCache {
    root: PathBuf,
    base_url: String,
    fetcher: Arc<dyn Fetcher>,
}

impl OcCache {
    /// A cache under `root` (normally `<home>/cache/oc`).
    pub fn new(root: PathBuf, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            root,
            base_url: DEFAULT_BASE_URL.to_string(),
            fetcher,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Where version `version` lives once cached.
    pub fn path_for(&self, version: &str) -> PathBuf {
        self.root.join(version).join(binary_name())
    }

    pub fn is_cached(&self, version: &str) -> bool {
        is_executable(&self.path_for(version))
    }

    /// Download URL for version `version`.
    pub fn url_for(&self, version: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url,
            version.trim_start_matches('v'),
            platform_dir(),
            binary_name()
        )
    }

    /// Return the cached binary for `version`, downloading it if needed.
    pub fn ensure_cached(&self, version: &str) -> Result<PathBuf, OcCacheError> {
        let path = self.path_for(version);
        if is_executable(&path) {
            debug!(path = %path.display(), "oc already cached");
            return Ok(path);
        }

        let dir = self.root.join(version);
        fs::create_dir_all(&dir).map_err(|source| OcCacheError::Io {
            path: dir.clone(),
            source,
        })?;
        let _lock = FileLock::acquire(&lock_path_for(&path))?;
        if is_executable(&path) {
            return Ok(path);
        }

        let url = self.url_for(version);
        info!(version, url = %url, "downloading oc");
        let download = |url: &str| {
            self.fetcher
                .get(url)
                .map_err(|source| OcCacheError::Download {
                    version: version.to_string(),
                    source,
                })
        };

        let body = download(&url)?.ok_or_else(|| OcCacheError::NotPublished {
            version: version.to_string(),
            url: url.clone(),
        })?;

        let checksum_url = format!("{}.sha256", url);
        if let Some(published) = download(&checksum_url)? {
            verify_sha256(&url, &body, &published)?;
        }

        write_atomic(&path, &body).map_err(|source| OcCacheError::Io {
            path: path.clone(),
            source,
        })?;
        make_executable(&path).map_err(|source| OcCacheError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Compare `body` against a `sha256sum`-style checksum file.
fn verify_sha256(url: &str, body: &[u8], published: &[u8]) -> Result<(), OcCacheError> {
    let expected = String::from_utf8_lossy(published)
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    let actual = hex::encode(Sha256::digest(body));
    if expected == actual {
        Ok(())
    } else {
        Err(OcCacheError::Checksum {
            url: url.to_string(),
            expected,
            actual,
        })
    }
}
