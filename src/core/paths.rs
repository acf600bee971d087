//! core::paths
//!
//! Centralized path routing for minicluster storage locations.
//!
//! # Storage Layout
//!
//! All state lives under a single home directory:
//! - `config/config.json` - Global Value Store
//! - `machines/<machine>.json` - Per-instance Value Store and Instance State
//! - `cache/oc/<version>/oc` - Cached `oc` binaries
//! - `cache/images/` - Image cache (blobs and index)
//! - `addons/<name>/` - Installed addon definitions
//! - `logs/` - Cluster-up and background export logs
//!
//! **Hard rule:** no code outside this module joins path segments onto the
//! home directory. Everything goes through `HomePaths`.
//!
//! # Home Resolution
//!
//! 1. `$MINICLUSTER_HOME` if set and non-empty
//! 2. `~/.minicluster`
//!
//! # Example
//!
//! ```
//! use minicluster::core::paths::HomePaths;
//! use std::path::PathBuf;
//!
//! let paths = HomePaths::new(PathBuf::from("/home/dev/.minicluster"));
//!
//! assert_eq!(
//!     paths.global_config_path(),
//!     PathBuf::from("/home/dev/.minicluster/config/config.json")
//! );
//! ```

use std::path::{Path, PathBuf};

/// Environment variable that overrides the home directory.
pub const HOME_ENV: &str = "MINICLUSTER_HOME";

/// Name of the home directory under the user's home.
const HOME_DIR_NAME: &str = ".minicluster";

/// Centralized path routing for minicluster storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomePaths {
    /// Root of all persisted state.
    pub home: PathBuf,
}

impl HomePaths {
    /// Create paths rooted at an explicit home directory.
    pub fn new(home: PathBuf) -> Self {
        Self { home }
    }

    /// Resolve the home directory from the environment.
    ///
    /// Returns `None` when neither `$MINICLUSTER_HOME` nor a user home
    /// directory is available.
    pub fn from_env() -> Option<Self> {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.trim().is_empty() {
                return Some(Self::new(PathBuf::from(home)));
            }
        }
        dirs::home_dir().map(|home| Self::new(home.join(HOME_DIR_NAME)))
    }

    /// Get the home directory as a Path reference.
    pub fn home(&self) -> &Path {
        &self.home
    }

    // =========================================================================
    // Config scopes
    // =========================================================================

    /// Directory holding the global config file.
    pub fn config_dir(&self) -> PathBuf {
        self.home.join("config")
    }

    /// Path to the global Value Store.
    ///
    /// This is `<home>/config/config.json`.
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir().join("config.json")
    }

    /// Directory holding per-instance files.
    pub fn machines_dir(&self) -> PathBuf {
        self.home.join("machines")
    }

    /// Path to the per-instance Value Store for a machine.
    ///
    /// This is `<home>/machines/<machine>.json`.
    pub fn instance_config_path(&self, machine: &str) -> PathBuf {
        self.machines_dir().join(format!("{}.json", machine))
    }

    // =========================================================================
    // Caches
    // =========================================================================

    /// Root of all caches.
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Root of the `oc` binary cache.
    pub fn oc_cache_dir(&self) -> PathBuf {
        self.cache_dir().join("oc")
    }

    /// Root of the image cache. The image store adds its own `images/` level.
    pub fn image_cache_root(&self) -> PathBuf {
        self.cache_dir()
    }

    /// Directory of installed addons.
    pub fn addons_dir(&self) -> PathBuf {
        self.home.join("addons")
    }

    /// Directory for log files.
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Path of the captured cluster bring-up log.
    pub fn cluster_up_log_path(&self) -> PathBuf {
        self.logs_dir().join("cluster-up.log")
    }

    /// Path of the log for one background image export run.
    pub fn image_export_log_path(&self, timestamp: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("image-export-{}.log", timestamp))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Ensure the directory structure exists.
    ///
    /// # Errors
    ///
    /// Returns an IO error if directory creation fails.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.config_dir())?;
        std::fs::create_dir_all(self.machines_dir())?;
        std::fs::create_dir_all(self.oc_cache_dir())?;
        std::fs::create_dir_all(self.addons_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
