//! core::config
//!
//! Hierarchical configuration: registry, value stores, persistence, and
//! precedence resolution.
//!
//! # Overview
//!
//! minicluster has two configuration scopes:
//! - **Global**: `<home>/config/config.json`, shared by every instance
//! - **Instance**: `<home>/machines/<machine>.json`, bound to one VM
//!
//! Writing a key in one scope never changes the other scope's view of it.
//!
//! # Precedence
//!
//! Reads through the [`Resolver`] return the first layer that has a value:
//! 1. CLI flag explicitly given
//! 2. `MINICLUSTER_<NAME>` environment variable (env-observable settings only)
//! 3. Persisted value, instance scope first, then global
//! 4. Registered default
//!
//! # Modules
//!
//! - [`persist`] - Atomic JSON read/write
//! - [`store`] - Value Store for one scope
//! - [`registry`] - Setting descriptors and the built-in catalogue
//! - [`validators`] - Per-key validators
//! - [`resolver`] - Flag > env > persisted > default
//!
//! # Example
//!
//! ```ignore
//! use minicluster::core::config::{Resolver, ProcessEnv, FlagSet, Scope, SettingRegistry, ValueStore};
//!
//! let registry = SettingRegistry::builtin();
//! let global = ValueStore::open(Scope::Global, &paths.global_config_path(), registry.clone())?;
//! let flags = FlagSet::default();
//! let resolver = Resolver::new(&registry, &flags, &ProcessEnv, None, &global);
//! println!("memory = {:?}", resolver.string("memory")?);
//! ```

pub mod persist;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod validators;

pub use registry::{RegistryError, Setting, SettingContext, SettingRegistry};
pub use resolver::{env_var_name, EnvSource, FlagSet, Layer, MapEnv, ProcessEnv, Resolver};
pub use store::{Scope, ValueStore};

use std::path::PathBuf;

use thiserror::Error;

use crate::core::ops::LockError;
use crate::core::value::CoercionError;

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown setting '{0}'")]
    UnknownSetting(String),

    #[error("invalid value for '{name}': {}", errors.join("; "))]
    Validation { name: String, errors: Vec<String> },

    #[error("invalid value for '{name}': {source}")]
    Coercion {
        name: String,
        source: CoercionError,
    },

    #[error("environment variable {var} has an invalid value for '{name}': {source}")]
    InvalidEnvValue {
        name: String,
        var: String,
        source: CoercionError,
    },

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("failed to write config file '{path}': {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config lock: {0}")]
    Lock(#[from] LockError),

    #[error("home directory not found; set MINICLUSTER_HOME")]
    NoHomeDir,
}

impl ConfigError {
    /// True for errors raised while reading or writing the JSON files.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            ConfigError::ReadError { .. }
                | ConfigError::ParseError { .. }
                | ConfigError::WriteError { .. }
                | ConfigError::Lock(_)
        )
    }
}
