//! addon
//!
//! Named command sequences applied to a freshly brought-up cluster.
//!
//! # Architecture
//!
//! An addon is a directory under `<home>/addons/` holding one `*.addon`
//! file: a `#`-comment header of `Key: value` metadata followed by one
//! command per line. Commands reference variables as `#{name}`, which are
//! expanded from an [`command::ExecutionContext`] just before each runs.
//!
//! Whether an addon is enabled, and at which priority, is not part of its
//! definition. That lives in [`AddonRecord`]s stored under the global
//! `addons` key, decoded into a typed map.
//!
//! # Modules
//!
//! - [`parser`] - `*.addon` file parsing
//! - [`command`] - Command kinds, interpolation, execution
//! - [`manager`] - Installed addons joined with their records
//!
//! # Invariants
//!
//! - Addons apply enabled first, then by ascending priority, then by name
//! - The first failing command stops its addon and every addon after it

pub mod command;
pub mod manager;
pub mod parser;

pub use command::{AddonCommand, ExecutionContext};
pub use manager::AddonManager;
pub use parser::{parse_addon_dir, AddonDefinition};

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::{ConfigError, ValueStore};

/// Global key holding the addon record map.
pub const ADDONS_KEY: &str = "addons";

/// Errors from addon parsing and execution.
#[derive(Debug, Error)]
pub enum AddonError {
    #[error("invalid addon '{name}' in '{path}': {message}")]
    Parse {
        name: String,
        path: PathBuf,
        message: String,
    },

    #[error("unable to find addon '{name}' in addon directory '{dir}'")]
    NotInstalled { name: String, dir: PathBuf },

    #[error("addon '{addon}' requires variables that are not set: {}", missing.join(", "))]
    MissingVariables { addon: String, missing: Vec<String> },

    /// A command exited non-zero; later commands and addons did not run.
    #[error("error executing command '{command}' of addon '{addon}': {message}")]
    Execution {
        addon: String,
        command: String,
        message: String,
    },

    #[error("malformed addon records: {0}")]
    Records(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to write addon output: {0}")]
    Output(#[from] std::io::Error),
}

/// Persisted enablement of one addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonRecord {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Priority", default)]
    pub priority: i64,
    #[serde(rename = "Enabled", default)]
    pub enabled: bool,
}

impl AddonRecord {
    pub fn enabled(name: &str, priority: i64) -> Self {
        Self {
            name: name.to_string(),
            priority,
            enabled: true,
        }
    }
}

/// Application order: enabled first, then priority ascending, then name.
pub fn apply_order(a: &AddonRecord, b: &AddonRecord) -> Ordering {
    b.enabled
        .cmp(&a.enabled)
        .then(a.priority.cmp(&b.priority))
        .then_with(|| a.name.cmp(&b.name))
}

/// Decode the record map from the global store.
pub fn load_records(store: &ValueStore) -> Result<BTreeMap<String, AddonRecord>, AddonError> {
    match store.get_json(ADDONS_KEY) {
        None | Some(serde_json::Value::Null) => Ok(BTreeMap::new()),
        Some(json) => serde_json::from_value(json).map_err(|e| AddonError::Records(e.to_string())),
    }
}

/// Encode and persist the record map.
pub fn save_records(
    store: &mut ValueStore,
    records: &BTreeMap<String, AddonRecord>,
) -> Result<(), AddonError> {
    let json = serde_json::to_value(records).map_err(|e| AddonError::Records(e.to_string()))?;
    store.set_json(ADDONS_KEY, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{Scope, SettingRegistry};
    use tempfile::TempDir;

    #[test]
    fn ordering_puts_enabled_low_priority_first() {
        let mut records = vec![
            AddonRecord::enabled("a", 5),
            AddonRecord::enabled("b", 1),
            AddonRecord {
                name: "c".into(),
                priority: 1,
                enabled: false,
            },
            AddonRecord::enabled("aa", 1),
        ];
        records.sort_by(apply_order);
        let names: Vec<_> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["aa", "b", "a", "c"]);
    }

    #[test]
    fn records_round_trip_through_global_store() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("config.json");
        let mut store =
            ValueStore::open(Scope::Global, &path, SettingRegistry::builtin()).expect("open");

        let mut records = BTreeMap::new();
        records.insert("anyuid".to_string(), AddonRecord::enabled("anyuid", 0));
        save_records(&mut store, &records).expect("save");

        let raw = std::fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"Enabled\": true"));

        let reopened =
            ValueStore::open(Scope::Global, &path, SettingRegistry::builtin()).expect("reopen");
        assert_eq!(load_records(&reopened).expect("load"), records);
    }

    #[test]
    fn missing_key_means_no_records() {
        let temp = TempDir::new().expect("tempdir");
        let store = ValueStore::open(
            Scope::Global,
            &temp.path().join("config.json"),
            SettingRegistry::builtin(),
        )
        .expect("open");
        assert!(load_records(&store).expect("load").is_empty());
    }
}
