//! core::config::store
//!
//! The Value Store for one config scope.
//!
//! # Architecture
//!
//! A `ValueStore` is the in-memory view of one JSON file. Registered keys
//! are decoded into typed [`Value`]s; everything else is kept as raw JSON
//! so writing the file back never drops data it does not understand.
//!
//! Every mutation is a locked read-modify-write of the file:
//!
//! ```text
//! lock <file>.lock -> read file -> apply change -> atomic write -> unlock
//! ```
//!
//! so two processes setting different keys never lose each other's write.
//!
//! # Invariants
//!
//! - `set` validates against every validator before anything is stored
//! - Callbacks fire only after the value is persisted
//! - Defaults are never written to disk; `get_or_default` materializes
//!   them on access
//! - Stores for different scopes are independent files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::persist::{self, Document};
use super::registry::{SettingContext, SettingRegistry, HIDDEN_KEYS};
use super::ConfigError;
use crate::core::ops::{lock_path_for, FileLock};
use crate::core::value::Value;

/// Which of the two config scopes a store belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    Instance(String),
}

/// Typed view of one persisted config file.
#[derive(Debug, Clone)]
pub struct ValueStore {
    scope: Scope,
    path: PathBuf,
    registry: Arc<SettingRegistry>,
    values: BTreeMap<String, Value>,
}

impl ValueStore {
    /// Load the store backing `path`. A missing file is an empty store.
    pub fn open(
        scope: Scope,
        path: &Path,
        registry: Arc<SettingRegistry>,
    ) -> Result<Self, ConfigError> {
        let document = persist::read(path)?;
        let mut store = Self {
            scope,
            path: path.to_path_buf(),
            registry,
            values: BTreeMap::new(),
        };
        store.replace_from(document);
        Ok(store)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn registry(&self) -> &Arc<SettingRegistry> {
        &self.registry
    }

    fn replace_from(&mut self, document: Document) {
        self.values = document
            .into_iter()
            .map(|(key, json)| {
                let value = match self.registry.get(&key) {
                    Some(setting) => setting.kind.from_json(&json),
                    None => Value::Raw(json),
                };
                (key, value)
            })
            .collect();
    }

    /// Set a registered setting from raw text.
    ///
    /// Returns the messages produced by the setting's callbacks.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::UnknownSetting`] if the name is not registered
    /// - [`ConfigError::Validation`] with every validator failure
    /// - [`ConfigError::Coercion`] if the text does not fit the kind
    /// - persistence errors from the write
    pub fn set(
        &mut self,
        name: &str,
        raw: &str,
        cx: &SettingContext,
    ) -> Result<Vec<String>, ConfigError> {
        let registry = Arc::clone(&self.registry);
        let setting = registry.find(name)?;

        setting.validate(raw).map_err(|errors| ConfigError::Validation {
            name: name.to_string(),
            errors,
        })?;
        let value = setting
            .kind
            .coerce(raw)
            .map_err(|source| ConfigError::Coercion {
                name: name.to_string(),
                source,
            })?;

        self.mutate(|document| {
            document.insert(name.to_string(), value.to_json());
        })?;
        debug!(scope = ?self.scope, setting = name, "stored setting");

        Ok(setting
            .callbacks
            .iter()
            .filter_map(|callback| callback(cx, name, raw))
            .collect())
    }

    /// Store a raw JSON value under a key the registry does not describe,
    /// such as the `addons` map.
    pub fn set_json(&mut self, key: &str, json: serde_json::Value) -> Result<(), ConfigError> {
        self.mutate(|document| {
            document.insert(key.to_string(), json);
        })
    }

    /// Get the stored value, if any.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get the stored value, falling back to the registered default.
    pub fn get_or_default(&self, name: &str) -> Option<Value> {
        self.get(name).cloned().or_else(|| {
            self.registry
                .get(name)
                .and_then(|setting| setting.default.clone())
        })
    }

    /// Raw JSON for any key, registered or not.
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        self.values.get(key).map(Value::to_json)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Remove a key. Removing an absent key is not an error.
    pub fn unset(&mut self, name: &str) -> Result<(), ConfigError> {
        self.mutate(|document| {
            document.remove(name);
        })
    }

    /// Stored apply settings, in registry order, hidden keys excluded.
    pub fn iterate(&self) -> impl Iterator<Item = (&str, &Value)> {
        let mut entries: Vec<(usize, &str, &Value)> = self
            .values
            .iter()
            .filter(|(name, _)| !HIDDEN_KEYS.contains(&name.as_str()))
            .filter_map(|(name, value)| {
                let setting = self.registry.get(name)?;
                let position = self.registry.position(name)?;
                setting.apply.then_some((position, name.as_str(), value))
            })
            .collect();
        entries.sort_by_key(|(position, _, _)| *position);
        entries.into_iter().map(|(_, name, value)| (name, value))
    }

    /// Re-read the file, discarding in-memory state.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        let document = persist::read(&self.path)?;
        self.replace_from(document);
        Ok(())
    }

    /// Locked read-modify-write of the backing file.
    fn mutate(&mut self, change: impl FnOnce(&mut Document)) -> Result<(), ConfigError> {
        let _lock = FileLock::acquire(&lock_path_for(&self.path))?;
        let mut document = persist::read(&self.path)?;
        change(&mut document);
        persist::write(&self.path, &document)?;
        self.replace_from(document);
        Ok(())
    }
}
