//! core::config::resolver
//!
//! Precedence resolution over flags, environment, persisted scopes, and
//! registered defaults.
//!
//! # Architecture
//!
//! The resolver owns no state. It borrows the registry, the explicitly
//! given flags, an environment source, and the two Value Stores, and
//! answers "what is the effective value of `name`?" by walking the layers:
//!
//! ```text
//! flag -> MINICLUSTER_<NAME> -> instance store -> global store -> default
//! ```
//!
//! # Invariants
//!
//! - A flag the registry does not know still wins, as a string
//! - Environment overrides apply only to env-observable settings
//! - An environment value that does not parse is an error; it never falls
//!   through to a lower layer
//!
//! # Example
//!
//! ```ignore
//! let flags = FlagSet::from_pairs([("memory", "2GB")]);
//! let resolver = Resolver::new(&registry, &flags, &ProcessEnv, None, &global);
//! assert_eq!(resolver.string("memory")?, Some("2GB".to_string()));
//! ```

use std::collections::BTreeMap;

use super::registry::SettingRegistry;
use super::store::ValueStore;
use super::ConfigError;
use crate::core::value::Value;

/// Process identifier used as the environment variable prefix.
pub const ENV_PREFIX: &str = "MINICLUSTER";

/// Environment variable consulted for a setting name.
///
/// `host-only-cidr` becomes `MINICLUSTER_HOST_ONLY_CIDR`.
pub fn env_var_name(name: &str) -> String {
    format!(
        "{}_{}",
        ENV_PREFIX,
        name.replace('-', "_").to_ascii_uppercase()
    )
}

/// Source of environment variables.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// A fixed environment, for tests and for child processes.
#[derive(Debug, Clone, Default)]
pub struct MapEnv(pub BTreeMap<String, String>);

impl MapEnv {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl EnvSource for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

/// Flags the CLI parser saw explicitly, as raw text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    values: BTreeMap<String, String>,
}

impl FlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut flags = Self::new();
        for (name, raw) in pairs {
            flags.insert(name, raw);
        }
        flags
    }

    pub fn insert(&mut self, name: impl Into<String>, raw: impl Into<String>) {
        self.values.insert(name.into(), raw.into());
    }

    /// Record a flag only when it was given.
    pub fn insert_opt(&mut self, name: &str, raw: Option<impl ToString>) {
        if let Some(raw) = raw {
            self.values.insert(name.to_string(), raw.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Which layer produced a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Flag,
    Env,
    Instance,
    Global,
    Default,
}

/// Read-only precedence resolver.
pub struct Resolver<'a> {
    registry: &'a SettingRegistry,
    flags: &'a FlagSet,
    env: &'a dyn EnvSource,
    instance: Option<&'a ValueStore>,
    global: &'a ValueStore,
}

impl<'a> Resolver<'a> {
    pub fn new(
        registry: &'a SettingRegistry,
        flags: &'a FlagSet,
        env: &'a dyn EnvSource,
        instance: Option<&'a ValueStore>,
        global: &'a ValueStore,
    ) -> Self {
        Self {
            registry,
            flags,
            env,
            instance,
            global,
        }
    }

    /// Resolve `name`, reporting which layer answered.
    pub fn resolve_with_layer(&self, name: &str) -> Result<Option<(Value, Layer)>, ConfigError> {
        let setting = self.registry.get(name);

        if let Some(raw) = self.flags.get(name) {
            let value = match setting {
                Some(setting) => {
                    setting
                        .kind
                        .coerce(raw)
                        .map_err(|source| ConfigError::Coercion {
                            name: name.to_string(),
                            source,
                        })?
                }
                None => Value::String(raw.to_string()),
            };
            return Ok(Some((value, Layer::Flag)));
        }

        if let Some(setting) = setting {
            if self.registry.is_env_observable(name) {
                let var = env_var_name(name);
                if let Some(raw) = self.env.var(&var) {
                    let value =
                        setting
                            .kind
                            .coerce(&raw)
                            .map_err(|source| ConfigError::InvalidEnvValue {
                                name: name.to_string(),
                                var,
                                source,
                            })?;
                    return Ok(Some((value, Layer::Env)));
                }
            }
        }

        if let Some(value) = self.instance.and_then(|store| store.get(name)) {
            return Ok(Some((value.clone(), Layer::Instance)));
        }
        if let Some(value) = self.global.get(name) {
            return Ok(Some((value.clone(), Layer::Global)));
        }

        Ok(setting
            .and_then(|s| s.default.clone())
            .map(|value| (value, Layer::Default)))
    }

    /// Resolve `name` to its effective value.
    pub fn resolve(&self, name: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.resolve_with_layer(name)?.map(|(value, _)| value))
    }

    /// The effective value rendered as text.
    pub fn string(&self, name: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.resolve(name)?.map(|value| match value {
            Value::List(items) => items.join(","),
            other => other.to_string(),
        }))
    }

    /// Text value, empty strings treated as absent.
    pub fn non_empty(&self, name: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.string(name)?.filter(|s| !s.is_empty()))
    }

    /// Boolean value; absent or non-boolean reads as false.
    pub fn bool(&self, name: &str) -> Result<bool, ConfigError> {
        Ok(match self.resolve(name)? {
            Some(Value::Bool(b)) => b,
            Some(Value::String(s)) => crate::core::value::parse_bool(&s).unwrap_or(false),
            _ => false,
        })
    }

    pub fn int(&self, name: &str) -> Result<Option<i64>, ConfigError> {
        Ok(match self.resolve(name)? {
            Some(Value::Int(i)) => Some(i),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// List value; absent reads as empty.
    pub fn list(&self, name: &str) -> Result<Vec<String>, ConfigError> {
        Ok(match self.resolve(name)? {
            Some(Value::List(items)) => items,
            Some(Value::String(s)) => crate::core::value::split_list(&s),
            _ => Vec::new(),
        })
    }

    /// Run registered validators over every explicitly given flag.
    pub fn validate_flags(&self) -> Result<(), ConfigError> {
        for (name, raw) in self.flags.iter() {
            if let Some(setting) = self.registry.get(name) {
                setting
                    .validate(raw)
                    .map_err(|errors| ConfigError::Validation {
                        name: name.to_string(),
                        errors,
                    })?;
            }
        }
        Ok(())
    }
}
