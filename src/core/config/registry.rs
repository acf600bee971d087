//! core::config::registry
//!
//! Catalogue of every known setting.
//!
//! # Architecture
//!
//! A [`Setting`] is an immutable descriptor: name, kind, default,
//! validators, callbacks, and whether it is an "apply" setting (listed by
//! `config view` and overridable from the environment). The registry is
//! built once at process start and shared behind an `Arc`; it is never
//! mutated afterwards, so concurrent reads need no locking.
//!
//! # Invariants
//!
//! - Setting names are unique; a duplicate registration is a bug and
//!   [`SettingRegistry::builtin`] panics on it
//! - Iteration follows registration order
//!
//! # Example
//!
//! ```
//! use minicluster::core::config::SettingRegistry;
//! use minicluster::core::value::Kind;
//!
//! let registry = SettingRegistry::builtin();
//! let cpus = registry.find("cpus").unwrap();
//! assert_eq!(cpus.kind, Kind::Int);
//! assert!(registry.find("no-such-setting").is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::validators;
use super::ConfigError;
use crate::core::value::{Kind, Value};

/// Validator over raw text: `(name, raw) -> Result<(), message>`.
pub type Validator = fn(&str, &str) -> Result<(), String>;

/// Callback fired after a successful `set`. Returns an optional message for
/// the user.
pub type Callback = fn(&SettingContext, &str, &str) -> Option<String>;

/// What callbacks may know about the world when they fire.
#[derive(Debug, Clone, Default)]
pub struct SettingContext {
    /// Name of the machine the CLI is operating on.
    pub machine_name: String,
    /// Whether that machine currently exists.
    pub instance_exists: bool,
}

/// Registry construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("setting '{0}' is registered twice")]
    DuplicateSetting(String),
}

/// An immutable setting descriptor.
#[derive(Clone)]
pub struct Setting {
    pub name: String,
    pub kind: Kind,
    pub default: Option<Value>,
    pub validators: Vec<Validator>,
    pub callbacks: Vec<Callback>,
    /// Participates in `config view` and environment overrides.
    pub apply: bool,
}

impl fmt::Debug for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setting")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("validators", &self.validators.len())
            .field("callbacks", &self.callbacks.len())
            .field("apply", &self.apply)
            .finish()
    }
}

impl Setting {
    /// Start describing an apply setting with no default.
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            validators: Vec::new(),
            callbacks: Vec::new(),
            apply: true,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn callback(mut self, callback: Callback) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn not_applied(mut self) -> Self {
        self.apply = false;
        self
    }

    /// Run every validator and collect all failures.
    pub fn validate(&self, raw: &str) -> Result<(), Vec<String>> {
        let errors: Vec<String> = self
            .validators
            .iter()
            .filter_map(|validate| validate(&self.name, raw).err())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Settings that are env-observable without being apply settings.
const ENV_OBSERVABLE_EXTRAS: [&str; 3] = ["v", "log_dir", "alsologtostderr"];

/// Seconds any bounded operation may run: downloads, SSH round-trips,
/// driver and container runtime calls. Cluster bring-up is exempt.
pub const DEFAULT_TIMEOUT_SECS: i64 = 600;

/// Keys never listed by `config view`.
pub const HIDDEN_KEYS: [&str; 1] = ["addons"];

/// Preflight check ids with the default of their warn key.
pub const CHECK_KEYS: [(&str, bool); 12] = [
    ("vm-driver", false),
    ("kvm-driver", false),
    ("xhyve-driver", false),
    ("hyperv-driver", false),
    ("virtualbox-installed", false),
    ("iso-url", false),
    ("instance-ip", false),
    ("network-ping", true),
    ("network-http", true),
    ("storage-mount", false),
    ("storage-usage", false),
    ("cluster-up-flag", false),
];

/// The frozen set of settings.
#[derive(Debug)]
pub struct SettingRegistry {
    settings: Vec<Setting>,
    index: HashMap<String, usize>,
}

/// Collects registrations until [`RegistryBuilder::build`] freezes them.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    settings: Vec<Setting>,
    index: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn register(&mut self, setting: Setting) -> Result<&mut Self, RegistryError> {
        if self.index.contains_key(&setting.name) {
            return Err(RegistryError::DuplicateSetting(setting.name));
        }
        self.index.insert(setting.name.clone(), self.settings.len());
        self.settings.push(setting);
        Ok(self)
    }

    pub fn build(self) -> Arc<SettingRegistry> {
        Arc::new(SettingRegistry {
            settings: self.settings,
            index: self.index,
        })
    }
}

impl SettingRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The built-in catalogue.
    ///
    /// # Panics
    ///
    /// Panics if the catalogue registers a name twice. That is a programming
    /// error caught the first time the binary runs.
    pub fn builtin() -> Arc<SettingRegistry> {
        match builtin_catalogue() {
            Ok(registry) => registry,
            Err(e) => panic!("setting registry initialisation failed: {}", e),
        }
    }

    /// Look up a setting by name.
    pub fn find(&self, name: &str) -> Result<&Setting, ConfigError> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownSetting(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Setting> {
        self.index.get(name).map(|&i| &self.settings[i])
    }

    /// All settings in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    /// Position of a setting in registration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Whether `MINICLUSTER_<NAME>` may override this setting.
    pub fn is_env_observable(&self, name: &str) -> bool {
        ENV_OBSERVABLE_EXTRAS.contains(&name) || self.get(name).is_some_and(|s| s.apply)
    }
}

// =============================================================================
// Callbacks
// =============================================================================

/// Message for settings that only take effect when a VM is created.
pub fn requires_restart(cx: &SettingContext, name: &str, _raw: &str) -> Option<String> {
    if cx.instance_exists {
        Some(format!(
            "You currently have an existing minicluster instance. Changes to the '{name}' \
             setting are only applied when a new instance is created.\n\
             To let the configuration changes take effect, you must first delete the current \
             instance with 'minicluster delete' and then start a new one with 'minicluster start'."
        ))
    } else {
        Some(format!(
            "No minicluster instance exists. New '{name}' setting will be applied on next \
             'minicluster start'"
        ))
    }
}

// =============================================================================
// Built-in catalogue
// =============================================================================

fn text(s: &str) -> Value {
    Value::String(s.to_string())
}

fn list(items: &[&str]) -> Value {
    Value::List(items.iter().map(|s| s.to_string()).collect())
}

fn builtin_catalogue() -> Result<Arc<SettingRegistry>, RegistryError> {
    use validators::*;

    let mut b = SettingRegistry::builder();

    // VM creation
    b.register(
        Setting::new("vm-driver", Kind::String)
            .default_value(text(default_driver()))
            .validator(is_supported_driver)
            .callback(requires_restart),
    )?;
    b.register(
        Setting::new("iso-url", Kind::String)
            .default_value(text(ISO_ALIASES[0]))
            .validator(is_valid_iso_url)
            .callback(requires_restart),
    )?;
    b.register(
        Setting::new("cpus", Kind::Int)
            .default_value(Value::Int(2))
            .validator(is_positive)
            .callback(requires_restart),
    )?;
    b.register(
        Setting::new("memory", Kind::String)
            .default_value(text("2048"))
            .validator(is_valid_memory_size)
            .callback(requires_restart),
    )?;
    b.register(
        Setting::new("disk-size", Kind::String)
            .default_value(text("20g"))
            .validator(is_valid_disk_size)
            .callback(requires_restart),
    )?;
    b.register(
        Setting::new("host-only-cidr", Kind::String)
            .validator(is_valid_cidr)
            .callback(requires_restart),
    )?;
    b.register(Setting::new("docker-env", Kind::StringList).callback(requires_restart))?;
    b.register(Setting::new("docker-opt", Kind::StringList).callback(requires_restart))?;
    b.register(
        Setting::new("insecure-registry", Kind::StringList)
            .default_value(list(&["172.30.0.0/16"]))
            .callback(requires_restart),
    )?;
    b.register(Setting::new("registry-mirror", Kind::StringList).callback(requires_restart))?;

    // Cluster bring-up
    b.register(
        Setting::new("openshift-version", Kind::String)
            .default_value(text("v3.6.0"))
            .validator(is_valid_version),
    )?;
    b.register(Setting::new("openshift-env", Kind::StringList))?;
    b.register(Setting::new("public-hostname", Kind::String))?;
    b.register(Setting::new("routing-suffix", Kind::String))?;
    b.register(
        Setting::new("host-config-dir", Kind::String)
            .default_value(text("/var/lib/minicluster/openshift.local.config"))
            .validator(is_absolute_vm_path),
    )?;
    b.register(
        Setting::new("host-data-dir", Kind::String)
            .default_value(text("/var/lib/minicluster/hostdata"))
            .validator(is_absolute_vm_path),
    )?;
    b.register(
        Setting::new("host-volumes-dir", Kind::String)
            .default_value(text("/var/lib/minicluster/openshift.local.volumes"))
            .validator(is_absolute_vm_path),
    )?;
    b.register(Setting::new("http-proxy", Kind::String).validator(is_valid_proxy))?;
    b.register(Setting::new("https-proxy", Kind::String).validator(is_valid_proxy))?;
    b.register(Setting::new("no-proxy", Kind::String))?;
    b.register(Setting::new("metrics", Kind::Bool).default_value(Value::Bool(false)))?;
    b.register(Setting::new("logging", Kind::Bool).default_value(Value::Bool(false)))?;

    // Caching, addons, host folders
    b.register(Setting::new("image-caching", Kind::Bool).default_value(Value::Bool(true)))?;
    b.register(
        Setting::new("hostfolders-automount", Kind::Bool).default_value(Value::Bool(false)),
    )?;
    b.register(
        Setting::new("hostfolders-mountpath", Kind::String)
            .default_value(text("/mnt/sda1/hostfolders"))
            .validator(is_absolute_vm_path),
    )?;
    b.register(
        Setting::new("default-addons", Kind::StringList)
            .default_value(list(&["admin-user", "anyuid"])),
    )?;

    b.register(
        Setting::new("timeout", Kind::Int)
            .default_value(Value::Int(DEFAULT_TIMEOUT_SECS))
            .validator(is_positive),
    )?;

    // Preflight parameters and toggles
    b.register(
        Setting::new("check-network-ping-host", Kind::String)
            .default_value(text("8.8.8.8")),
    )?;
    b.register(
        Setting::new("check-network-http-host", Kind::String)
            .default_value(text("http://minicluster.io/index.html"))
            .validator(is_valid_url),
    )?;
    for (id, warn_default) in CHECK_KEYS {
        b.register(
            Setting::new(format!("skip-check-{}", id), Kind::Bool)
                .default_value(Value::Bool(false)),
        )?;
        b.register(
            Setting::new(format!("warn-check-{}", id), Kind::Bool)
                .default_value(Value::Bool(warn_default)),
        )?;
    }

    // Non-apply settings
    b.register(Setting::new("cache-images", Kind::StringList).not_applied())?;
    b.register(
        Setting::new("v", Kind::Int)
            .default_value(Value::Int(0))
            .not_applied(),
    )?;
    b.register(Setting::new("log_dir", Kind::String).not_applied())?;
    b.register(
        Setting::new("alsologtostderr", Kind::Bool)
            .default_value(Value::Bool(false))
            .not_applied(),
    )?;

    Ok(b.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_builds_without_duplicates() {
        let registry = SettingRegistry::builtin();
        assert!(registry.iter().count() > 30);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut b = SettingRegistry::builder();
        b.register(Setting::new("cpus", Kind::Int)).expect("first");
        let err = b.register(Setting::new("cpus", Kind::String)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateSetting("cpus".into()));
    }

    #[test]
    fn find_unknown_setting() {
        let registry = SettingRegistry::builtin();
        assert!(matches!(
            registry.find("nope"),
            Err(ConfigError::UnknownSetting(name)) if name == "nope"
        ));
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut b = SettingRegistry::builder();
        b.register(Setting::new("zeta", Kind::String)).expect("zeta");
        b.register(Setting::new("alpha", Kind::String)).expect("alpha");
        let registry = b.build();
        let names: Vec<_> = registry.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn env_observable_set() {
        let registry = SettingRegistry::builtin();
        assert!(registry.is_env_observable("memory"));
        assert!(registry.is_env_observable("v"));
        assert!(registry.is_env_observable("log_dir"));
        assert!(registry.is_env_observable("alsologtostderr"));
        assert!(!registry.is_env_observable("cache-images"));
        assert!(!registry.is_env_observable("addons"));
    }

    #[test]
    fn timeout_is_a_positive_applied_setting() {
        let registry = SettingRegistry::builtin();
        let timeout = registry.find("timeout").expect("registered");
        assert_eq!(timeout.default, Some(Value::Int(DEFAULT_TIMEOUT_SECS)));
        assert!(registry.is_env_observable("timeout"));
        assert!(timeout.validate("0").is_err());
        assert!(timeout.validate("30").is_ok());
    }

    #[test]
    fn network_checks_warn_by_default() {
        let registry = SettingRegistry::builtin();
        let warn = |id: &str| {
            registry
                .find(&format!("warn-check-{}", id))
                .expect("registered")
                .default
                .clone()
        };
        assert_eq!(warn("network-ping"), Some(Value::Bool(true)));
        assert_eq!(warn("network-http"), Some(Value::Bool(true)));
        assert_eq!(warn("iso-url"), Some(Value::Bool(false)));
    }

    #[test]
    fn validate_collects_every_failure() {
        fn too_short(_: &str, raw: &str) -> Result<(), String> {
            if raw.len() < 3 { Err("too short".into()) } else { Ok(()) }
        }
        fn not_numeric(_: &str, raw: &str) -> Result<(), String> {
            raw.parse::<i64>().map(|_| ()).map_err(|_| "not numeric".into())
        }
        let setting = Setting::new("x", Kind::String)
            .validator(too_short)
            .validator(not_numeric);
        assert_eq!(
            setting.validate("a").unwrap_err(),
            vec!["too short".to_string(), "not numeric".to_string()]
        );
        assert!(setting.validate("123").is_ok());
    }

    #[test]
    fn requires_restart_phrasing_depends_on_instance() {
        let existing = SettingContext {
            machine_name: "minicluster".into(),
            instance_exists: true,
        };
        let message = requires_restart(&existing, "memory", "4GB").expect("message");
        assert!(message.contains("existing minicluster instance"));
        assert!(message.contains("'memory'"));

        let fresh = SettingContext::default();
        let message = requires_restart(&fresh, "memory", "4GB").expect("message");
        assert!(message.starts_with("No minicluster instance exists"));
    }
}
