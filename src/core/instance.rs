//! core::instance
//!
//! Instance State: what the start pipeline has learned about one machine.
//!
//! # Storage
//!
//! Instance State lives in the per-instance file
//! `<home>/machines/<machine>.json`, next to any per-instance settings. It
//! owns these keys of that document and leaves every other key untouched:
//!
//! | Key | Type |
//! |-----|------|
//! | `OcPath` | string |
//! | `VMDriver` | string |
//! | `IsRegister` | bool |
//! | `IsRHELBased` | bool |
//! | `CacheImages` | [string] |
//! | `HostFolders` | [string] |
//! | `LastKnownIP` | string |
//!
//! # Invariants
//!
//! - `save` is a locked read-modify-write, serialized against Value Store
//!   writes to the same file
//! - `delete` removes the file and its lock file

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::persist::{self, Document};
use crate::core::config::ConfigError;
use crate::core::ops::{lock_path_for, FileLock};

/// Typed projection of the per-instance file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstanceState {
    #[serde(skip)]
    pub machine_name: String,
    pub oc_path: String,
    #[serde(rename = "VMDriver")]
    pub vm_driver: String,
    pub is_register: bool,
    #[serde(rename = "IsRHELBased")]
    pub is_rhel_based: bool,
    pub cache_images: Vec<String>,
    pub host_folders: Vec<String>,
    #[serde(rename = "LastKnownIP")]
    pub last_known_ip: String,
}

const OWNED_KEYS: [&str; 7] = [
    "OcPath",
    "VMDriver",
    "IsRegister",
    "IsRHELBased",
    "CacheImages",
    "HostFolders",
    "LastKnownIP",
];

/// Handle on a machine's per-instance file.
#[derive(Debug, Clone)]
pub struct InstanceFile {
    machine_name: String,
    path: PathBuf,
}

impl InstanceFile {
    pub fn new(machine_name: &str, path: &Path) -> Self {
        Self {
            machine_name: machine_name.to_string(),
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the state; a missing file yields a default state.
    pub fn load(&self) -> Result<InstanceState, ConfigError> {
        let document = persist::read(&self.path)?;
        let owned: serde_json::Map<String, serde_json::Value> = document
            .into_iter()
            .filter(|(key, _)| OWNED_KEYS.contains(&key.as_str()))
            .collect();
        let mut state: InstanceState = serde_json::from_value(serde_json::Value::Object(owned))
            .map_err(|e| ConfigError::ParseError {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        state.machine_name = self.machine_name.clone();
        Ok(state)
    }

    /// Persist the state, preserving keys it does not own.
    pub fn save(&self, state: &InstanceState) -> Result<(), ConfigError> {
        let _lock = FileLock::acquire(&lock_path_for(&self.path))?;
        let mut document: Document = persist::read(&self.path)?;
        let encoded = serde_json::to_value(state).map_err(|e| ConfigError::ParseError {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if let serde_json::Value::Object(fields) = encoded {
            document.extend(fields);
        }
        persist::write(&self.path, &document)
    }

    /// Load, apply `change`, save. Returns the updated state.
    pub fn update(
        &self,
        change: impl FnOnce(&mut InstanceState),
    ) -> Result<InstanceState, ConfigError> {
        let mut state = self.load()?;
        change(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    /// Remove the per-instance file and its lock.
    pub fn delete(&self) -> Result<(), ConfigError> {
        for path in [self.path.clone(), lock_path_for(&self.path)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ConfigError::WriteError { path, source: e }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn file(temp: &TempDir) -> InstanceFile {
        InstanceFile::new("minicluster", &temp.path().join("machines/minicluster.json"))
    }

    #[test]
    fn missing_file_loads_default() {
        let temp = TempDir::new().expect("create temp dir");
        let state = file(&temp).load().expect("load");
        assert_eq!(state.machine_name, "minicluster");
        assert!(state.oc_path.is_empty());
        assert!(!state.is_register);
    }

    #[test]
    fn save_uses_documented_keys() {
        let temp = TempDir::new().expect("create temp dir");
        let f = file(&temp);
        let state = InstanceState {
            machine_name: "minicluster".into(),
            oc_path: "/c/oc/v3.6.0/oc".into(),
            vm_driver: "kvm".into(),
            is_register: true,
            is_rhel_based: false,
            cache_images: vec!["alpine:latest".into()],
            host_folders: vec![],
            last_known_ip: "192.168.42.10".into(),
        };
        f.save(&state).expect("save");

        let doc = persist::read(f.path()).expect("read");
        assert_eq!(doc.get("OcPath"), Some(&json!("/c/oc/v3.6.0/oc")));
        assert_eq!(doc.get("VMDriver"), Some(&json!("kvm")));
        assert_eq!(doc.get("IsRegister"), Some(&json!(true)));
        assert_eq!(doc.get("IsRHELBased"), Some(&json!(false)));
        assert_eq!(doc.get("CacheImages"), Some(&json!(["alpine:latest"])));
        assert_eq!(f.load().expect("load"), state);
    }

    #[test]
    fn save_preserves_per_instance_settings() {
        let temp = TempDir::new().expect("create temp dir");
        let f = file(&temp);
        let mut doc = Document::new();
        doc.insert("memory".into(), json!("8GB"));
        persist::write(f.path(), &doc).expect("seed");

        f.update(|s| s.vm_driver = "virtualbox".into()).expect("update");

        let doc = persist::read(f.path()).expect("read");
        assert_eq!(doc.get("memory"), Some(&json!("8GB")));
        assert_eq!(doc.get("VMDriver"), Some(&json!("virtualbox")));
    }

    #[test]
    fn delete_removes_file_and_tolerates_absence() {
        let temp = TempDir::new().expect("create temp dir");
        let f = file(&temp);
        f.save(&InstanceState::default()).expect("save");
        assert!(f.exists());

        f.delete().expect("delete");
        assert!(!f.exists());
        f.delete().expect("delete again");
    }
}
