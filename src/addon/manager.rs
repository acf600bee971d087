//! addon::manager
//!
//! Installed addons joined with their persisted records.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::command::ExecutionContext;
use super::parser::{parse_addon_dir, AddonDefinition};
use super::{apply_order, AddonError, AddonRecord};

/// An installed addon and its enablement.
#[derive(Debug, Clone)]
pub struct InstalledAddon {
    pub definition: AddonDefinition,
    pub record: AddonRecord,
}

/// Every addon found under the addons directory.
#[derive(Debug, Clone, Default)]
pub struct AddonManager {
    base_dir: PathBuf,
    addons: BTreeMap<String, InstalledAddon>,
}

impl AddonManager {
    /// Scan `base_dir`. Directories that fail to parse are skipped with a
    /// warning; a missing `base_dir` means no addons.
    pub fn load(
        base_dir: &Path,
        records: &BTreeMap<String, AddonRecord>,
    ) -> Result<Self, AddonError> {
        let mut addons = BTreeMap::new();
        let entries = match fs::read_dir(base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    base_dir: base_dir.to_path_buf(),
                    addons,
                })
            }
            Err(e) => return Err(AddonError::Output(e)),
        };

        for path in entries.filter_map(Result::ok).map(|e| e.path()) {
            if !path.is_dir() {
                continue;
            }
            let definition = match parse_addon_dir(&path) {
                Ok(definition) => definition,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping addon");
                    continue;
                }
            };
            let record = records
                .get(&definition.name)
                .cloned()
                .unwrap_or_else(|| AddonRecord {
                    name: definition.name.clone(),
                    priority: 0,
                    enabled: false,
                });
            debug!(addon = %definition.name, enabled = record.enabled, "found addon");
            addons.insert(
                definition.name.clone(),
                InstalledAddon { definition, record },
            );
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            addons,
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.addons.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&InstalledAddon> {
        self.addons.get(name)
    }

    /// Every addon in application order.
    pub fn list(&self) -> Vec<&InstalledAddon> {
        let mut addons: Vec<_> = self.addons.values().collect();
        addons.sort_by(|a, b| apply_order(&a.record, &b.record));
        addons
    }

    /// Enable an installed addon at `priority`, returning its new record.
    pub fn enable(&mut self, name: &str, priority: i64) -> Result<AddonRecord, AddonError> {
        let addon = self
            .addons
            .get_mut(name)
            .ok_or_else(|| AddonError::NotInstalled {
                name: name.to_string(),
                dir: self.base_dir.clone(),
            })?;
        addon.record.enabled = true;
        addon.record.priority = priority;
        Ok(addon.record.clone())
    }

    /// Enable each of `defaults` that is installed and has no record yet.
    ///
    /// Returns the new records, to be merged into the persisted map.
    pub fn enable_defaults(
        &mut self,
        defaults: &[String],
        records: &BTreeMap<String, AddonRecord>,
    ) -> Vec<AddonRecord> {
        let mut enabled = Vec::new();
        for name in defaults {
            if records.contains_key(name) {
                continue;
            }
            if !self.is_installed(name) {
                debug!(addon = %name, "default addon not installed");
                continue;
            }
            if let Ok(record) = self.enable(name, 0) {
                enabled.push(record);
            }
        }
        enabled
    }

    /// Apply every enabled addon in order.
    ///
    /// `version` filters out addons whose `OpenShift-Version` constraint
    /// it does not meet. Returns the names applied.
    pub fn apply(
        &self,
        cx: &mut ExecutionContext<'_>,
        version: &str,
        out: &mut dyn Write,
    ) -> Result<Vec<String>, AddonError> {
        let mut applied = Vec::new();
        for addon in self.list().into_iter().filter(|a| a.record.enabled) {
            let definition = &addon.definition;
            if !definition.supports_version(version) {
                writeln!(
                    out,
                    "-- Skipping addon '{}': requires OpenShift {}",
                    definition.name, definition.openshift_version
                )?;
                continue;
            }
            apply_one(definition, cx, out)?;
            applied.push(definition.name.clone());
        }
        Ok(applied)
    }
}

/// Run one addon's commands, stopping at the first failure.
pub fn apply_one(
    definition: &AddonDefinition,
    cx: &mut ExecutionContext<'_>,
    out: &mut dyn Write,
) -> Result<(), AddonError> {
    let missing: Vec<String> = definition
        .required_vars
        .iter()
        .filter(|var| cx.get(var).is_none())
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AddonError::MissingVariables {
            addon: definition.name.clone(),
            missing,
        });
    }

    write!(out, "-- Applying addon '{}':", definition.name)?;
    info!(addon = %definition.name, "applying addon");
    cx.add("addon-name", &definition.name);
    let result = definition.commands.iter().try_for_each(|command| {
        command
            .execute(cx, out)
            .map_err(|message| AddonError::Execution {
                addon: definition.name.clone(),
                command: command.to_string(),
                message,
            })
    });
    cx.remove("addon-name");
    result?;
    writeln!(out, "\n")?;
    Ok(())
}
