//! addon::parser
//!
//! Reads an addon directory into an [`AddonDefinition`].
//!
//! ```text
//! # Name: anyuid
//! # Description: Changes the default security context constraints
//! # Required-Vars: PROJECT
//!
//! oc adm policy add-scc-to-group anyuid system:authenticated
//! ```
//!
//! The header is the leading run of `#` lines. After it, blank lines and
//! `#` comments are ignored and every other line is one command.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::command::AddonCommand;
use super::AddonError;

const ADDON_EXTENSION: &str = "addon";

fn header_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^# ?([^:]*):(.*)").expect("valid header regex"))
}

fn version_constraint_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(|>|>=|<|<=)[0-9]+(\.[0-9]+){0,2}(|\s*,\s*(|>|>=|<|<=)[0-9]+(\.[0-9]+){0,2})$")
            .expect("valid version constraint regex")
    })
}

/// A parsed addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonDefinition {
    pub name: String,
    pub description: String,
    pub required_vars: Vec<String>,
    /// Constraint such as `>=3.6.0, <3.9`; empty accepts any version.
    pub openshift_version: String,
    /// Every header entry, including the ones above.
    pub headers: BTreeMap<String, String>,
    pub commands: Vec<AddonCommand>,
    pub path: PathBuf,
}

impl AddonDefinition {
    /// Whether the addon supports cluster version `version` (`v3.6.0`).
    pub fn supports_version(&self, version: &str) -> bool {
        version_satisfies(&self.openshift_version, version)
    }
}

fn parse_error(name: &str, path: &Path, message: impl Into<String>) -> AddonError {
    AddonError::Parse {
        name: name.to_string(),
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Parse the single `*.addon` file in `dir`.
pub fn parse_addon_dir(dir: &Path) -> Result<AddonDefinition, AddonError> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !dir.is_dir() {
        return Err(parse_error(&dir_name, dir, "addon directory does not exist"));
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| parse_error(&dir_name, dir, format!("unable to read addon directory: {}", e)))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == ADDON_EXTENSION))
        .collect();
    files.sort();

    let file = match files.as_slice() {
        [] => {
            return Err(parse_error(
                &dir_name,
                dir,
                "there needs to be one addon file per addon directory, found none",
            ))
        }
        [file] => file,
        many => {
            let names: Vec<_> = many
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect();
            return Err(parse_error(
                &dir_name,
                dir,
                format!(
                    "there can only be one addon file per addon directory, found {}",
                    names.join(", ")
                ),
            ));
        }
    };

    let content = fs::read_to_string(file)
        .map_err(|e| parse_error(&dir_name, dir, format!("unable to read '{}': {}", file.display(), e)))?;
    parse_addon(&content, dir)
}

/// Parse addon file content. `path` is the addon directory.
pub fn parse_addon(content: &str, path: &Path) -> Result<AddonDefinition, AddonError> {
    let mut lines = content.lines().peekable();

    let mut headers = BTreeMap::new();
    while let Some(line) = lines.next_if(|line| line.starts_with('#')) {
        if let Some(captures) = header_pattern().captures(line) {
            headers.insert(captures[1].trim().to_string(), captures[2].trim().to_string());
        }
    }

    let dir_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let required = |key: &str| {
        headers
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| {
                parse_error(
                    &dir_name,
                    path,
                    format!("metadata does not contain a mandatory entry for '{}'", key),
                )
            })
    };
    let name = required("Name")?;
    let description = required("Description")?;

    let openshift_version = headers.get("OpenShift-Version").cloned().unwrap_or_default();
    if !openshift_version.is_empty() && !version_constraint_pattern().is_match(&openshift_version) {
        return Err(parse_error(
            &name,
            path,
            "addon only supports version constraints such as 3.6.0, >3.6.0 or >=3.5, <3.9.0",
        ));
    }

    let required_vars = headers
        .get("Required-Vars")
        .map(|vars| {
            vars.split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut commands = Vec::new();
    for line in lines.map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let command = AddonCommand::parse(line).map_err(|message| parse_error(&name, path, message))?;
        commands.push(command);
    }

    Ok(AddonDefinition {
        name,
        description,
        required_vars,
        openshift_version,
        headers,
        commands,
        path: path.to_path_buf(),
    })
}

fn version_parts(raw: &str) -> Vec<u64> {
    raw.trim()
        .trim_start_matches('v')
        .split('.')
        .map(|p| p.parse().unwrap_or(0))
        .collect()
}

fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let (mut a, mut b) = (version_parts(a), version_parts(b));
    let len = a.len().max(b.len());
    a.resize(len, 0);
    b.resize(len, 0);
    a.cmp(&b)
}

/// Check `version` against a comma-separated constraint list.
pub fn version_satisfies(constraint: &str, version: &str) -> bool {
    use std::cmp::Ordering::*;
    constraint
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .all(|c| {
            let (op, bound) = match c {
                _ if c.starts_with(">=") => (">=", &c[2..]),
                _ if c.starts_with("<=") => ("<=", &c[2..]),
                _ if c.starts_with('>') => (">", &c[1..]),
                _ if c.starts_with('<') => ("<", &c[1..]),
                _ => ("=", c),
            };
            let ordering = compare_versions(version, bound);
            match op {
                ">=" => ordering != Less,
                "<=" => ordering != Greater,
                ">" => ordering == Greater,
                "<" => ordering == Less,
                _ => ordering == Equal,
            }
        })
}
