//! oc::flags
//!
//! Which `oc cluster up` flags a given `oc` binary understands.
//!
//! The binary is asked for `oc cluster up -h`; the flag names are taken
//! from the `Options:` section, one per line, as the text between the
//! leading `--` and the `=` that introduces the default.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::process::{CommandRunner, Invocation};

fn options_section() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)Options(.*)OpenShift images").expect("valid regex"))
}

/// Flag names listed in `oc cluster up -h` output.
///
/// Returns `None` when the output has no recognisable options section.
pub fn parse_cluster_up_help(help: &str) -> Option<BTreeSet<String>> {
    let section = options_section().find(help)?;
    let flags = section
        .as_str()
        .lines()
        .skip(1)
        .filter_map(|line| {
            let before_default = line.trim().split('=').next()?;
            let (_, name) = before_default.split_once("--")?;
            Some(name.trim().to_string())
        })
        .filter(|name| !name.is_empty())
        .collect();
    Some(flags)
}

/// Ask the binary at `oc_path` for its supported flags.
pub fn supported_flags(runner: &dyn CommandRunner, oc_path: &Path) -> Option<BTreeSet<String>> {
    let invocation = Invocation::new(oc_path.display().to_string()).args(["cluster", "up", "-h"]);
    let output = runner.output(&invocation).ok()?;
    parse_cluster_up_help(&output.stdout)
}

/// Requested flags missing from `supported`, in request order.
pub fn unsupported<'a>(supported: &BTreeSet<String>, requested: &'a [String]) -> Vec<&'a str> {
    requested
        .iter()
        .map(String::as_str)
        .filter(|flag| !supported.contains(*flag))
        .collect()
}
