//! preflight
//!
//! Ordered, skippable, warn-or-fatal checks guarding the start pipeline.
//!
//! # Architecture
//!
//! A [`Check`] is a static record: an id, the [`Phase`] it belongs to, a
//! description, a failure message, and a plain function that inspects the
//! world through a [`CheckContext`]. Driver-specific checks name their
//! driver and are omitted for every other one. The catalogue lives in
//! [`checks`].
//!
//! Each check is controlled by two boolean settings derived from its id,
//! `skip-check-<id>` and `warn-check-<id>`. They are resolved once, before
//! any check runs, into [`Toggles`].
//!
//! The executor walks one phase in catalogue order and prints a line per
//! check:
//!
//! ```text
//! -- Checking if requested hypervisor is supported on this platform ... OK
//! -- Checking for IP address ... FAIL
//!    Error determining IP address: VM 'minicluster' has no IPv4 address
//! ```
//!
//! # Invariants
//!
//! - A skipped check is never run
//! - A failing check aborts the phase unless its warn key is set
//! - With every skip key set, a phase always succeeds and prints no `FAIL`
//!
//! # Example
//!
//! ```ignore
//! use minicluster::preflight::{self, Phase, Toggles};
//!
//! let toggles = Toggles::resolve(&resolver)?;
//! preflight::run_phase(preflight::checks::catalogue(), Phase::PreVm, &cx, &toggles,
//!     &mut std::io::stdout(), &mut std::io::stderr())?;
//! ```

pub mod checks;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::config::registry::CHECK_KEYS;
use crate::core::config::{ConfigError, Resolver};
use crate::core::process::CommandRunner;
use crate::driver::Driver;

/// Errors from running preflight checks.
#[derive(Debug, Error)]
pub enum PreflightError {
    /// A check failed and its warn key was not set.
    #[error("{message}")]
    Failed { id: String, message: String },

    #[error("failed to write check output: {0}")]
    Output(#[from] io::Error),
}

/// When a check runs relative to the VM lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before any VM work.
    PreVm,
    /// After the VM reports Running, before cluster bring-up.
    PostVm,
    /// After the `oc` binary is cached.
    PostOc,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::PreVm => "pre-vm",
            Phase::PostVm => "post-vm",
            Phase::PostOc => "post-oc",
        })
    }
}

/// What a check observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// Degraded but not fatal, regardless of the warn key.
    Warning(String),
    /// Failed; the detail is printed under the check's failure message.
    Failed(String),
}

impl Outcome {
    pub fn failed(detail: impl Into<String>) -> Self {
        Outcome::Failed(detail.into())
    }
}

/// Check function.
pub type CheckFn = fn(&CheckContext<'_>) -> Outcome;

/// A preflight check record.
#[derive(Clone, Copy)]
pub struct Check {
    pub id: &'static str,
    pub phase: Phase,
    /// Only runs when this VM driver is selected.
    pub vm_driver: Option<&'static str>,
    pub description: &'static str,
    pub fail_message: &'static str,
    pub run: CheckFn,
}

impl Check {
    /// Whether the check concerns the selected VM driver.
    pub fn applies_to(&self, vm_driver: &str) -> bool {
        self.vm_driver.map_or(true, |d| d == vm_driver)
    }

    pub fn skip_key(&self) -> String {
        format!("skip-check-{}", self.id)
    }

    pub fn warn_key(&self) -> String {
        format!("warn-check-{}", self.id)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .finish()
    }
}

/// The `oc` binary and the cluster-up flags about to be passed to it.
#[derive(Debug, Clone, Copy)]
pub struct OcTarget<'a> {
    pub path: &'a Path,
    pub flags: &'a [String],
}

/// Everything a check may look at.
#[derive(Clone, Copy)]
pub struct CheckContext<'a> {
    pub machine_name: &'a str,
    pub vm_driver: &'a str,
    pub iso_url: &'a str,
    pub ping_host: &'a str,
    pub http_url: &'a str,
    pub driver: &'a dyn Driver,
    pub runner: &'a dyn CommandRunner,
    pub oc: Option<OcTarget<'a>>,
    /// The caller's bound on any single check.
    pub timeout: Duration,
}

/// Resolved skip and warn keys.
#[derive(Debug, Clone, Default)]
pub struct Toggles {
    values: BTreeMap<String, bool>,
}

impl Toggles {
    /// Resolve every check's skip and warn key.
    pub fn resolve(resolver: &Resolver<'_>) -> Result<Self, ConfigError> {
        let mut values = BTreeMap::new();
        for (id, _) in CHECK_KEYS {
            for key in [format!("skip-check-{}", id), format!("warn-check-{}", id)] {
                let value = resolver.bool(&key)?;
                values.insert(key, value);
            }
        }
        Ok(Self { values })
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
        }
    }

    /// Every known skip key set.
    pub fn skip_all() -> Self {
        Self {
            values: CHECK_KEYS
                .iter()
                .map(|(id, _)| (format!("skip-check-{}", id), true))
                .collect(),
        }
    }

    pub fn set(&mut self, key: &str, value: bool) {
        self.values.insert(key.to_string(), value);
    }

    /// Unknown keys read as false.
    pub fn get(&self, key: &str) -> bool {
        self.values.get(key).copied().unwrap_or(false)
    }
}

/// What a phase did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseReport {
    pub passed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub warned: Vec<&'static str>,
}

fn failure_text(check: &Check, detail: &str) -> String {
    if detail.is_empty() {
        check.fail_message.to_string()
    } else {
        format!("{}: {}", check.fail_message, detail)
    }
}

/// Run the checks of `phase`, in catalogue order.
///
/// Status lines go to `out`; failure and warning detail to `err`.
///
/// # Errors
///
/// [`PreflightError::Failed`] for the first failing check whose warn key
/// is not set. Checks after it do not run.
pub fn run_phase(
    catalogue: &[Check],
    phase: Phase,
    cx: &CheckContext<'_>,
    toggles: &Toggles,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<PhaseReport, PreflightError> {
    let mut report = PhaseReport::default();

    for check in catalogue
        .iter()
        .filter(|c| c.phase == phase && c.applies_to(cx.vm_driver))
    {
        write!(out, "-- {} ... ", check.description)?;
        out.flush()?;

        if toggles.get(&check.skip_key()) {
            writeln!(out, "SKIP")?;
            report.skipped.push(check.id);
            continue;
        }

        match (check.run)(cx) {
            Outcome::Passed => {
                writeln!(out, "OK")?;
                report.passed.push(check.id);
            }
            Outcome::Warning(detail) => {
                writeln!(out, "WARN")?;
                writeln!(err, "   {}", detail)?;
                warn!(check = check.id, %detail, "preflight warning");
                report.warned.push(check.id);
            }
            Outcome::Failed(detail) => {
                let message = failure_text(check, &detail);
                if toggles.get(&check.warn_key()) {
                    writeln!(out, "WARN")?;
                    writeln!(err, "   {}", message)?;
                    warn!(check = check.id, %message, "preflight failure downgraded to warning");
                    report.warned.push(check.id);
                } else {
                    writeln!(out, "FAIL")?;
                    writeln!(err, "   {}", message)?;
                    return Err(PreflightError::Failed {
                        id: check.id.to_string(),
                        message,
                    });
                }
            }
        }
    }

    debug!(%phase, ?report, "preflight phase complete");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::ScriptedRunner;
    use crate::driver::mock::MockDriver;

    const CHECKS: [Check; 3] = [
        Check {
            id: "first",
            phase: Phase::PreVm,
            vm_driver: None,
            description: "First",
            fail_message: "first failed",
            run: |_| Outcome::Passed,
        },
        Check {
            id: "second",
            phase: Phase::PreVm,
            vm_driver: None,
            description: "Second",
            fail_message: "second failed",
            run: |_| Outcome::failed("boom"),
        },
        Check {
            id: "later",
            phase: Phase::PostVm,
            vm_driver: None,
            description: "Later",
            fail_message: "later failed",
            run: |_| Outcome::Warning("nearly full".into()),
        },
    ];

    fn run(phase: Phase, toggles: &Toggles) -> (Result<PhaseReport, PreflightError>, String, String) {
        let driver = MockDriver::new();
        let runner = ScriptedRunner::new();
        let cx = CheckContext {
            machine_name: "m",
            vm_driver: "kvm",
            iso_url: "b2d",
            ping_host: "8.8.8.8",
            http_url: "http://example.com",
            driver: &driver,
            runner: &runner,
            oc: None,
            timeout: Duration::from_secs(5),
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        let result = run_phase(&CHECKS, phase, &cx, toggles, &mut out, &mut err);
        (
            result,
            String::from_utf8(out).expect("utf8"),
            String::from_utf8(err).expect("utf8"),
        )
    }

    #[test]
    fn failure_aborts_with_message() {
        let (result, out, err) = run(Phase::PreVm, &Toggles::default());
        match result {
            Err(PreflightError::Failed { id, message }) => {
                assert_eq!(id, "second");
                assert_eq!(message, "second failed: boom");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(out, "-- First ... OK\n-- Second ... FAIL\n");
        assert_eq!(err, "   second failed: boom\n");
    }

    #[test]
    fn warn_key_downgrades_failure() {
        let toggles = Toggles::from_pairs([("warn-check-second", true)]);
        let (result, out, _) = run(Phase::PreVm, &toggles);
        let report = result.expect("continues");
        assert_eq!(report.warned, vec!["second"]);
        assert!(out.contains("-- Second ... WARN"));
    }

    #[test]
    fn skip_key_prevents_run() {
        let toggles = Toggles::from_pairs([("skip-check-second", true)]);
        let (result, out, err) = run(Phase::PreVm, &toggles);
        assert_eq!(result.expect("ok").skipped, vec!["second"]);
        assert!(out.contains("-- Second ... SKIP"));
        assert!(err.is_empty());
    }

    #[test]
    fn warning_outcome_never_fails() {
        let (result, out, err) = run(Phase::PostVm, &Toggles::default());
        assert_eq!(result.expect("ok").warned, vec!["later"]);
        assert_eq!(out, "-- Later ... WARN\n");
        assert_eq!(err, "   nearly full\n");
    }

    #[test]
    fn skip_all_covers_every_check_key() {
        let toggles = Toggles::skip_all();
        for (id, _) in CHECK_KEYS {
            assert!(toggles.get(&format!("skip-check-{}", id)));
            assert!(!toggles.get(&format!("warn-check-{}", id)));
        }
    }
}
