//! addon::command
//!
//! Addon command kinds and how each one runs.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::core::process::{CommandRunner, Invocation};
use crate::driver::Driver;

/// Name of the cluster container inside the VM.
pub const ORIGIN_CONTAINER: &str = "origin";
const OPENSHIFT_EXEC: &str = "/usr/bin/openshift";

/// One line of an addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddonCommand {
    /// Runs the cached `oc` on the host.
    Oc(String),
    /// Runs `openshift` inside the cluster container.
    OpenShift(String),
    /// Runs `docker` in the VM.
    Docker(String),
    /// Runs a shell command in the VM.
    Ssh(String),
    /// Waits this many seconds.
    Sleep(u64),
    /// Prints a line.
    Echo(String),
}

impl AddonCommand {
    /// Parse one command line.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (kind, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim().to_string();
        match kind {
            "oc" => Ok(AddonCommand::Oc(rest)),
            "openshift" => Ok(AddonCommand::OpenShift(rest)),
            "docker" => Ok(AddonCommand::Docker(rest)),
            "ssh" => Ok(AddonCommand::Ssh(rest)),
            "echo" => Ok(AddonCommand::Echo(rest)),
            "sleep" => rest
                .parse()
                .map(AddonCommand::Sleep)
                .map_err(|_| format!("unable to extract sleep time from command: '{}'", line)),
            _ => Err(format!("unable to process command: '{}'", line)),
        }
    }

    /// Run this command, writing progress to `out`.
    ///
    /// The error is a message describing the failure.
    pub fn execute(&self, cx: &ExecutionContext<'_>, out: &mut dyn Write) -> Result<(), String> {
        if !matches!(self, AddonCommand::Echo(_)) {
            write!(out, ".").map_err(|e| e.to_string())?;
            out.flush().map_err(|e| e.to_string())?;
        }

        match self {
            AddonCommand::Oc(args) => {
                let args = split_args(&cx.interpolate(args))?;
                let invocation = Invocation::new(cx.oc_path.display().to_string())
                    .args(args)
                    .envs(&cx.oc_env());
                debug!(command = %invocation.display(), "addon oc");
                let output = cx.runner.output(&invocation).map_err(|e| e.to_string())?;
                if output.success() {
                    Ok(())
                } else {
                    Err(format!(
                        "exit code {}: {}",
                        output.code,
                        output.stderr.trim()
                    ))
                }
            }
            AddonCommand::OpenShift(args) => cx.ssh(&format!(
                "docker exec -t {} {} {}",
                ORIGIN_CONTAINER,
                OPENSHIFT_EXEC,
                cx.interpolate(args)
            )),
            AddonCommand::Docker(args) => cx.ssh(&format!("docker {}", cx.interpolate(args))),
            AddonCommand::Ssh(command) => cx.ssh(&cx.interpolate(command)),
            AddonCommand::Sleep(seconds) => {
                (cx.sleep)(Duration::from_secs(*seconds));
                Ok(())
            }
            AddonCommand::Echo(text) => {
                write!(out, "\n  {}", cx.interpolate(text)).map_err(|e| e.to_string())
            }
        }
    }
}

/// Split an `oc` argument string the way a POSIX shell would, without
/// expansion: single quotes are literal, double quotes allow `\"` and
/// `\\`, and a backslash outside quotes escapes whitespace, a quote or a
/// backslash. Any other backslash is kept, so Windows paths survive.
pub fn split_args(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => current.push(c),
                        None => return Err(format!("unterminated single quote in '{}'", line)),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') if matches!(chars.peek(), Some('"' | '\\')) => {
                            current.extend(chars.next());
                        }
                        Some(c) => current.push(c),
                        None => return Err(format!("unterminated double quote in '{}'", line)),
                    }
                }
            }
            '\\' if matches!(chars.peek(), Some(&next) if escapable(next)) => {
                in_word = true;
                current.extend(chars.next());
            }
            c if c.is_whitespace() => {
                if in_word {
                    args.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        args.push(current);
    }
    Ok(args)
}

fn escapable(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\'' | '"' | '\\')
}

impl fmt::Display for AddonCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddonCommand::Oc(rest) => write!(f, "oc {}", rest),
            AddonCommand::OpenShift(rest) => write!(f, "openshift {}", rest),
            AddonCommand::Docker(rest) => write!(f, "docker {}", rest),
            AddonCommand::Ssh(rest) => write!(f, "ssh {}", rest),
            AddonCommand::Sleep(seconds) => write!(f, "sleep {}", seconds),
            AddonCommand::Echo(rest) => write!(f, "echo {}", rest),
        }
    }
}

/// What addon commands run against, plus the interpolation variables.
pub struct ExecutionContext<'a> {
    pub driver: &'a dyn Driver,
    pub machine_name: &'a str,
    pub runner: &'a dyn CommandRunner,
    pub oc_path: PathBuf,
    pub kube_config_path: PathBuf,
    /// Used by `sleep`; tests swap it for a no-op.
    pub sleep: fn(Duration),
    vars: BTreeMap<String, String>,
}

impl<'a> ExecutionContext<'a> {
    /// A context with `oc-path` and `kube-config-path` already defined.
    pub fn new(
        driver: &'a dyn Driver,
        machine_name: &'a str,
        runner: &'a dyn CommandRunner,
        oc_path: &Path,
        kube_config_path: &Path,
    ) -> Self {
        let mut cx = Self {
            driver,
            machine_name,
            runner,
            oc_path: oc_path.to_path_buf(),
            kube_config_path: kube_config_path.to_path_buf(),
            sleep: std::thread::sleep,
            vars: BTreeMap::new(),
        };
        cx.add("oc-path", &oc_path.display().to_string());
        cx.add("kube-config-path", &kube_config_path.display().to_string());
        cx
    }

    pub fn add(&mut self, key: &str, value: &str) {
        self.vars.insert(key.to_string(), value.to_string());
    }

    pub fn remove(&mut self, key: &str) {
        self.vars.remove(key);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Replace every `#{key}` with its value. Unknown keys stay as written.
    pub fn interpolate(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("#{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find('}') {
                Some(end) => {
                    let key = &after[..end];
                    match self.vars.get(key) {
                        Some(value) => result.push_str(value),
                        None => result.push_str(&rest[start..start + 3 + end]),
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);
        result
    }

    fn oc_env(&self) -> BTreeMap<String, String> {
        [(
            "KUBECONFIG".to_string(),
            self.kube_config_path.display().to_string(),
        )]
        .into_iter()
        .collect()
    }

    fn ssh(&self, command: &str) -> Result<(), String> {
        debug!(command, "addon ssh");
        self.driver
            .ssh_checked(self.machine_name, command)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::{ProcessOutput, ScriptedRunner};
    use crate::driver::mock::MockDriver;
    use crate::driver::SshOutput;

    fn no_sleep(_: Duration) {}

    fn context<'a>(driver: &'a MockDriver, runner: &'a ScriptedRunner) -> ExecutionContext<'a> {
        let mut cx = ExecutionContext::new(
            driver,
            "m",
            runner,
            Path::new("/cache/oc"),
            Path::new("/home/.kube/config"),
        );
        cx.sleep = no_sleep;
        cx
    }

    #[test]
    fn parse_recognizes_kinds() {
        assert_eq!(
            AddonCommand::parse("oc new-project demo").expect("oc"),
            AddonCommand::Oc("new-project demo".into())
        );
        assert_eq!(AddonCommand::parse("sleep 10").expect("sleep"), AddonCommand::Sleep(10));
        assert!(AddonCommand::parse("sleep soon").is_err());
        assert!(AddonCommand::parse("ocean view").is_err());
        assert_eq!(
            AddonCommand::parse("docker  ps").expect("docker").to_string(),
            "docker ps"
        );
    }

    #[test]
    fn interpolation_replaces_known_keys_only() {
        let driver = MockDriver::new();
        let runner = ScriptedRunner::new();
        let mut cx = context(&driver, &runner);
        cx.add("routing-suffix", "10.0.0.42.nip.io");
        assert_eq!(
            cx.interpolate("mkdir /certs.d/registry.#{routing-suffix} #{unknown} #{"),
            "mkdir /certs.d/registry.10.0.0.42.nip.io #{unknown} #{"
        );
        assert_eq!(cx.interpolate("#{oc-path}"), "/cache/oc");
    }

    #[test]
    fn oc_runs_locally_with_kubeconfig() {
        let driver = MockDriver::new();
        let runner = ScriptedRunner::new();
        let mut cx = context(&driver, &runner);
        cx.add("project", "demo");
        let mut out = Vec::new();

        AddonCommand::Oc("new-project #{project}".into())
            .execute(&cx, &mut out)
            .expect("oc");
        let calls = runner.calls();
        assert_eq!(calls[0].display(), "/cache/oc new-project demo");
        assert_eq!(calls[0].env.get("KUBECONFIG").map(String::as_str), Some("/home/.kube/config"));
        assert_eq!(out, b".");
    }

    #[test]
    fn quoted_arguments_stay_together() {
        assert_eq!(
            split_args(r#"create secret generic s --from-literal="a b" --from-literal='c "d"'"#)
                .expect("split"),
            vec![
                "create",
                "secret",
                "generic",
                "s",
                "--from-literal=a b",
                r#"--from-literal=c "d""#,
            ]
        );
        assert_eq!(
            split_args(r#"  apply  -f  C:\addons\x.yaml "" a\ b "q\"x" "#).expect("split"),
            vec![r"apply", "-f", r"C:\addons\x.yaml", "", "a b", r#"q"x"#]
        );
        assert!(split_args("get 'pods").is_err());
        assert!(split_args(r#"get "pods"#).is_err());
    }

    #[test]
    fn oc_receives_quoted_values_as_one_argument() {
        let driver = MockDriver::new();
        let runner = ScriptedRunner::new();
        let mut cx = context(&driver, &runner);
        cx.add("user", "jane doe");
        let mut out = Vec::new();

        AddonCommand::Oc(r##"create secret generic s --from-literal=name="#{user}""##.into())
            .execute(&cx, &mut out)
            .expect("oc");
        let calls = runner.calls();
        assert_eq!(
            calls[0].args,
            vec!["create", "secret", "generic", "s", "--from-literal=name=jane doe"]
        );
    }

    #[test]
    fn non_zero_exit_is_an_error() {
        let driver = MockDriver::with_machine("m", crate::driver::VmStatus::Running).on_ssh(
                "docker exec -t origin",
                SshOutput {
                    stdout: String::new(),
                    stderr: "no such container".into(),
                    code: 1,
                },
            );
        let runner = ScriptedRunner::new().on(
            "oc get",
            ProcessOutput {
                code: 2,
                stdout: String::new(),
                stderr: "forbidden".into(),
            },
        );
        let cx = context(&driver, &runner);
        let mut out = Vec::new();

        let err = AddonCommand::Oc("get pods".into())
            .execute(&cx, &mut out)
            .unwrap_err();
        assert!(err.contains("forbidden"));

        let err = AddonCommand::OpenShift("admin policy".into())
            .execute(&cx, &mut out)
            .unwrap_err();
        assert!(err.contains("no such container"));
    }

    #[test]
    fn echo_prints_indented() {
        let driver = MockDriver::new();
        let runner = ScriptedRunner::new();
        let cx = context(&driver, &runner);
        let mut out = Vec::new();
        AddonCommand::Echo("Hello #{oc-path}".into())
            .execute(&cx, &mut out)
            .expect("echo");
        assert_eq!(String::from_utf8(out).expect("utf8"), "\n  Hello /cache/oc");
    }
}
