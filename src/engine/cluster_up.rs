//! engine::cluster_up
//!
//! Building and running `oc cluster up`.
//!
//! # Architecture
//!
//! The argument list is materialized from [`StartSettings`] and the VM's
//! address. The same list feeds the `cluster-up-flag` preflight check
//! (through [`requested_flags`]) before anything runs, so a cached `oc`
//! that predates a flag fails early instead of halfway through bring-up.
//!
//! Bring-up runs on the host against the VM's container runtime, with no
//! timeout. A progress indicator prints dots while it runs, and the
//! combined output is always written to the cluster-up log.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info};

use crate::core::config::persist::write_atomic;
use crate::core::process::{CommandRunner, Invocation};
use crate::ui::progress::Progress;

use super::settings::StartSettings;
use super::EngineError;

/// Where the `oc` binary is placed inside the VM.
pub const VM_OC_DIR: &str = "/var/lib/minicluster/bin";

/// Seconds between progress dots.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// The routing suffix used when none is configured.
pub fn default_routing_suffix(ip: Ipv4Addr) -> String {
    format!("{}.nip.io", ip)
}

/// Arguments following `oc cluster up`.
pub fn cluster_up_args(settings: &StartSettings, ip: Ipv4Addr) -> Vec<String> {
    let mut args: Vec<String> = vec!["--use-existing-config".into()];
    let mut pair = |flag: &str, value: &str| {
        args.push(format!("--{}", flag));
        args.push(value.to_string());
    };

    pair("host-config-dir", &settings.host_config_dir);
    pair("host-data-dir", &settings.host_data_dir);
    pair("host-volumes-dir", &settings.host_volumes_dir);
    if let Some(hostname) = &settings.public_hostname {
        pair("public-hostname", hostname);
    }
    let suffix = settings
        .routing_suffix
        .clone()
        .unwrap_or_else(|| default_routing_suffix(ip));
    pair("routing-suffix", &suffix);
    for (flag, value) in [
        ("http-proxy", &settings.http_proxy),
        ("https-proxy", &settings.https_proxy),
        ("no-proxy", &settings.no_proxy),
    ] {
        if let Some(value) = value {
            pair(flag, value);
        }
    }
    for env in &settings.openshift_env {
        pair("env", env);
    }

    if settings.metrics {
        args.push("--metrics".into());
    }
    if settings.logging {
        args.push("--logging".into());
    }
    args
}

/// Flag names in `args`, without the leading dashes, in order.
pub fn requested_flags(args: &[String]) -> Vec<String> {
    let mut flags: Vec<String> = Vec::new();
    for name in args.iter().filter_map(|a| a.strip_prefix("--")) {
        if !flags.iter().any(|f| f == name) {
            flags.push(name.to_string());
        }
    }
    flags
}

/// Shell command that creates the in-VM host directories.
pub fn mkdir_command(settings: &StartSettings) -> String {
    format!(
        "sudo mkdir -p {} {} {}",
        settings.host_config_dir, settings.host_data_dir, settings.host_volumes_dir
    )
}

/// Shell command that copies `oc` out of the cluster image into the VM.
pub fn copy_oc_command(version: &str) -> String {
    format!(
        "sudo mkdir -p {dir} && docker run --rm -v {dir}:/target --entrypoint /bin/cp openshift/origin:{version} /usr/bin/oc /target/oc",
        dir = VM_OC_DIR,
        version = version
    )
}

/// Run `oc cluster up` with `args` against the VM's runtime `docker_env`.
///
/// The combined output goes to `log_path` whatever the outcome.
///
/// # Errors
///
/// [`EngineError::ClusterBringUp`] for a non-zero exit.
pub fn run_cluster_up(
    runner: &dyn CommandRunner,
    oc_path: &Path,
    args: &[String],
    docker_env: &BTreeMap<String, String>,
    log_path: &Path,
    show_progress: bool,
    out: &mut dyn Write,
) -> Result<(), EngineError> {
    let invocation = Invocation::new(oc_path.display().to_string())
        .args(["cluster", "up"])
        .args(args.iter().cloned())
        .envs(docker_env)
        .unbounded();
    info!(command = %invocation.display(), "starting cluster");
    write!(out, "-- Starting OpenShift container ")?;
    out.flush()?;

    let progress = Progress::start(PROGRESS_INTERVAL, show_progress);
    let result = runner.output(&invocation);
    progress.finish();
    let output = result.map_err(|source| EngineError::Spawn {
        command: invocation.display(),
        source,
    })?;

    write_atomic(log_path, output.combined().as_bytes()).map_err(|source| EngineError::Io {
        path: log_path.to_path_buf(),
        source,
    })?;
    debug!(log = %log_path.display(), code = output.code, "cluster up finished");

    if !output.success() {
        writeln!(out, "FAIL")?;
        return Err(EngineError::ClusterBringUp {
            code: output.code,
            log: log_path.to_path_buf(),
        });
    }
    writeln!(out, "OK")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{FlagSet, MapEnv, Resolver, Scope, SettingRegistry, ValueStore};
    use crate::core::process::{ProcessOutput, ScriptedRunner};
    use tempfile::TempDir;

    fn settings(flags: &[(&str, &str)]) -> StartSettings {
        let temp = TempDir::new().expect("tempdir");
        let registry = SettingRegistry::builtin();
        let global = ValueStore::open(
            Scope::Global,
            &temp.path().join("config.json"),
            registry.clone(),
        )
        .expect("open");
        let flags = FlagSet::from_pairs(flags.iter().copied());
        let env = MapEnv::default();
        let resolver = Resolver::new(&registry, &flags, &env, None, &global);
        StartSettings::resolve("m", &resolver).expect("resolve")
    }

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 42, 7);

    #[test]
    fn default_args_use_nip_io_suffix() {
        let args = cluster_up_args(&settings(&[]), IP);
        assert_eq!(
            args,
            vec![
                "--use-existing-config",
                "--host-config-dir",
                "/var/lib/minicluster/openshift.local.config",
                "--host-data-dir",
                "/var/lib/minicluster/hostdata",
                "--host-volumes-dir",
                "/var/lib/minicluster/openshift.local.volumes",
                "--routing-suffix",
                "192.168.42.7.nip.io",
            ]
        );
    }

    #[test]
    fn optional_flags_appear_when_set() {
        let args = cluster_up_args(
            &settings(&[
                ("public-hostname", "cluster.example.com"),
                ("metrics", "true"),
                ("http-proxy", "http://proxy:3128"),
                ("openshift-env", "A=1,B=2"),
            ]),
            IP,
        );
        let joined = args.join(" ");
        assert!(joined.contains("--public-hostname cluster.example.com"));
        assert!(joined.contains("--http-proxy http://proxy:3128"));
        assert!(joined.contains("--env A=1 --env B=2"));
        assert!(joined.ends_with("--metrics"));
        assert!(!joined.contains("--logging"));
    }

    #[test]
    fn requested_flags_are_unique_names() {
        let args = cluster_up_args(&settings(&[("openshift-env", "A=1,B=2")]), IP);
        let flags = requested_flags(&args);
        assert_eq!(flags.iter().filter(|f| *f == "env").count(), 1);
        assert_eq!(flags[0], "use-existing-config");
    }

    #[test]
    fn failing_bring_up_keeps_its_log() {
        let temp = TempDir::new().expect("tempdir");
        let log = temp.path().join("logs/cluster-up.log");
        let runner = ScriptedRunner::new().on(
            "cluster up",
            ProcessOutput {
                code: 3,
                stdout: "Pulling image".into(),
                stderr: "port 8443 in use".into(),
            },
        );
        let mut out = Vec::new();
        let err = run_cluster_up(
            &runner,
            Path::new("/cache/oc"),
            &["--use-existing-config".to_string()],
            &BTreeMap::new(),
            &log,
            false,
            &mut out,
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::ClusterBringUp { code: 3, .. }));
        assert_eq!(err.exit_code(), 3);
        let captured = std::fs::read_to_string(&log).expect("log");
        assert!(captured.contains("port 8443 in use"));
        assert!(String::from_utf8(out).expect("utf8").ends_with("FAIL\n"));
    }

    #[test]
    fn bring_up_runs_with_docker_env() {
        let temp = TempDir::new().expect("tempdir");
        let runner = ScriptedRunner::new();
        let mut env = BTreeMap::new();
        env.insert("DOCKER_HOST".to_string(), "tcp://192.168.42.7:2376".to_string());
        let mut out = Vec::new();
        run_cluster_up(
            &runner,
            Path::new("/cache/oc"),
            &[],
            &env,
            &temp.path().join("up.log"),
            false,
            &mut out,
        )
        .expect("cluster up");
        let calls = runner.calls();
        assert_eq!(calls[0].display(), "/cache/oc cluster up");
        assert_eq!(
            calls[0].env.get("DOCKER_HOST").map(String::as_str),
            Some("tcp://192.168.42.7:2376")
        );
        assert!(calls[0].unbounded, "bring-up must not be killed by the timeout");
    }
}
