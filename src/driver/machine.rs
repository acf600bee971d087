//! driver::machine
//!
//! [`Driver`] over a `docker-machine`-compatible command line tool.
//!
//! Every call shells out through the [`CommandRunner`], scoping the tool to
//! `<home>/machines` with `--storage-path` so machines never leak into the
//! user's own docker-machine store.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use super::{parse_ipv4, Driver, DriverError, MachineConfig, SshOutput, VmStatus};
use crate::core::process::{CommandRunner, Invocation, ProcessOutput};

/// Default name of the machine tool on PATH.
pub const DEFAULT_MACHINE_BINARY: &str = "docker-machine";

/// Release ISO for each accepted alias.
pub fn resolve_iso_url(iso_url: &str) -> String {
    match iso_url {
        "b2d" => "https://github.com/minishift/minishift-b2d-iso/releases/download/v1.2.0/minishift-b2d.iso".to_string(),
        "centos" => "https://github.com/minishift/minishift-centos-iso/releases/download/v1.2.0/minishift-centos7.iso".to_string(),
        "minikube" => "https://storage.googleapis.com/minikube/iso/minikube-v0.23.0.iso".to_string(),
        other => other.to_string(),
    }
}

/// Whether an ISO is a RHEL-family image.
pub fn is_rhel_based_iso(iso_url: &str) -> bool {
    iso_url == "centos" || iso_url.contains("centos") || iso_url.contains("rhel")
}

/// Driver-specific creation flags. Unknown drivers get none.
fn driver_flags(config: &MachineConfig) -> Vec<String> {
    let d = config.vm_driver.as_str();
    let (memory, cpus, disk, iso) = match d {
        "virtualbox" => ("memory", "cpu-count", "disk-size", "boot2docker-url"),
        "kvm" => ("memory", "cpu-count", "disk-size", "boot2docker-url"),
        "xhyve" => ("memory-size", "cpu-count", "disk-size", "boot2docker-url"),
        "hyperv" => ("memory", "cpu-count", "disk-size", "boot2docker-url"),
        "vmwarefusion" => ("memory-size", "cpu-count", "disk-size", "boot2docker-url"),
        _ => return Vec::new(),
    };

    let mut flags = vec![
        format!("--{}-{}", d, memory),
        config.memory_mib.to_string(),
        format!("--{}-{}", d, cpus),
        config.cpus.to_string(),
        format!("--{}-{}", d, disk),
        config.disk_mb.to_string(),
        format!("--{}-{}", d, iso),
        resolve_iso_url(&config.iso_url),
    ];
    if d == "virtualbox" {
        if let Some(cidr) = &config.host_only_cidr {
            flags.push("--virtualbox-hostonly-cidr".to_string());
            flags.push(cidr.clone());
        }
    }
    flags
}

/// Parse `env --shell bash` output: `export KEY="VALUE"` lines.
pub fn parse_env_output(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("export "))
        .filter_map(|assignment| assignment.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().trim_matches('"').to_string()))
        .collect()
}

/// Map the tool's status word onto [`VmStatus`].
pub fn parse_status(output: &str) -> VmStatus {
    match output.trim() {
        "Running" => VmStatus::Running,
        "Stopped" | "Saved" | "Paused" | "Stopping" | "Starting" => VmStatus::Stopped,
        "Does Not Exist" | "" => VmStatus::DoesNotExist,
        _ => VmStatus::Error,
    }
}

fn missing_machine(output: &ProcessOutput) -> bool {
    let text = output.combined().to_ascii_lowercase();
    text.contains("does not exist") || text.contains("not found")
}

/// `docker-machine`-compatible driver.
pub struct MachineCli {
    binary: String,
    storage_path: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl MachineCli {
    pub fn new(binary: impl Into<String>, storage_path: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: binary.into(),
            storage_path,
            runner,
        }
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(self.binary.clone())
            .arg("--storage-path")
            .arg(self.storage_path.display().to_string())
            .args(args)
    }

    fn run(&self, operation: &'static str, name: &str, args: Vec<String>) -> Result<ProcessOutput, DriverError> {
        let invocation = self.invocation(args);
        self.runner
            .output(&invocation)
            .map_err(|e| DriverError::failed(operation, name, e))
    }

    fn run_checked(&self, operation: &'static str, name: &str, args: Vec<String>) -> Result<String, DriverError> {
        let output = self.run(operation, name, args)?;
        if output.success() {
            Ok(output.stdout)
        } else if missing_machine(&output) {
            Err(DriverError::NotFound(name.to_string()))
        } else {
            Err(DriverError::failed(operation, name, output.combined().trim()))
        }
    }
}

impl Driver for MachineCli {
    fn exists(&self, name: &str) -> Result<bool, DriverError> {
        let listing = self.run_checked("list", name, vec!["ls".into(), "-q".into()])?;
        Ok(listing.lines().any(|line| line.trim() == name))
    }

    fn create(&self, config: &MachineConfig) -> Result<(), DriverError> {
        let mut args = vec![
            "create".to_string(),
            "--driver".to_string(),
            config.vm_driver.clone(),
        ];
        args.extend(driver_flags(config));
        for (flag, values) in [
            ("--engine-env", &config.docker_env),
            ("--engine-opt", &config.docker_opt),
            ("--engine-insecure-registry", &config.insecure_registry),
            ("--engine-registry-mirror", &config.registry_mirror),
        ] {
            for value in values {
                args.push(flag.to_string());
                args.push(value.clone());
            }
        }
        args.push(config.name.clone());

        info!(machine = %config.name, driver = %config.vm_driver, "creating VM");
        self.run_checked("create", &config.name, args).map(|_| ())
    }

    fn start(&self, name: &str) -> Result<(), DriverError> {
        self.run_checked("start", name, vec!["start".into(), name.into()])
            .map(|_| ())
    }

    fn stop(&self, name: &str) -> Result<(), DriverError> {
        self.run_checked("stop", name, vec!["stop".into(), name.into()])
            .map(|_| ())
    }

    fn delete(&self, name: &str) -> Result<(), DriverError> {
        self.run_checked("delete", name, vec!["rm".into(), "-y".into(), name.into()])
            .map(|_| ())
    }

    fn status(&self, name: &str) -> Result<VmStatus, DriverError> {
        let output = self.run("status", name, vec!["status".into(), name.into()])?;
        if output.success() {
            Ok(parse_status(&output.stdout))
        } else if missing_machine(&output) {
            Ok(VmStatus::DoesNotExist)
        } else {
            debug!(machine = name, output = %output.combined(), "status failed");
            Ok(VmStatus::Error)
        }
    }

    fn ip(&self, name: &str) -> Result<Ipv4Addr, DriverError> {
        let raw = self.run_checked("ip", name, vec!["ip".into(), name.into()])?;
        parse_ipv4(name, &raw)
    }

    fn ssh(&self, name: &str, command: &str) -> Result<SshOutput, DriverError> {
        let output = self.run("ssh", name, vec!["ssh".into(), name.into(), command.into()])?;
        Ok(SshOutput {
            stdout: output.stdout,
            stderr: output.stderr,
            code: output.code,
        })
    }

    fn docker_env(&self, name: &str) -> Result<BTreeMap<String, String>, DriverError> {
        let output = self.run_checked(
            "env",
            name,
            vec!["env".into(), "--shell".into(), "bash".into(), name.into()],
        )?;
        Ok(parse_env_output(&output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    /// Runner returning one canned output and recording invocations.
    struct Canned {
        output: ProcessOutput,
        seen: Mutex<Vec<Invocation>>,
    }

    impl CommandRunner for Canned {
        fn output(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
            self.seen.lock().unwrap().push(invocation.clone());
            Ok(self.output.clone())
        }

        fn stream(
            &self,
            invocation: &Invocation,
            _input: Option<&mut dyn io::Read>,
            _sink: Option<&mut dyn io::Write>,
        ) -> io::Result<ProcessOutput> {
            self.output(invocation)
        }

        fn spawn_detached(&self, _invocation: &Invocation) -> io::Result<()> {
            Ok(())
        }
    }

    fn driver(code: i32, stdout: &str, stderr: &str) -> (MachineCli, Arc<Canned>) {
        let runner = Arc::new(Canned {
            output: ProcessOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            seen: Mutex::new(Vec::new()),
        });
        let cli = MachineCli::new("docker-machine", PathBuf::from("/h/machines"), runner.clone());
        (cli, runner)
    }

    fn config(driver: &str) -> MachineConfig {
        MachineConfig {
            name: "minicluster".into(),
            vm_driver: driver.into(),
            iso_url: "b2d".into(),
            cpus: 2,
            memory_mib: 2048,
            disk_mb: 20000,
            host_only_cidr: None,
            docker_env: vec!["A=1".into()],
            docker_opt: vec![],
            insecure_registry: vec!["172.30.0.0/16".into()],
            registry_mirror: vec![],
        }
    }

    #[test]
    fn parse_env_output_reads_exports() {
        let env = parse_env_output(
            "export DOCKER_TLS_VERIFY=\"1\"\nexport DOCKER_HOST=\"tcp://192.168.42.7:2376\"\n# comment\n",
        );
        assert_eq!(env.get("DOCKER_HOST").map(String::as_str), Some("tcp://192.168.42.7:2376"));
        assert_eq!(env.get("DOCKER_TLS_VERIFY").map(String::as_str), Some("1"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn parse_status_words() {
        assert_eq!(parse_status("Running\n"), VmStatus::Running);
        assert_eq!(parse_status("Saved"), VmStatus::Stopped);
        assert_eq!(parse_status("Timeout"), VmStatus::Error);
    }

    #[test]
    fn create_passes_driver_flags_and_engine_options() {
        let (cli, runner) = driver(0, "", "");
        cli.create(&config("kvm")).expect("create");

        let seen = runner.seen.lock().unwrap();
        let args = &seen[0].args;
        assert_eq!(&args[..2], ["--storage-path", "/h/machines"]);
        let line = args.join(" ");
        assert!(line.contains("create --driver kvm"));
        assert!(line.contains("--kvm-memory 2048"));
        assert!(line.contains("--kvm-cpu-count 2"));
        assert!(line.contains("--kvm-disk-size 20000"));
        assert!(line.contains("minishift-b2d.iso"));
        assert!(line.contains("--engine-env A=1"));
        assert!(line.contains("--engine-insecure-registry 172.30.0.0/16"));
        assert_eq!(args.last().map(String::as_str), Some("minicluster"));
    }

    #[test]
    fn status_of_missing_machine() {
        let (cli, _) = driver(1, "", "Host does not exist: \"minicluster\"");
        assert_eq!(cli.status("minicluster").expect("status"), VmStatus::DoesNotExist);
    }

    #[test]
    fn exists_scans_listing() {
        let (cli, _) = driver(0, "other\nminicluster\n", "");
        assert!(cli.exists("minicluster").expect("exists"));
        assert!(!cli.exists("absent").expect("exists"));
    }

    #[test]
    fn failed_start_is_operation_failed() {
        let (cli, _) = driver(1, "", "hypervisor unavailable");
        let err = cli.start("minicluster").unwrap_err();
        assert!(matches!(err, DriverError::OperationFailed { operation: "start", .. }));
    }

    #[test]
    fn iso_aliases_resolve_to_release_urls() {
        assert!(resolve_iso_url("centos").ends_with("minishift-centos7.iso"));
        assert_eq!(resolve_iso_url("file:///tmp/x.iso"), "file:///tmp/x.iso");
        assert!(is_rhel_based_iso("centos"));
        assert!(!is_rhel_based_iso("b2d"));
    }
}
