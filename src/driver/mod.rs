//! driver
//!
//! The narrow interface the core consumes from the VM driver.
//!
//! # Design
//!
//! The start pipeline only ever talks to a VM through [`Driver`]. Concrete
//! hypervisor support lives behind it: [`machine::MachineCli`] drives a
//! `docker-machine`-compatible CLI, and [`mock::MockDriver`] is an
//! in-memory VM for deterministic tests.
//!
//! The trait is synchronous; every call is one round-trip to an external
//! tool and the pipeline is a single cooperative sequence of steps.
//!
//! # Example
//!
//! ```ignore
//! use minicluster::driver::{Driver, VmStatus};
//!
//! fn ensure_running(driver: &dyn Driver, name: &str) -> Result<(), DriverError> {
//!     match driver.status(name)? {
//!         VmStatus::Running => Ok(()),
//!         VmStatus::Stopped => driver.start(name),
//!         other => Err(DriverError::UnexpectedState { name: name.into(), status: other }),
//!     }
//! }
//! ```

pub mod machine;
pub mod mock;

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use thiserror::Error;

/// Errors from driver operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    /// A driver call failed.
    #[error("{operation} of VM '{name}' failed: {message}")]
    OperationFailed {
        operation: &'static str,
        name: String,
        message: String,
    },

    /// The machine does not exist.
    #[error("there is currently no '{0}' VM defined")]
    NotFound(String),

    /// The machine reported a state the caller cannot work with.
    #[error("VM '{name}' is in state {status}")]
    UnexpectedState { name: String, status: VmStatus },

    /// A command run over SSH exited non-zero.
    #[error("command '{command}' failed in VM with exit code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The driver returned an address that is not IPv4.
    #[error("VM '{name}' has no IPv4 address (got '{raw}')")]
    NoIpv4 { name: String, raw: String },
}

impl DriverError {
    pub(crate) fn failed(operation: &'static str, name: &str, message: impl ToString) -> Self {
        DriverError::OperationFailed {
            operation,
            name: name.to_string(),
            message: message.to_string(),
        }
    }
}

/// Observed VM state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Stopped,
    DoesNotExist,
    Error,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Running => "Running",
            VmStatus::Stopped => "Stopped",
            VmStatus::DoesNotExist => "Does Not Exist",
            VmStatus::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Everything needed to create a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineConfig {
    pub name: String,
    pub vm_driver: String,
    pub iso_url: String,
    pub cpus: u32,
    /// Memory in MiB.
    pub memory_mib: u64,
    /// Disk in MB.
    pub disk_mb: u64,
    pub host_only_cidr: Option<String>,
    pub docker_env: Vec<String>,
    pub docker_opt: Vec<String>,
    pub insecure_registry: Vec<String>,
    pub registry_mirror: Vec<String>,
}

/// Result of a command run over SSH.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl SshOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: 0,
        }
    }
}

/// The VM operations the core depends on.
pub trait Driver: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool, DriverError>;

    fn create(&self, config: &MachineConfig) -> Result<(), DriverError>;

    fn start(&self, name: &str) -> Result<(), DriverError>;

    fn stop(&self, name: &str) -> Result<(), DriverError>;

    fn delete(&self, name: &str) -> Result<(), DriverError>;

    fn status(&self, name: &str) -> Result<VmStatus, DriverError>;

    /// The machine's IPv4 address.
    fn ip(&self, name: &str) -> Result<Ipv4Addr, DriverError>;

    /// Run a shell command in the VM. A non-zero exit is not an error here.
    fn ssh(&self, name: &str, command: &str) -> Result<SshOutput, DriverError>;

    /// Environment pointing a container runtime client at the VM.
    fn docker_env(&self, name: &str) -> Result<BTreeMap<String, String>, DriverError>;

    /// Run a command in the VM and treat a non-zero exit as an error.
    fn ssh_checked(&self, name: &str, command: &str) -> Result<String, DriverError> {
        let output = self.ssh(name, command)?;
        if output.code != 0 {
            return Err(DriverError::CommandFailed {
                command: command.to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Parse a driver-reported address, insisting on IPv4.
pub fn parse_ipv4(name: &str, raw: &str) -> Result<Ipv4Addr, DriverError> {
    raw.trim().parse().map_err(|_| DriverError::NoIpv4 {
        name: name.to_string(),
        raw: raw.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipv4_rejects_ipv6() {
        assert_eq!(
            parse_ipv4("m", " 192.168.42.7\n").expect("ipv4"),
            Ipv4Addr::new(192, 168, 42, 7)
        );
        assert!(matches!(
            parse_ipv4("m", "fe80::1"),
            Err(DriverError::NoIpv4 { .. })
        ));
    }

    #[test]
    fn error_display_names_the_vm() {
        let err = DriverError::failed("create", "minicluster", "no space");
        assert_eq!(
            err.to_string(),
            "create of VM 'minicluster' failed: no space"
        );
    }
}
