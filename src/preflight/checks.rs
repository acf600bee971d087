//! preflight::checks
//!
//! The built-in check catalogue.
//!
//! Host checks look at the workstation (`PATH`, libvirt, PowerShell); VM
//! checks run shell commands in the machine over SSH. Timeouts for the
//! network checks are enforced by the commands themselves (`ping -w`,
//! `curl -m`) so a dead network never hangs the pipeline. The SSH
//! round-trip around every VM check is bounded by the driver's runner.

use std::path::PathBuf;
use std::time::Duration;

use crate::core::config::validators::{check_iso_url, is_supported_driver};
use crate::core::process::Invocation;
use crate::oc::flags;

use super::{Check, CheckContext, Outcome, Phase};

/// Mount point of the persistent storage volume inside the VM.
pub const STORAGE_DISK: &str = "/mnt/sda1";

/// Seconds allowed for each network check.
pub const NETWORK_TIMEOUT_SECS: u32 = 5;

/// Used-space percentage at which the storage check warns.
pub const STORAGE_WARN_PERCENT: u32 = 80;

/// Used-space percentage at which the storage check fails.
pub const STORAGE_FAIL_PERCENT: u32 = 95;

const DRIVER_HELP: &str = "The VM driver plug-in is not set up correctly";
const PREREQUISITE_HELP: &str = "A required prerequisite is not installed";

static CATALOGUE: [Check; 12] = [
    Check {
        id: "vm-driver",
        phase: Phase::PreVm,
        vm_driver: None,
        description: "Checking if requested hypervisor is supported on this platform",
        fail_message: DRIVER_HELP,
        run: check_vm_driver,
    },
    Check {
        id: "xhyve-driver",
        phase: Phase::PreVm,
        vm_driver: Some("xhyve"),
        description: "Checking if xhyve driver is installed",
        fail_message: DRIVER_HELP,
        run: check_xhyve_driver,
    },
    Check {
        id: "kvm-driver",
        phase: Phase::PreVm,
        vm_driver: Some("kvm"),
        description: "Checking if KVM driver and libvirt are installed",
        fail_message: DRIVER_HELP,
        run: check_kvm_driver,
    },
    Check {
        id: "hyperv-driver",
        phase: Phase::PreVm,
        vm_driver: Some("hyperv"),
        description: "Checking if Hyper-V driver is installed and configured",
        fail_message: DRIVER_HELP,
        run: check_hyperv_driver,
    },
    Check {
        id: "virtualbox-installed",
        phase: Phase::PreVm,
        vm_driver: Some("virtualbox"),
        description: "Checking if VirtualBox is installed",
        fail_message: PREREQUISITE_HELP,
        run: check_virtualbox_installed,
    },
    Check {
        id: "iso-url",
        phase: Phase::PreVm,
        vm_driver: None,
        description: "Checking the ISO URL",
        fail_message: "Invalid ISO URL",
        run: check_iso,
    },
    Check {
        id: "instance-ip",
        phase: Phase::PostVm,
        vm_driver: None,
        description: "Checking for IP address",
        fail_message: "Error determining IP address",
        run: check_instance_ip,
    },
    Check {
        id: "network-ping",
        phase: Phase::PostVm,
        vm_driver: None,
        description: "Checking if external host is reachable from the VM",
        fail_message: "VM is unable to ping external host",
        run: check_network_ping,
    },
    Check {
        id: "network-http",
        phase: Phase::PostVm,
        vm_driver: None,
        description: "Checking HTTP connectivity from the VM",
        fail_message: "VM cannot connect to external URL with HTTP",
        run: check_network_http,
    },
    Check {
        id: "storage-mount",
        phase: Phase::PostVm,
        vm_driver: None,
        description: "Checking if persistent storage volume is mounted",
        fail_message: "Persistent volume storage is not mounted",
        run: check_storage_mount,
    },
    Check {
        id: "storage-usage",
        phase: Phase::PostVm,
        vm_driver: None,
        description: "Checking available disk space",
        fail_message: "Insufficient disk space on the persistent storage volume",
        run: check_storage_usage,
    },
    Check {
        id: "cluster-up-flag",
        phase: Phase::PostOc,
        vm_driver: None,
        description: "Checking if the oc binary supports the requested cluster up flags",
        fail_message: "The cached oc binary does not support a requested flag",
        run: check_cluster_up_flags,
    },
];

/// Every built-in check, in execution order.
pub fn catalogue() -> &'static [Check] {
    &CATALOGUE
}

// =============================================================================
// Host checks
// =============================================================================

/// Locate `binary` on `PATH`.
pub fn find_on_path(binary: &str) -> Result<PathBuf, String> {
    which::which(binary).map_err(|_| format!("'{}' not found on PATH", binary))
}

fn check_vm_driver(cx: &CheckContext<'_>) -> Outcome {
    match is_supported_driver("vm-driver", cx.vm_driver) {
        Ok(()) => Outcome::Passed,
        Err(message) => Outcome::failed(message),
    }
}

fn check_xhyve_driver(_cx: &CheckContext<'_>) -> Outcome {
    let path = match find_on_path("docker-machine-driver-xhyve") {
        Ok(path) => path,
        Err(detail) => return Outcome::failed(detail),
    };
    if has_setuid(&path) {
        Outcome::Passed
    } else {
        Outcome::failed(format!("{} does not have the setuid bit set", path.display()))
    }
}

#[cfg(unix)]
fn has_setuid(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o4000 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn has_setuid(_path: &std::path::Path) -> bool {
    true
}

/// State of libvirt's `default` network in `virsh net-list --all` output.
pub fn default_network_state(net_list: &str) -> Option<&str> {
    net_list.lines().find_map(|line| {
        let mut columns = line.split_whitespace();
        match (columns.next(), columns.next()) {
            (Some("default"), Some(state)) => Some(state),
            _ => None,
        }
    })
}

fn check_kvm_driver(cx: &CheckContext<'_>) -> Outcome {
    if let Err(detail) = find_on_path("docker-machine-driver-kvm") {
        return Outcome::failed(detail);
    }

    let mut env = std::collections::BTreeMap::new();
    env.insert("LC_ALL".to_string(), "C".to_string());
    let net_list = Invocation::new("virsh")
        .args(["--connect", "qemu:///system", "net-list", "--all"])
        .envs(&env);
    let output = match cx.runner.output(&net_list) {
        Ok(output) if output.success() => output,
        Ok(output) => return Outcome::failed(format!("virsh failed: {}", output.combined().trim())),
        Err(_) => return Outcome::failed("libvirt is not installed ('virsh' not found)"),
    };

    match default_network_state(&output.stdout) {
        None => Outcome::failed("libvirt 'default' network is not present"),
        Some("active") => Outcome::Passed,
        Some(state) => Outcome::Warning(format!(
            "libvirt 'default' network is {}; start it with 'virsh net-start default'",
            state
        )),
    }
}

fn check_hyperv_driver(cx: &CheckContext<'_>) -> Outcome {
    let query = Invocation::new("powershell.exe").args([
        "-NoProfile",
        "-NonInteractive",
        "-Command",
        "@(Get-Command Get-VM).ModuleName",
    ]);
    match cx.runner.output(&query) {
        Ok(output) if output.stdout.contains("Hyper-V") => {}
        _ => return Outcome::failed("Hyper-V PowerShell module is not available"),
    }
    if std::env::var("HYPERV_VIRTUAL_SWITCH").map_or(true, |s| s.is_empty()) {
        return Outcome::failed("HYPERV_VIRTUAL_SWITCH is not set");
    }
    Outcome::Passed
}

fn check_virtualbox_installed(_cx: &CheckContext<'_>) -> Outcome {
    match find_on_path("VBoxManage") {
        Ok(_) => Outcome::Passed,
        Err(detail) => Outcome::failed(detail),
    }
}

fn check_iso(cx: &CheckContext<'_>) -> Outcome {
    match check_iso_url(cx.iso_url, true) {
        Ok(()) => Outcome::Passed,
        Err(detail) => Outcome::failed(detail),
    }
}

// =============================================================================
// VM checks
// =============================================================================

fn check_instance_ip(cx: &CheckContext<'_>) -> Outcome {
    match cx.driver.ip(cx.machine_name) {
        Ok(_) => Outcome::Passed,
        Err(e) => Outcome::failed(e.to_string()),
    }
}

/// Run `command` in the VM; true if it exited zero.
fn vm_succeeds(cx: &CheckContext<'_>, command: &str) -> bool {
    cx.driver
        .ssh(cx.machine_name, command)
        .map(|output| output.code == 0)
        .unwrap_or(false)
}

/// Seconds a network check may wait: the fixed check timeout, lowered to
/// fit a shorter caller timeout.
pub fn network_check_timeout_secs(timeout: Duration) -> u64 {
    u64::from(NETWORK_TIMEOUT_SECS).min(timeout.as_secs().max(1))
}

fn check_network_ping(cx: &CheckContext<'_>) -> Outcome {
    let command = format!(
        "sudo ping -c1 -w{} {}",
        network_check_timeout_secs(cx.timeout),
        cx.ping_host
    );
    if vm_succeeds(cx, &command) {
        Outcome::Passed
    } else {
        Outcome::failed(format!("{} is not reachable", cx.ping_host))
    }
}

fn check_network_http(cx: &CheckContext<'_>) -> Outcome {
    let command = format!(
        "curl -s -m {} {} > /dev/null 2>&1",
        network_check_timeout_secs(cx.timeout),
        cx.http_url
    );
    if vm_succeeds(cx, &command) {
        Outcome::Passed
    } else {
        Outcome::failed(format!("{} could not be retrieved", cx.http_url))
    }
}

fn check_storage_mount(cx: &CheckContext<'_>) -> Outcome {
    let command = format!(
        "if grep -qs {} /proc/mounts; then echo '1'; else echo '0'; fi",
        STORAGE_DISK
    );
    match cx.driver.ssh(cx.machine_name, &command) {
        Ok(output) if output.stdout.trim() == "1" => Outcome::Passed,
        Ok(_) => Outcome::failed(format!("{} is not mounted", STORAGE_DISK)),
        Err(e) => Outcome::failed(e.to_string()),
    }
}

/// Used percentage from `df -h <mount> | awk 'FNR > 1 {print $2,$5}'`
/// output such as `19G 42%`.
pub fn parse_disk_usage(output: &str) -> Option<u32> {
    let used = output.split_whitespace().nth(1)?;
    let digits: String = used.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Classify a used-space percentage.
pub fn classify_usage(percent: u32) -> Outcome {
    if percent >= STORAGE_FAIL_PERCENT {
        Outcome::failed(format!("{}% used", percent))
    } else if percent >= STORAGE_WARN_PERCENT {
        Outcome::Warning(format!(
            "{}% of the persistent storage volume is used",
            percent
        ))
    } else {
        Outcome::Passed
    }
}

fn check_storage_usage(cx: &CheckContext<'_>) -> Outcome {
    let command = format!("df -h {} | awk 'FNR > 1 {{print $2,$5}}'", STORAGE_DISK);
    let output = match cx.driver.ssh_checked(cx.machine_name, &command) {
        Ok(output) => output,
        Err(e) => return Outcome::failed(e.to_string()),
    };
    match parse_disk_usage(&output) {
        Some(percent) => classify_usage(percent),
        None => Outcome::failed(format!("unexpected df output '{}'", output.trim())),
    }
}

// =============================================================================
// oc checks
// =============================================================================

fn check_cluster_up_flags(cx: &CheckContext<'_>) -> Outcome {
    let Some(target) = cx.oc else {
        return Outcome::Passed;
    };
    let Some(supported) = flags::supported_flags(cx.runner, target.path) else {
        return Outcome::failed(format!(
            "unable to read the flags supported by {}",
            target.path.display()
        ));
    };
    let missing = flags::unsupported(&supported, target.flags);
    if missing.is_empty() {
        Outcome::Passed
    } else {
        Outcome::failed(format!("--{}", missing.join(", --")))
    }
}
