//! core::config::validators
//!
//! Validators attached to settings in the registry.
//!
//! Every validator has the shape `(name, raw) -> Result<(), message>` and
//! sees the raw text before coercion. The Value Store runs all of a
//! setting's validators and reports every failure, not just the first.

use std::net::Ipv4Addr;
use std::path::Path;

use crate::core::value::{human_size_bytes, memory_mib};

/// Accepted ISO aliases: the two supported distributions, then the legacy one.
pub const ISO_ALIASES: [&str; 3] = ["b2d", "centos", "minikube"];

/// VM drivers supported on this platform.
pub fn supported_drivers() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &["xhyve", "virtualbox", "vmwarefusion"]
    } else if cfg!(target_os = "windows") {
        &["hyperv", "virtualbox"]
    } else {
        &["kvm", "virtualbox", "generic"]
    }
}

/// The default VM driver for this platform.
pub fn default_driver() -> &'static str {
    supported_drivers()[0]
}

pub fn is_supported_driver(_name: &str, driver: &str) -> Result<(), String> {
    if supported_drivers().contains(&driver) {
        Ok(())
    } else {
        Err(format!("Driver '{}' is not supported", driver))
    }
}

pub fn is_positive(name: &str, raw: &str) -> Result<(), String> {
    match raw.trim().parse::<i64>() {
        Ok(n) if n > 0 => Ok(()),
        Ok(_) => Err(format!("{} must be > 0", name)),
        Err(e) => Err(format!("{}: {}", name, e)),
    }
}

/// Disk sizes: decimal units, strictly positive.
pub fn is_valid_disk_size(_name: &str, raw: &str) -> Result<(), String> {
    match human_size_bytes(raw) {
        Some(bytes) if bytes > 0 => Ok(()),
        _ => Err(format!("Disk size is not valid: '{}'", raw)),
    }
}

/// Memory sizes: a bare MiB count or a binary human size, strictly positive.
pub fn is_valid_memory_size(_name: &str, raw: &str) -> Result<(), String> {
    match memory_mib(raw) {
        Some(mib) if mib > 0 => Ok(()),
        _ => Err(format!("Memory size is not valid: '{}'", raw)),
    }
}

pub fn is_valid_cidr(_name: &str, raw: &str) -> Result<(), String> {
    let invalid = || format!("Error parsing CIDR: invalid CIDR address: {}", raw);
    let (addr, prefix) = raw.split_once('/').ok_or_else(invalid)?;
    addr.parse::<Ipv4Addr>().map_err(|_| invalid())?;
    match prefix.parse::<u8>() {
        Ok(p) if p <= 32 => Ok(()),
        _ => Err(invalid()),
    }
}

pub fn is_valid_ipv4(name: &str, raw: &str) -> Result<(), String> {
    raw.trim()
        .parse::<Ipv4Addr>()
        .map(|_| ())
        .map_err(|_| format!("{} IPv4 address is not valid: '{}'", name, raw))
}

pub fn is_valid_proxy(name: &str, raw: &str) -> Result<(), String> {
    let rest = raw
        .strip_prefix("http://")
        .or_else(|| raw.strip_prefix("https://"))
        .ok_or_else(|| format!("'{}' proxy URL must use the http or https scheme", name))?;
    let host = rest.rsplit('@').next().unwrap_or(rest);
    if host.is_empty() || host.starts_with(':') || host.starts_with('/') {
        return Err(format!("'{}' proxy URL has no host: '{}'", name, raw));
    }
    Ok(())
}

pub fn is_valid_url(name: &str, raw: &str) -> Result<(), String> {
    let rest = raw
        .strip_prefix("http://")
        .or_else(|| raw.strip_prefix("https://"))
        .ok_or_else(|| format!("{} is not an http(s) URL: '{}'", name, raw))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(format!("{} has no host: '{}'", name, raw));
    }
    Ok(())
}

/// In-VM paths are always forward-slash absolute.
pub fn is_absolute_vm_path(name: &str, raw: &str) -> Result<(), String> {
    if raw.starts_with('/') {
        Ok(())
    } else {
        Err(format!("{} must be an absolute path: '{}'", name, raw))
    }
}

/// Cluster versions look like `v3.6.0`.
pub fn is_valid_version(_name: &str, raw: &str) -> Result<(), String> {
    let digits = raw
        .strip_prefix('v')
        .ok_or_else(|| format!("Version '{}' must start with 'v'", raw))?;
    let valid = !digits.is_empty()
        && digits
            .split('.')
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    if valid {
        Ok(())
    } else {
        Err(format!("Version '{}' is not a valid release", raw))
    }
}

/// Validate an ISO location.
///
/// Accepts an alias, an `http(s)://…iso` URL, or a `file:///…iso` URL.
/// When `require_existing` is set, a `file://` URL must point at an
/// existing path.
pub fn check_iso_url(raw: &str, require_existing: bool) -> Result<(), String> {
    if ISO_ALIASES.contains(&raw) {
        return Ok(());
    }
    if !raw.ends_with(".iso") {
        return Err(format!("'{}' url is not valid", raw));
    }
    if let Some(rest) = raw
        .strip_prefix("http://")
        .or_else(|| raw.strip_prefix("https://"))
    {
        if rest.is_empty() || rest.starts_with('/') || rest.contains(' ') {
            return Err(format!("'{}' url is not valid", raw));
        }
        return Ok(());
    }

    let path = raw
        .strip_prefix("file://")
        .ok_or_else(|| format!("'{}' url is not valid", raw))?;
    if path.contains('\\') {
        return Err(format!("'{}' url must use forward slashes", raw));
    }
    let local = if cfg!(target_os = "windows") {
        let valid_drive = path.len() > 3
            && path.as_bytes()[0].is_ascii_alphabetic()
            && path.as_bytes().get(1..3) == Some(b":/".as_slice());
        if !valid_drive {
            return Err(format!("'{}' url is not valid", raw));
        }
        path.to_string()
    } else {
        if !path.starts_with('/') || path.len() < 2 {
            return Err(format!("'{}' url is not valid", raw));
        }
        path.to_string()
    };
    if require_existing && !Path::new(&local).exists() {
        return Err(format!("'{}' does not exist", local));
    }
    Ok(())
}

pub fn is_valid_iso_url(_name: &str, raw: &str) -> Result<(), String> {
    check_iso_url(raw, false)
}
