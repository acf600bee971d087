//! engine::settings
//!
//! Everything `start` reads from configuration, resolved once up front.
//!
//! The resolver only borrows the Value Stores, so the pipeline takes a
//! snapshot here and writes state later through its own handles.

use crate::core::config::{ConfigError, Resolver};
use crate::core::value::{disk_mb, memory_mib};
use crate::driver::machine::resolve_iso_url;
use crate::driver::MachineConfig;
use crate::preflight::Toggles;

/// The resolved configuration of one `start`.
#[derive(Debug, Clone)]
pub struct StartSettings {
    pub machine: MachineConfig,
    pub openshift_version: String,
    pub openshift_env: Vec<String>,
    pub public_hostname: Option<String>,
    pub routing_suffix: Option<String>,
    pub host_config_dir: String,
    pub host_data_dir: String,
    pub host_volumes_dir: String,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
    pub metrics: bool,
    pub logging: bool,
    pub image_caching: bool,
    pub cache_images: Vec<String>,
    pub hostfolders_automount: bool,
    pub hostfolders_mountpath: String,
    pub default_addons: Vec<String>,
    pub ping_host: String,
    pub http_url: String,
    pub toggles: Toggles,
}

fn invalid(name: &str, error: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        name: name.to_string(),
        errors: vec![error.into()],
    }
}

fn required(resolver: &Resolver<'_>, name: &str) -> Result<String, ConfigError> {
    resolver
        .non_empty(name)?
        .ok_or_else(|| invalid(name, "a value is required"))
}

impl StartSettings {
    /// Resolve every setting `start` uses for `machine_name`.
    ///
    /// Explicit flags are validated first; sizes are converted for the
    /// driver (`memory` to MiB, `disk-size` to MB).
    pub fn resolve(machine_name: &str, resolver: &Resolver<'_>) -> Result<Self, ConfigError> {
        resolver.validate_flags()?;

        let memory = required(resolver, "memory")?;
        let memory_mib = memory_mib(&memory)
            .ok_or_else(|| invalid("memory", format!("'{}' is not a valid size", memory)))?;
        let disk = required(resolver, "disk-size")?;
        let disk_mb = disk_mb(&disk)
            .ok_or_else(|| invalid("disk-size", format!("'{}' is not a valid size", disk)))?;
        let cpus = resolver
            .int("cpus")?
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| invalid("cpus", "must be a positive integer"))?;

        let machine = MachineConfig {
            name: machine_name.to_string(),
            vm_driver: required(resolver, "vm-driver")?,
            iso_url: resolve_iso_url(&required(resolver, "iso-url")?),
            cpus,
            memory_mib,
            disk_mb,
            host_only_cidr: resolver.non_empty("host-only-cidr")?,
            docker_env: resolver.list("docker-env")?,
            docker_opt: resolver.list("docker-opt")?,
            insecure_registry: resolver.list("insecure-registry")?,
            registry_mirror: resolver.list("registry-mirror")?,
        };

        Ok(Self {
            machine,
            openshift_version: required(resolver, "openshift-version")?,
            openshift_env: resolver.list("openshift-env")?,
            public_hostname: resolver.non_empty("public-hostname")?,
            routing_suffix: resolver.non_empty("routing-suffix")?,
            host_config_dir: required(resolver, "host-config-dir")?,
            host_data_dir: required(resolver, "host-data-dir")?,
            host_volumes_dir: required(resolver, "host-volumes-dir")?,
            http_proxy: resolver.non_empty("http-proxy")?,
            https_proxy: resolver.non_empty("https-proxy")?,
            no_proxy: resolver.non_empty("no-proxy")?,
            metrics: resolver.bool("metrics")?,
            logging: resolver.bool("logging")?,
            image_caching: resolver.bool("image-caching")?,
            cache_images: resolver.list("cache-images")?,
            hostfolders_automount: resolver.bool("hostfolders-automount")?,
            hostfolders_mountpath: required(resolver, "hostfolders-mountpath")?,
            default_addons: resolver.list("default-addons")?,
            ping_host: required(resolver, "check-network-ping-host")?,
            http_url: required(resolver, "check-network-http-host")?,
            toggles: Toggles::resolve(resolver)?,
        })
    }
}
