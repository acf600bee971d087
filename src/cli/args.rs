//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--debug`: Enable debug logging
//! - `--quiet` / `-q`: Minimal output
//! - `--v <level>`: Log level for diagnostics
//! - `--log_dir <dir>`: Write diagnostics to a file in `dir`
//! - `--alsologtostderr`: Keep stderr diagnostics when `--log_dir` is set
//! - `--timeout <seconds>`: Bound on every VM, SSH, runtime and download call
//!
//! # Start Flags
//!
//! Every `start` flag that names a setting is handed to the resolver as an
//! explicit flag, so it wins over the environment and both config files.
//! Flags that were not given are not passed at all.

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::config::FlagSet;

/// minicluster - Run a single-node OpenShift cluster in a local VM
#[derive(Parser, Debug)]
#[command(name = "minicluster")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Minimal output; implies no prompts
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log level for diagnostics (0 warn, 1 info, 2 debug, 3 trace)
    #[arg(long = "v", global = true, value_name = "LEVEL")]
    pub verbosity: Option<u8>,

    /// Write diagnostics to <dir>/minicluster.log instead of stderr
    #[arg(long = "log_dir", global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Also write diagnostics to stderr when --log_dir is set
    #[arg(long, global = true)]
    pub alsologtostderr: bool,

    /// Seconds any single VM, SSH, image or download call may take
    #[arg(long, global = true, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }

    /// Prompts are shown only with a terminal on stdin and without `--quiet`.
    pub fn interactive(&self) -> bool {
        !self.quiet && std::io::stdin().is_terminal()
    }

    /// The `tracing` filter directive implied by `--debug` and `--v`.
    pub fn log_directive(&self) -> &'static str {
        if self.debug {
            return "debug";
        }
        match self.verbosity.unwrap_or(0) {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the local cluster, creating the VM if needed
    #[command(
        long_about = "Start a local single-node OpenShift cluster.\n\n\
            Creates the VM on first use, checks the host and the VM, caches the oc \
            binary, brings the cluster up and applies the default addons. Starting \
            an existing stopped VM restarts it without re-applying addons.",
        after_help = "\
EXAMPLES:
    # Start with the defaults
    minicluster start

    # Bigger VM, specific OpenShift release
    minicluster start --memory 4GB --cpus 4 --openshift-version v3.6.0

    # Pass a variable to addons
    minicluster start --addon-env GITHUB_TOKEN=abc123"
    )]
    Start(StartArgs),

    /// Stop the running VM
    Stop,

    /// Delete the VM and its per-instance state
    Delete {
        /// Delete without asking, even for a registered instance
        #[arg(long, short)]
        force: bool,
    },

    /// Read and write persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage the local container image cache
    Image {
        #[command(subcommand)]
        action: ImageAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigAction {
    /// Print the persisted value of a setting
    Get {
        /// Setting name
        name: String,
    },
    /// Validate and persist a setting
    Set {
        /// Setting name
        name: String,
        /// Value to store
        value: String,
    },
    /// Remove a persisted setting
    Unset {
        /// Setting name
        name: String,
    },
    /// Print every persisted setting
    View {
        /// Template with {{.ConfigKey}} and {{.ConfigValue}} placeholders
        #[arg(long)]
        format: Option<String>,
    },
}

/// Image subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ImageAction {
    /// Load cached images into the VM
    Import {
        /// Images to import; defaults to the configured cache-images
        names: Vec<String>,
        /// Import every cached image
        #[arg(long)]
        all: bool,
    },
    /// Save images from the VM into the cache
    Export {
        /// Images to export; defaults to the configured cache-images
        names: Vec<String>,
        /// Export every image present in the VM
        #[arg(long)]
        all: bool,
        /// Write diagnostics to a timestamped file under the logs directory
        #[arg(long)]
        log_to_file: bool,
    },
    /// List cached images
    List,
    /// Remove images from the cache and from cache-images
    Delete {
        /// Images to remove
        #[arg(required = true)]
        names: Vec<String>,
    },
}

/// Flags accepted by `start`.
#[derive(Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// VM driver (kvm, xhyve, hyperv, virtualbox, vmwarefusion)
    #[arg(long)]
    pub vm_driver: Option<String>,

    /// Boot ISO: an alias (b2d, centos, rhel) or an http(s)/file URL ending in .iso
    #[arg(long)]
    pub iso_url: Option<String>,

    /// Number of CPUs for the VM
    #[arg(long)]
    pub cpus: Option<u32>,

    /// Memory for the VM (2048, 4GB)
    #[arg(long)]
    pub memory: Option<String>,

    /// Disk size for the VM (20g)
    #[arg(long)]
    pub disk_size: Option<String>,

    /// Host-only network CIDR (virtualbox)
    #[arg(long)]
    pub host_only_cidr: Option<String>,

    /// Environment for the VM's docker daemon (repeatable)
    #[arg(long)]
    pub docker_env: Vec<String>,

    /// Options for the VM's docker daemon (repeatable)
    #[arg(long)]
    pub docker_opt: Vec<String>,

    /// Insecure registries (repeatable)
    #[arg(long)]
    pub insecure_registry: Vec<String>,

    /// Registry mirrors (repeatable)
    #[arg(long)]
    pub registry_mirror: Vec<String>,

    /// OpenShift release, starting with v
    #[arg(long)]
    pub openshift_version: Option<String>,

    /// Environment passed to the cluster (repeatable, key=value)
    #[arg(short = 'e', long)]
    pub openshift_env: Vec<String>,

    /// Public hostname of the cluster
    #[arg(long)]
    pub public_hostname: Option<String>,

    /// Default routing suffix; <ip>.nip.io when unset
    #[arg(long)]
    pub routing_suffix: Option<String>,

    /// Cluster config directory inside the VM
    #[arg(long)]
    pub host_config_dir: Option<String>,

    /// Cluster data directory inside the VM
    #[arg(long)]
    pub host_data_dir: Option<String>,

    /// Cluster volumes directory inside the VM
    #[arg(long)]
    pub host_volumes_dir: Option<String>,

    #[arg(long)]
    pub http_proxy: Option<String>,

    #[arg(long)]
    pub https_proxy: Option<String>,

    #[arg(long)]
    pub no_proxy: Option<String>,

    /// Install cluster metrics
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub metrics: Option<bool>,

    /// Install cluster logging
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub logging: Option<bool>,

    /// Use the local image cache
    #[arg(long, value_name = "BOOL", num_args = 0..=1, default_missing_value = "true")]
    pub image_caching: Option<bool>,

    /// Variables for addons (repeatable, key=value)
    #[arg(short = 'a', long, value_parser = parse_key_value)]
    pub addon_env: Vec<(String, String)>,
}

impl StartArgs {
    /// The settings given explicitly on the command line.
    pub fn flag_set(&self) -> FlagSet {
        let mut flags = FlagSet::new();
        flags.insert_opt("vm-driver", self.vm_driver.as_ref());
        flags.insert_opt("iso-url", self.iso_url.as_ref());
        flags.insert_opt("cpus", self.cpus);
        flags.insert_opt("memory", self.memory.as_ref());
        flags.insert_opt("disk-size", self.disk_size.as_ref());
        flags.insert_opt("host-only-cidr", self.host_only_cidr.as_ref());
        flags.insert_opt("openshift-version", self.openshift_version.as_ref());
        flags.insert_opt("public-hostname", self.public_hostname.as_ref());
        flags.insert_opt("routing-suffix", self.routing_suffix.as_ref());
        flags.insert_opt("host-config-dir", self.host_config_dir.as_ref());
        flags.insert_opt("host-data-dir", self.host_data_dir.as_ref());
        flags.insert_opt("host-volumes-dir", self.host_volumes_dir.as_ref());
        flags.insert_opt("http-proxy", self.http_proxy.as_ref());
        flags.insert_opt("https-proxy", self.https_proxy.as_ref());
        flags.insert_opt("no-proxy", self.no_proxy.as_ref());
        flags.insert_opt("image-caching", self.image_caching);
        flags.insert_opt("metrics", self.metrics);
        flags.insert_opt("logging", self.logging);

        for (name, values) in [
            ("docker-env", &self.docker_env),
            ("docker-opt", &self.docker_opt),
            ("insecure-registry", &self.insecure_registry),
            ("registry-mirror", &self.registry_mirror),
            ("openshift-env", &self.openshift_env),
        ] {
            if !values.is_empty() {
                flags.insert(name, values.join(","));
            }
        }
        flags
    }

    pub fn addon_env(&self) -> BTreeMap<String, String> {
        self.addon_env.iter().cloned().collect()
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("'{}' is not in key=value form", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_flags_become_explicit_settings() {
        let cli = Cli::try_parse_from([
            "minicluster",
            "start",
            "--memory",
            "4GB",
            "--cpus",
            "4",
            "--insecure-registry",
            "a:5000",
            "--insecure-registry",
            "b:5000",
            "--metrics",
        ])
        .expect("parse");
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        let flags = args.flag_set();
        assert_eq!(flags.get("memory"), Some("4GB"));
        assert_eq!(flags.get("cpus"), Some("4"));
        assert_eq!(flags.get("insecure-registry"), Some("a:5000,b:5000"));
        assert_eq!(flags.get("metrics"), Some("true"));
        assert_eq!(flags.get("logging"), None);
        assert_eq!(flags.get("vm-driver"), None);
    }

    #[test]
    fn explicit_false_toggles_are_passed_through() {
        let cli = Cli::try_parse_from([
            "minicluster",
            "start",
            "--metrics",
            "false",
            "--logging=false",
            "--image-caching",
        ])
        .expect("parse");
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        let flags = args.flag_set();
        assert_eq!(flags.get("metrics"), Some("false"));
        assert_eq!(flags.get("logging"), Some("false"));
        assert_eq!(flags.get("image-caching"), Some("true"));
    }

    #[test]
    fn timeout_is_a_global_flag() {
        let cli = Cli::try_parse_from(["minicluster", "stop", "--timeout", "30"]).expect("parse");
        assert_eq!(cli.timeout, Some(30));
        let cli = Cli::try_parse_from(["minicluster", "stop"]).expect("parse");
        assert_eq!(cli.timeout, None);
    }

    #[test]
    fn addon_env_requires_key_value() {
        let cli = Cli::try_parse_from(["minicluster", "start", "--addon-env", "TOKEN=a=b"])
            .expect("parse");
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.addon_env().get("TOKEN").map(String::as_str), Some("a=b"));

        assert!(Cli::try_parse_from(["minicluster", "start", "--addon-env", "novalue"]).is_err());
    }

    #[test]
    fn log_directive_follows_flags() {
        let cli = Cli::try_parse_from(["minicluster", "--v", "2", "stop"]).expect("parse");
        assert_eq!(cli.log_directive(), "debug");
        let cli = Cli::try_parse_from(["minicluster", "stop"]).expect("parse");
        assert_eq!(cli.log_directive(), "warn");
        let cli = Cli::try_parse_from(["minicluster", "--debug", "stop"]).expect("parse");
        assert_eq!(cli.log_directive(), "debug");
    }

    #[test]
    fn image_delete_needs_names() {
        assert!(Cli::try_parse_from(["minicluster", "image", "delete"]).is_err());
    }
}
