//! engine
//!
//! Drives the cluster lifecycle: start, stop, delete.
//!
//! # Architecture
//!
//! The engine is the only layer that composes the others. A command handler
//! builds a [`Context`] (where state lives, who the machine is, how loud to
//! be) and a [`Services`] bundle (the VM driver, the subprocess runner, the
//! downloader, the container runtime), then calls one entry point:
//!
//! - [`start::start`] - The bring-up state machine
//! - [`lifecycle::stop`] - Stop a running VM
//! - [`lifecycle::delete`] - Delete the VM and its per-instance state
//!
//! Every external effect goes through a trait object in [`Services`], so the
//! whole pipeline runs against a mock driver and a scripted runner in tests.
//!
//! # Invariants
//!
//! - Nothing in the engine exits the process; errors carry their exit code
//! - The cancel flag is honoured only between pipeline steps
//! - Instance State is written by one step at a time
//!
//! # Example
//!
//! ```ignore
//! use minicluster::engine::{self, Context, Services};
//!
//! let mut ctx = Context::new(paths, Verbosity::Normal, true);
//! ctx.ensure_layout()?;
//! ctx.timeout = ctx.resolve_timeout(&flags, &ProcessEnv)?;
//! let services = Services::system(&ctx);
//! let report = engine::start::start(&ctx, &services, &flags, &StartOptions::default(),
//!     &mut stdout, &mut stderr)?;
//! ```

pub mod cluster_up;
pub mod exit;
pub mod lifecycle;
pub mod settings;
pub mod start;

pub use exit::ExitHandlers;
pub use lifecycle::{delete, stop, DeleteOutcome, StopOutcome};
pub use settings::StartSettings;
pub use start::{start, StartOptions, StartReport, StartState};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::addon::AddonError;
use crate::core::config::persist;
use crate::core::config::registry::DEFAULT_TIMEOUT_SECS;
use crate::core::config::{
    ConfigError, EnvSource, FlagSet, ProcessEnv, Resolver, Scope, SettingContext,
    SettingRegistry, ValueStore,
};
use crate::core::instance::InstanceFile;
use crate::core::paths::HomePaths;
use crate::core::process::{CommandRunner, SystemRunner};
use crate::driver::machine::{MachineCli, DEFAULT_MACHINE_BINARY};
use crate::driver::{Driver, DriverError};
use crate::image::{ContainerRuntime, DockerCli, ImageError};
use crate::oc::fetch::{Fetcher, HttpFetcher};
use crate::oc::OcCacheError;
use crate::preflight::PreflightError;
use crate::ui::output::Verbosity;
use crate::ui::prompts::PromptError;

/// Machine name used when none is given.
pub const DEFAULT_MACHINE_NAME: &str = "minicluster";

/// Bound on every external call except cluster bring-up, unless the
/// `timeout` setting says otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(DEFAULT_TIMEOUT_SECS as u64);

/// Execution context for commands.
///
/// Contains global settings derived from CLI flags that affect command behavior.
#[derive(Debug, Clone)]
pub struct Context {
    pub paths: HomePaths,
    pub registry: Arc<SettingRegistry>,
    pub machine_name: String,
    pub verbosity: Verbosity,
    /// Interactive mode enabled.
    pub interactive: bool,
    /// Set from a signal handler; checked between pipeline steps.
    pub cancel: Arc<AtomicBool>,
    /// Bound on downloads, driver calls, SSH and runtime commands.
    pub timeout: Duration,
}

impl Context {
    pub fn new(paths: HomePaths, verbosity: Verbosity, interactive: bool) -> Self {
        Self {
            paths,
            registry: SettingRegistry::builtin(),
            machine_name: DEFAULT_MACHINE_NAME.to_string(),
            verbosity,
            interactive,
            cancel: Arc::new(AtomicBool::new(false)),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// The `timeout` setting in seconds, resolved flag > env > instance >
    /// global > default.
    pub fn resolve_timeout(
        &self,
        flags: &FlagSet,
        env: &dyn EnvSource,
    ) -> Result<Duration, ConfigError> {
        let global = self.global_store()?;
        let instance = self.instance_store()?;
        let resolver = Resolver::new(&self.registry, flags, env, Some(&instance), &global);
        let secs = resolver
            .int("timeout")?
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Ok(Duration::from_secs(secs as u64))
    }

    /// Create the home directories and both config files (as `{}`).
    pub fn ensure_layout(&self) -> Result<(), EngineError> {
        self.paths.ensure_dirs().map_err(|source| EngineError::Io {
            path: self.paths.home().to_path_buf(),
            source,
        })?;
        persist::ensure_exists(&self.paths.global_config_path())?;
        persist::ensure_exists(&self.paths.instance_config_path(&self.machine_name))?;
        Ok(())
    }

    pub fn global_store(&self) -> Result<ValueStore, ConfigError> {
        ValueStore::open(
            Scope::Global,
            &self.paths.global_config_path(),
            Arc::clone(&self.registry),
        )
    }

    pub fn instance_store(&self) -> Result<ValueStore, ConfigError> {
        ValueStore::open(
            Scope::Instance(self.machine_name.clone()),
            &self.paths.instance_config_path(&self.machine_name),
            Arc::clone(&self.registry),
        )
    }

    pub fn instance_file(&self) -> InstanceFile {
        InstanceFile::new(
            &self.machine_name,
            &self.paths.instance_config_path(&self.machine_name),
        )
    }

    /// What setting callbacks need to know. A machine counts as existing
    /// once a driver has been recorded for it.
    pub fn setting_context(&self) -> SettingContext {
        let instance_exists = self
            .instance_file()
            .load()
            .map(|state| !state.vm_driver.is_empty())
            .unwrap_or(false);
        SettingContext {
            machine_name: self.machine_name.clone(),
            instance_exists,
        }
    }

    /// The kubeconfig `oc` writes to: first entry of `$KUBECONFIG`, else
    /// `~/.kube/config`.
    pub fn kube_config_path(&self) -> PathBuf {
        if let Some(first) = std::env::var_os("KUBECONFIG")
            .as_ref()
            .and_then(|v| std::env::split_paths(v).next())
        {
            return first;
        }
        dirs::home_dir()
            .unwrap_or_else(|| self.paths.home().to_path_buf())
            .join(".kube")
            .join("config")
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

/// The external collaborators the engine drives.
pub struct Services {
    pub driver: Arc<dyn Driver>,
    pub runner: Arc<dyn CommandRunner>,
    pub fetcher: Arc<dyn Fetcher>,
    /// Fixed runtime; `None` means a `docker` client aimed at the VM.
    pub runtime: Option<Arc<dyn ContainerRuntime>>,
    /// Mirror for `oc` downloads; `None` uses the public one.
    pub oc_base_url: Option<String>,
    pub env: Box<dyn EnvSource>,
    /// Used between VM creation attempts; tests swap it for a no-op.
    pub sleep: fn(Duration),
    /// Binary to run for the background image export.
    pub exe: PathBuf,
}

impl Services {
    /// Real processes, real network, real environment, all bounded by
    /// `ctx.timeout`.
    pub fn system(ctx: &Context) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::with_timeout(ctx.timeout));
        Self {
            driver: Arc::new(MachineCli::new(
                DEFAULT_MACHINE_BINARY,
                ctx.paths.home().to_path_buf(),
                Arc::clone(&runner),
            )),
            runner,
            fetcher: Arc::new(HttpFetcher::new(ctx.timeout)),
            runtime: None,
            oc_base_url: None,
            env: Box::new(ProcessEnv),
            sleep: std::thread::sleep,
            exe: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("minicluster")),
        }
    }

    /// The container runtime for `machine`.
    pub fn runtime_for(&self, machine: &str) -> Result<Arc<dyn ContainerRuntime>, EngineError> {
        match &self.runtime {
            Some(runtime) => Ok(Arc::clone(runtime)),
            None => Ok(Arc::new(DockerCli::new(
                self.driver.docker_env(machine)?,
                Arc::clone(&self.runner),
            ))),
        }
    }
}

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Every creation attempt failed. `cleanup` is why the partial VM
    /// from the last attempt could not be removed.
    #[error(
        "error creating the VM after {attempts} attempts: {source}{}",
        cleanup_note(.cleanup)
    )]
    VmCreation {
        attempts: u32,
        #[source]
        source: DriverError,
        cleanup: Option<DriverError>,
    },

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    OcCache(#[from] OcCacheError),

    #[error(transparent)]
    Addon(#[from] AddonError),

    /// `oc cluster up` exited non-zero. Its output is in `log`.
    #[error("error starting the cluster (exit code {code}); output is in '{}'", log.display())]
    ClusterBringUp { code: i32, log: PathBuf },

    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("failed to write '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error("failed to write output: {0}")]
    Output(#[from] std::io::Error),
}

fn cleanup_note(cleanup: &Option<DriverError>) -> String {
    match cleanup {
        Some(e) => format!(" (the partial VM may remain: {})", e),
        None => String::new(),
    }
}

impl EngineError {
    /// Process exit code for this error.
    ///
    /// Cluster bring-up failures pass the subprocess code through unless it
    /// would read as success or as a generic failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::ClusterBringUp { code, .. } if *code > 1 => *code,
            _ => 1,
        }
    }
}
