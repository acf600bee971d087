//! engine::start
//!
//! The bring-up state machine.
//!
//! # Architecture
//!
//! ```text
//! Init -> PreflightPre -> VmReady -> PreflightPost -> OcCached ->
//!   ImagesImported -> ClusterUp -> PostClusterUp -> ImagesExported -> Running
//! ```
//!
//! Configuration is resolved once into [`StartSettings`] before `Init`. Each
//! step is idempotent or guarded by an existence check (VM status, cached
//! `oc`, cached images, the `origin` container), so a `start` that failed
//! after the VM came up resumes where it stopped on the next run.
//!
//! A VM that exists at `Init` makes the run a restart: addons are not
//! applied, the kube context is re-selected instead. A VM that is already
//! running ends the run at `Init` without touching it.
//!
//! # Invariants
//!
//! - No VM mutation happens when the VM is running at `Init`
//! - Instance State is persisted after creation, after `oc` caching, and
//!   at `Running`; a failure leaves the last persisted value
//! - The cancel flag is checked on every transition and nowhere else
//! - Exit handlers run on every way out of [`start`]

use std::collections::BTreeMap;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fmt, fs};

use tracing::{debug, info, warn};

use crate::addon::command::ORIGIN_CONTAINER;
use crate::addon::{load_records, save_records, AddonManager, ExecutionContext};
use crate::core::config::{FlagSet, Resolver};
use crate::core::instance::InstanceFile;
use crate::core::paths::HOME_ENV;
use crate::core::process::Invocation;
use crate::driver::machine::is_rhel_based_iso;
use crate::driver::{Driver, DriverError, VmStatus};
use crate::image::{default_openshift_images, ImageCache, ImageCacheConfig, ImageError, MissStrategy};
use crate::oc::OcCache;
use crate::preflight::{self, checks, CheckContext, OcTarget, Phase};
use crate::ui::output::warn_to;

use super::cluster_up::{
    cluster_up_args, copy_oc_command, default_routing_suffix, mkdir_command, requested_flags,
    run_cluster_up,
};
use super::exit::ExitHandlers;
use super::settings::StartSettings;
use super::{Context, EngineError, Services};

/// VM creation attempts before giving up.
pub const CREATE_ATTEMPTS: u32 = 3;

/// Pause between VM creation attempts.
pub const CREATE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Pipeline states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartState {
    Init,
    PreflightPre,
    VmReady,
    PreflightPost,
    OcCached,
    ImagesImported,
    ClusterUp,
    PostClusterUp,
    ImagesExported,
    Running,
}

impl fmt::Display for StartState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StartState::Init => "init",
            StartState::PreflightPre => "preflight-pre",
            StartState::VmReady => "vm-ready",
            StartState::PreflightPost => "preflight-post",
            StartState::OcCached => "oc-cached",
            StartState::ImagesImported => "images-imported",
            StartState::ClusterUp => "cluster-up",
            StartState::PostClusterUp => "post-cluster-up",
            StartState::ImagesExported => "images-exported",
            StartState::Running => "running",
        };
        f.write_str(name)
    }
}

/// Inputs to `start` that are not settings.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Extra addon variables (`--addon-env key=value`).
    pub addon_env: BTreeMap<String, String>,
}

/// What a `start` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    /// The VM was running at `Init`; nothing else happened.
    pub already_running: bool,
    /// The VM existed at `Init`.
    pub restart: bool,
    /// Every state entered, in order.
    pub states: Vec<StartState>,
    pub ip: Option<Ipv4Addr>,
    pub oc_path: Option<PathBuf>,
    pub imported_images: Vec<String>,
    pub applied_addons: Vec<String>,
    /// Images handed to the background exporter.
    pub exporting_images: Vec<String>,
}

/// Run the bring-up pipeline for `ctx.machine_name`.
///
/// `flags` are the settings given explicitly on the command line. Progress
/// goes to `out`; check failures and warnings to `err`.
pub fn start(
    ctx: &Context,
    services: &Services,
    flags: &FlagSet,
    options: &StartOptions,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<StartReport, EngineError> {
    let settings = {
        let global = ctx.global_store()?;
        let instance = ctx.instance_store()?;
        let resolver = Resolver::new(
            &ctx.registry,
            flags,
            services.env.as_ref(),
            Some(&instance),
            &global,
        );
        StartSettings::resolve(&ctx.machine_name, &resolver)?
    };

    Pipeline::new(ctx, services, settings, options, out, err).run()
}

struct Pipeline<'a> {
    ctx: &'a Context,
    services: &'a Services,
    settings: StartSettings,
    options: &'a StartOptions,
    out: &'a mut dyn Write,
    err: &'a mut dyn Write,
    instance: InstanceFile,
    report: StartReport,
    _exit: ExitHandlers,
}

impl<'a> Pipeline<'a> {
    fn new(
        ctx: &'a Context,
        services: &'a Services,
        settings: StartSettings,
        options: &'a StartOptions,
        out: &'a mut dyn Write,
        err: &'a mut dyn Write,
    ) -> Self {
        let mut exit = ExitHandlers::new();
        let started = Instant::now();
        let machine = ctx.machine_name.clone();
        exit.register("log duration", move || {
            info!(machine = %machine, elapsed_ms = started.elapsed().as_millis() as u64, "start finished");
        });
        // Only an empty staging directory is removed; a background
        // exporter may still be writing into a non-empty one.
        let staging = ctx.paths.image_cache_root().join("images").join("tmp");
        exit.register("remove image staging directory", move || {
            if let Err(e) = fs::remove_dir(&staging) {
                debug!(path = %staging.display(), error = %e, "staging directory kept");
            }
        });

        Self {
            ctx,
            services,
            settings,
            options,
            out,
            err,
            instance: ctx.instance_file(),
            report: StartReport::default(),
            _exit: exit,
        }
    }

    fn machine(&self) -> &str {
        &self.ctx.machine_name
    }

    fn enter(&mut self, state: StartState) -> Result<(), EngineError> {
        if self.ctx.is_cancelled() {
            warn!(%state, "start cancelled");
            return Err(EngineError::Cancelled);
        }
        debug!(%state, "entering state");
        self.report.states.push(state);
        Ok(())
    }

    fn run(mut self) -> Result<StartReport, EngineError> {
        self.enter(StartState::Init)?;
        let status = self.services.driver.status(self.machine())?;
        if status == VmStatus::Running {
            writeln!(self.out, "The '{}' VM is already running.", &self.ctx.machine_name)?;
            self.report.already_running = true;
            return Ok(self.report);
        }
        self.report.restart = status != VmStatus::DoesNotExist;
        if self.report.restart {
            self.reuse_recorded_driver()?;
        }

        self.enter(StartState::PreflightPre)?;
        writeln!(
            self.out,
            "-- Starting local OpenShift cluster using '{}' hypervisor ...",
            self.settings.machine.vm_driver
        )?;
        self.preflight(Phase::PreVm, None)?;

        self.enter(StartState::VmReady)?;
        self.ensure_vm(status)?;

        self.enter(StartState::PreflightPost)?;
        self.preflight(Phase::PostVm, None)?;
        let ip = self.services.driver.ip(self.machine())?;
        self.report.ip = Some(ip);
        self.instance.update(|state| state.last_known_ip = ip.to_string())?;

        self.enter(StartState::OcCached)?;
        let oc_path = self.cache_oc()?;
        let args = cluster_up_args(&self.settings, ip);
        let flags = requested_flags(&args);
        self.preflight(
            Phase::PostOc,
            Some(OcTarget {
                path: &oc_path,
                flags: &flags,
            }),
        )?;

        self.enter(StartState::ImagesImported)?;
        self.import_images()?;

        self.enter(StartState::ClusterUp)?;
        self.cluster_up(&oc_path, &args)?;

        self.enter(StartState::PostClusterUp)?;
        if self.report.restart {
            self.use_context(&oc_path)?;
        } else {
            self.apply_addons(ip, &oc_path)?;
        }
        self.mount_host_folders()?;

        self.enter(StartState::ImagesExported)?;
        self.export_images()?;

        self.enter(StartState::Running)?;
        let cache_images = self.settings.cache_images.clone();
        self.instance.update(|state| {
            state.cache_images = cache_images;
            state.last_known_ip = ip.to_string();
        })?;
        writeln!(self.out, "-- OpenShift server started")?;
        writeln!(self.out, "   The server is accessible via web console at:")?;
        writeln!(self.out, "       https://{}:8443", ip)?;
        Ok(self.report)
    }

    /// On restart, keep using the driver the VM was created with.
    fn reuse_recorded_driver(&mut self) -> Result<(), EngineError> {
        let recorded = self.instance.load()?.vm_driver;
        if !recorded.is_empty() && recorded != self.settings.machine.vm_driver {
            warn_to(
                self.err,
                format!(
                    "the '{}' VM was created with the '{}' driver; ignoring '{}'",
                    self.ctx.machine_name,
                    recorded,
                    self.settings.machine.vm_driver
                ),
            )?;
            self.settings.machine.vm_driver = recorded;
        }
        Ok(())
    }

    fn preflight(&mut self, phase: Phase, oc: Option<OcTarget<'_>>) -> Result<(), EngineError> {
        let cx = CheckContext {
            machine_name: &self.ctx.machine_name,
            vm_driver: &self.settings.machine.vm_driver,
            iso_url: &self.settings.machine.iso_url,
            ping_host: &self.settings.ping_host,
            http_url: &self.settings.http_url,
            driver: self.services.driver.as_ref(),
            runner: self.services.runner.as_ref(),
            oc,
            timeout: self.ctx.timeout,
        };
        preflight::run_phase(
            checks::catalogue(),
            phase,
            &cx,
            &self.settings.toggles,
            self.out,
            self.err,
        )?;
        Ok(())
    }

    fn ensure_vm(&mut self, status: VmStatus) -> Result<(), EngineError> {
        if status == VmStatus::DoesNotExist {
            self.create_vm()?;
        } else {
            write!(self.out, "-- Starting VM ... ")?;
            self.out.flush()?;
            if let Err(e) = self.services.driver.start(self.machine()) {
                writeln!(self.out, "FAIL")?;
                return Err(e.into());
            }
            writeln!(self.out, "OK")?;
        }

        match self.services.driver.status(self.machine())? {
            VmStatus::Running => Ok(()),
            other => Err(DriverError::UnexpectedState {
                name: self.machine().to_string(),
                status: other,
            }
            .into()),
        }
    }

    fn create_vm(&mut self) -> Result<(), EngineError> {
        let driver = Arc::clone(&self.services.driver);
        let mut last_error = None;
        let mut cleanup_error = None;

        for attempt in 1..=CREATE_ATTEMPTS {
            write!(self.out, "-- Starting VM ... ")?;
            self.out.flush()?;
            match driver.create(&self.settings.machine) {
                Ok(()) => {
                    writeln!(self.out, "OK")?;
                    last_error = None;
                    break;
                }
                Err(e) => {
                    writeln!(self.out, "FAIL")?;
                    writeln!(self.err, "   {}", e)?;
                    warn!(attempt, error = %e, "VM creation failed");
                    // A half-created machine would make the next attempt fail.
                    cleanup_error = self.remove_partial_vm(driver.as_ref());
                    last_error = Some(e);
                    if attempt < CREATE_ATTEMPTS {
                        (self.services.sleep)(CREATE_RETRY_DELAY);
                    }
                }
            }
        }

        if let Some(source) = last_error {
            return Err(EngineError::VmCreation {
                attempts: CREATE_ATTEMPTS,
                source,
                cleanup: cleanup_error,
            });
        }

        let vm_driver = self.settings.machine.vm_driver.clone();
        let rhel = is_rhel_based_iso(&self.settings.machine.iso_url);
        self.instance.update(|state| {
            state.vm_driver = vm_driver;
            state.is_rhel_based = rhel;
        })?;
        info!(machine = %self.machine(), "VM created");
        Ok(())
    }

    /// Delete whatever a failed create left behind. Returns the error that
    /// prevented cleanup, if any.
    fn remove_partial_vm(&self, driver: &dyn Driver) -> Option<DriverError> {
        let exists = match driver.exists(self.machine()) {
            Ok(exists) => exists,
            Err(e) => {
                warn!(machine = %self.machine(), error = %e, "could not check for a partial VM");
                return Some(e);
            }
        };
        if !exists {
            return None;
        }
        match driver.delete(self.machine()) {
            Ok(()) => {
                debug!(machine = %self.machine(), "removed partial VM");
                None
            }
            Err(e) => {
                warn!(machine = %self.machine(), error = %e, "could not remove partial VM");
                Some(e)
            }
        }
    }

    fn cache_oc(&mut self) -> Result<PathBuf, EngineError> {
        let mut cache = OcCache::new(
            self.ctx.paths.oc_cache_dir(),
            Arc::clone(&self.services.fetcher),
        );
        if let Some(base_url) = &self.services.oc_base_url {
            cache = cache.with_base_url(base_url.clone());
        }
        let version = self.settings.openshift_version.clone();

        write!(self.out, "-- Checking the oc binary for {} ... ", version)?;
        self.out.flush()?;
        let path = match cache.ensure_cached(&version) {
            Ok(path) => path,
            Err(e) => {
                writeln!(self.out, "FAIL")?;
                return Err(e.into());
            }
        };
        writeln!(self.out, "OK")?;

        let recorded = path.display().to_string();
        self.instance.update(|state| state.oc_path = recorded)?;
        self.report.oc_path = Some(path.clone());
        Ok(path)
    }

    /// Default cluster images followed by the configured ones.
    fn cache_image_list(&self) -> Vec<String> {
        let mut images = default_openshift_images(&self.settings.openshift_version);
        for image in &self.settings.cache_images {
            if !images.contains(image) {
                images.push(image.clone());
            }
        }
        images
    }

    fn import_images(&mut self) -> Result<(), EngineError> {
        if !self.settings.image_caching {
            debug!("image caching disabled");
            return Ok(());
        }
        let runtime = self.services.runtime_for(self.machine())?;
        let cache = ImageCache::new(&self.ctx.paths.image_cache_root(), runtime);
        let config = ImageCacheConfig::new(self.cache_image_list(), MissStrategy::Skip);

        write!(self.out, "-- Importing cached images ... ")?;
        self.out.flush()?;
        match cache.import_images(&config) {
            Ok(imported) => {
                writeln!(self.out, "OK")?;
                for image in &imported {
                    writeln!(self.out, "   {}", image)?;
                }
                self.report.imported_images = imported;
            }
            Err(e @ ImageError::InvalidImageName(_)) => {
                writeln!(self.out, "FAIL")?;
                return Err(e.into());
            }
            Err(e) => {
                writeln!(self.out, "WARN")?;
                warn_to(self.err, format!("image import failed: {}", e))?;
            }
        }
        Ok(())
    }

    fn origin_running(&self) -> bool {
        let command = format!("docker inspect -f '{{{{.State.Running}}}}' {}", ORIGIN_CONTAINER);
        self.services
            .driver
            .ssh(self.machine(), &command)
            .map(|output| output.code == 0 && output.stdout.trim() == "true")
            .unwrap_or(false)
    }

    fn cluster_up(&mut self, oc_path: &Path, args: &[String]) -> Result<(), EngineError> {
        if self.origin_running() {
            writeln!(self.out, "-- OpenShift cluster is already running in the VM")?;
            return Ok(());
        }

        let driver = Arc::clone(&self.services.driver);
        for (label, command) in [
            ("Creating host directories", mkdir_command(&self.settings)),
            (
                "Copying oc binary into the VM",
                copy_oc_command(&self.settings.openshift_version),
            ),
        ] {
            write!(self.out, "-- {} ... ", label)?;
            self.out.flush()?;
            if let Err(e) = driver.ssh_checked(self.machine(), &command) {
                writeln!(self.out, "FAIL")?;
                return Err(e.into());
            }
            writeln!(self.out, "OK")?;
        }

        let docker_env = driver.docker_env(self.machine())?;
        run_cluster_up(
            self.services.runner.as_ref(),
            oc_path,
            args,
            &docker_env,
            &self.ctx.paths.cluster_up_log_path(),
            !self.ctx.verbosity.is_quiet(),
            self.out,
        )
    }

    fn apply_addons(&mut self, ip: Ipv4Addr, oc_path: &Path) -> Result<(), EngineError> {
        let mut global = self.ctx.global_store()?;
        let mut records = load_records(&global)?;
        let mut manager = AddonManager::load(&self.ctx.paths.addons_dir(), &records)?;

        let enabled = manager.enable_defaults(&self.settings.default_addons, &records);
        if !enabled.is_empty() {
            for record in enabled {
                info!(addon = %record.name, "enabled default addon");
                records.insert(record.name.clone(), record);
            }
            save_records(&mut global, &records)?;
        }

        let suffix = self
            .settings
            .routing_suffix
            .clone()
            .unwrap_or_else(|| default_routing_suffix(ip));
        let kube_config = self.ctx.kube_config_path();
        let mut cx = ExecutionContext::new(
            self.services.driver.as_ref(),
            &self.ctx.machine_name,
            self.services.runner.as_ref(),
            oc_path,
            &kube_config,
        );
        cx.sleep = self.services.sleep;
        cx.add("ip", &ip.to_string());
        cx.add("routing-suffix", &suffix);
        for (key, value) in &self.options.addon_env {
            cx.add(key, value);
        }

        self.report.applied_addons =
            manager.apply(&mut cx, &self.settings.openshift_version, self.out)?;
        Ok(())
    }

    /// Re-select the developer context after a restart.
    fn use_context(&mut self, oc_path: &Path) -> Result<(), EngineError> {
        let mut env = BTreeMap::new();
        env.insert(
            "KUBECONFIG".to_string(),
            self.ctx.kube_config_path().display().to_string(),
        );
        let invocation = Invocation::new(oc_path.display().to_string())
            .args(["config", "use-context", self.machine()])
            .envs(&env);
        match self.services.runner.output(&invocation) {
            Ok(output) if output.success() => {}
            Ok(output) => warn_to(
                self.err,
                format!(
                    "could not set the oc context '{}': {}",
                    self.ctx.machine_name,
                    output.combined().trim()
                ),
            )?,
            Err(e) => warn_to(
                self.err,
                format!("could not set the oc context '{}': {}", self.ctx.machine_name, e),
            )?,
        }
        Ok(())
    }

    fn mount_host_folders(&mut self) -> Result<(), EngineError> {
        if !self.settings.hostfolders_automount {
            return Ok(());
        }
        let folders = self.instance.load()?.host_folders;
        for entry in folders {
            let Some((name, source)) = entry.split_once('=') else {
                warn_to(self.err, format!("ignoring malformed host folder '{}'", entry))?;
                continue;
            };
            let target = format!(
                "{}/{}",
                self.settings.hostfolders_mountpath.trim_end_matches('/'),
                name
            );
            let command = format!(
                "sudo mkdir -p {t} && (mountpoint -q {t} || sudo mount -t cifs {s} {t} -o guest)",
                t = target,
                s = source
            );
            write!(self.out, "-- Mounting host folder '{}' ... ", name)?;
            self.out.flush()?;
            match self.services.driver.ssh_checked(self.machine(), &command) {
                Ok(_) => writeln!(self.out, "OK")?,
                Err(e) => {
                    writeln!(self.out, "FAIL")?;
                    warn_to(self.err, format!("mounting '{}' failed: {}", name, e))?;
                }
            }
        }
        Ok(())
    }

    fn export_images(&mut self) -> Result<(), EngineError> {
        if !self.settings.image_caching || self.settings.cache_images.is_empty() {
            return Ok(());
        }
        let runtime = self.services.runtime_for(self.machine())?;
        let cache = ImageCache::new(&self.ctx.paths.image_cache_root(), runtime);
        let config = ImageCacheConfig::new(self.cache_image_list(), MissStrategy::Pull);
        let cached = cache.cached_subset(&config)?;
        let missing: Vec<String> = crate::image::normalize_all(&config.images)?
            .into_iter()
            .filter(|image| !cached.contains(image))
            .collect();
        if missing.is_empty() {
            debug!("every configured image is cached");
            return Ok(());
        }

        let mut env = BTreeMap::new();
        env.insert(HOME_ENV.to_string(), self.ctx.paths.home().display().to_string());
        let invocation = Invocation::new(self.services.exe.display().to_string())
            .args(["image", "export", "--log-to-file", "--timeout"])
            .arg(self.ctx.timeout.as_secs().max(1).to_string())
            .args(missing.iter().cloned())
            .envs(&env);
        self.services
            .runner
            .spawn_detached(&invocation)
            .map_err(|source| EngineError::Spawn {
                command: invocation.display(),
                source,
            })?;
        writeln!(
            self.out,
            "-- Exporting {} image(s) to the cache in the background; see '{}'",
            missing.len(),
            self.ctx.paths.logs_dir().display()
        )?;
        self.report.exporting_images = missing;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MapEnv;
    use crate::core::paths::HomePaths;
    use crate::core::process::{ProcessOutput, ScriptedRunner};
    use crate::driver::mock::{FailOn, MockDriver, MockOperation};
    use crate::image::MemoryRuntime;
    use crate::oc::fetch::{FetchError, Fetcher};
    use crate::preflight::PreflightError;
    use crate::ui::output::Verbosity;
    use tempfile::TempDir;

    struct FakeFetcher;

    impl Fetcher for FakeFetcher {
        fn get(&self, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
            if url.ends_with(".sha256") {
                Ok(None)
            } else {
                Ok(Some(b"#!/bin/sh\n".to_vec()))
            }
        }
    }

    fn no_sleep(_: Duration) {}

    struct Harness {
        _temp: TempDir,
        ctx: Context,
        driver: MockDriver,
        runner: ScriptedRunner,
        runtime: MemoryRuntime,
    }

    impl Harness {
        fn new(driver: MockDriver) -> Self {
            let temp = TempDir::new().expect("tempdir");
            let ctx = Context::new(
                HomePaths::new(temp.path().to_path_buf()),
                Verbosity::Quiet,
                false,
            );
            ctx.ensure_layout().expect("layout");
            Self {
                _temp: temp,
                ctx,
                driver,
                runner: ScriptedRunner::new(),
                runtime: MemoryRuntime::new(),
            }
        }

        fn services(&self, env: &[(&str, &str)]) -> Services {
            Services {
                driver: Arc::new(self.driver.clone()),
                runner: Arc::new(self.runner.clone()),
                fetcher: Arc::new(FakeFetcher),
                runtime: Some(Arc::new(self.runtime.clone())),
                oc_base_url: Some("http://mirror.test".into()),
                env: Box::new(MapEnv::from_pairs(env.iter().copied())),
                sleep: no_sleep,
                exe: PathBuf::from("/usr/bin/minicluster"),
            }
        }

        /// Host checks are environment-dependent; skip them.
        fn run(&self, flags: &[(&str, &str)]) -> (Result<StartReport, EngineError>, String, String) {
            let mut all: Vec<(&str, &str)> = vec![
                ("skip-check-vm-driver", "true"),
                ("skip-check-kvm-driver", "true"),
                ("skip-check-xhyve-driver", "true"),
                ("skip-check-hyperv-driver", "true"),
                ("skip-check-virtualbox-installed", "true"),
                ("skip-check-storage-usage", "true"),
                ("skip-check-cluster-up-flag", "true"),
                ("image-caching", "false"),
            ];
            all.extend_from_slice(flags);
            let flags = FlagSet::from_pairs(all);
            let services = self.services(&[]);
            let mut out = Vec::new();
            let mut err = Vec::new();
            let result = start(
                &self.ctx,
                &services,
                &flags,
                &StartOptions::default(),
                &mut out,
                &mut err,
            );
            (
                result,
                String::from_utf8(out).expect("utf8"),
                String::from_utf8(err).expect("utf8"),
            )
        }
    }

    fn mounted() -> MockDriver {
        MockDriver::new().on_ssh("/proc/mounts", crate::driver::SshOutput::ok("1\n"))
    }

    #[test]
    fn fresh_start_walks_every_state() {
        let harness = Harness::new(mounted());
        let (result, out, _) = harness.run(&[]);
        let report = result.expect("start");

        assert!(!report.restart);
        assert_eq!(report.states.first(), Some(&StartState::Init));
        assert_eq!(report.states.last(), Some(&StartState::Running));
        assert_eq!(report.states.len(), 10);
        assert!(out.contains("-- OpenShift server started"));

        let state = harness.ctx.instance_file().load().expect("state");
        assert!(!state.vm_driver.is_empty());
        assert!(state.oc_path.ends_with(crate::oc::binary_name()));
        assert_eq!(state.last_known_ip, "192.168.42.10");
    }

    #[test]
    fn running_vm_is_left_alone() {
        let harness = Harness::new(MockDriver::with_machine("minicluster", VmStatus::Running));
        let (result, out, _) = harness.run(&[]);
        let report = result.expect("start");

        assert!(report.already_running);
        assert_eq!(report.states, vec![StartState::Init]);
        assert!(out.contains("already running"));
        assert!(harness.driver.operations().iter().all(|op| !op.is_mutation()));
    }

    #[test]
    fn creation_is_retried_then_succeeds() {
        let harness = Harness::new(mounted().fail_on(FailOn::Create { times: 2 }));
        let (result, out, _) = harness.run(&[]);
        result.expect("start");
        assert_eq!(out.matches("-- Starting VM ... FAIL").count(), 2);
        assert_eq!(out.matches("-- Starting VM ... OK").count(), 1);
    }

    #[test]
    fn creation_gives_up_after_three_attempts() {
        let harness = Harness::new(mounted().fail_on(FailOn::Create { times: 5 }));
        let (result, out, _) = harness.run(&[]);
        assert!(matches!(
            result,
            Err(EngineError::VmCreation { attempts: 3, .. })
        ));
        assert_eq!(out.matches("FAIL").count(), 3);
        assert!(harness.ctx.instance_file().load().expect("state").vm_driver.is_empty());
    }

    #[test]
    fn partial_vm_from_a_failed_attempt_is_removed() {
        let harness = Harness::new(mounted().fail_on(FailOn::PartialCreate { times: 1 }));
        let (result, _, _) = harness.run(&[]);
        result.expect("start");

        let ops = harness.driver.operations();
        let deletes = ops
            .iter()
            .filter(|op| matches!(op, MockOperation::Delete { .. }))
            .count();
        assert_eq!(deletes, 1);
    }

    #[test]
    fn failed_cleanup_is_reported_with_the_creation_error() {
        let harness = Harness::new(
            mounted()
                .fail_on(FailOn::PartialCreate { times: 5 })
                .fail_on(FailOn::Delete),
        );
        let (result, _, _) = harness.run(&[]);
        let err = result.unwrap_err();
        let EngineError::VmCreation { cleanup, .. } = &err else {
            panic!("unexpected {:?}", err);
        };
        assert!(matches!(
            cleanup,
            Some(DriverError::OperationFailed { operation: "delete", .. })
        ));
        assert!(err.to_string().contains("the partial VM may remain"));
    }

    #[test]
    fn fatal_check_aborts_before_the_vm_is_touched() {
        let harness = Harness::new(mounted());
        let (result, out, err) = harness.run(&[("iso-url", "file:///nonexistent/minicluster.iso")]);
        let error = result.unwrap_err();
        let EngineError::Preflight(PreflightError::Failed { id, .. }) = &error else {
            panic!("unexpected {:?}", error);
        };
        assert_eq!(id, "iso-url");
        assert_eq!(error.exit_code(), 1);
        assert!(out.contains("-- Checking the ISO URL ... FAIL"));
        assert!(err.contains("does not exist"));
        assert!(harness.driver.operations().iter().all(|op| !op.is_mutation()));
    }

    #[test]
    fn restart_selects_context_instead_of_addons() {
        let harness = Harness::new(
            MockDriver::with_machine("minicluster", VmStatus::Stopped)
                .on_ssh("/proc/mounts", crate::driver::SshOutput::ok("1\n")),
        );
        let (result, _, _) = harness.run(&[]);
        let report = result.expect("start");

        assert!(report.restart);
        assert!(report.applied_addons.is_empty());
        assert!(harness
            .runner
            .calls()
            .iter()
            .any(|call| call.display().ends_with("config use-context minicluster")));
    }

    #[test]
    fn failed_bring_up_is_fatal_and_keeps_earlier_state() {
        let harness = Harness::new(mounted());
        let harness = Harness {
            runner: ScriptedRunner::new().on(
                "cluster up --use-existing-config",
                ProcessOutput {
                    code: 2,
                    stdout: String::new(),
                    stderr: "boom".into(),
                },
            ),
            ..harness
        };
        let (result, _, _) = harness.run(&[]);
        let err = result.unwrap_err();
        assert_eq!(err.exit_code(), 2);

        let state = harness.ctx.instance_file().load().expect("state");
        assert!(!state.oc_path.is_empty());
        assert!(state.cache_images.is_empty());
        assert!(harness.ctx.paths.cluster_up_log_path().exists());
    }

    #[test]
    fn running_origin_container_skips_bring_up() {
        let harness = Harness::new(
            mounted().on_ssh("docker inspect", crate::driver::SshOutput::ok("true\n")),
        );
        let (result, out, _) = harness.run(&[]);
        result.expect("start");
        assert!(out.contains("already running in the VM"));
        assert!(!harness
            .runner
            .calls()
            .iter()
            .any(|call| call.display().contains("cluster up")));
    }

    #[test]
    fn cancellation_stops_between_steps() {
        let harness = Harness::new(mounted());
        harness
            .ctx
            .cancel
            .store(true, std::sync::atomic::Ordering::Relaxed);
        let (result, _, _) = harness.run(&[]);
        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(harness.driver.operations().is_empty());
    }

    #[test]
    fn configured_images_are_exported_in_background() {
        let harness = Harness::new(mounted());
        let (result, _, _) = harness.run(&[
            ("image-caching", "true"),
            ("cache-images", "alpine"),
        ]);
        let report = result.expect("start");
        assert!(report.exporting_images.contains(&"alpine:latest".to_string()));

        let spawned = harness.runner.detached();
        assert_eq!(spawned.len(), 1);
        assert!(spawned[0]
            .display()
            .starts_with("/usr/bin/minicluster image export --log-to-file --timeout 600 "));
    }
}
