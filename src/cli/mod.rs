//! cli
//!
//! Command-line interface layer for minicluster.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install diagnostics logging and the interrupt handler
//! - Delegate to command handlers
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap, builds an
//! [`engine::Context`], and dispatches to a handler. Handlers call into the
//! engine or the cache modules and only format results.

pub mod args;
pub mod commands;

pub use args::{Cli, Command, ConfigAction, ImageAction, StartArgs};

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context as _, Result};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::core::config::{FlagSet, ProcessEnv, Resolver, Scope, SettingRegistry, ValueStore};
use crate::core::paths::HomePaths;
use crate::engine;
use crate::ui::output::Verbosity;

/// Name of the diagnostics file written under `--log_dir`.
pub const LOG_FILE_NAME: &str = "minicluster.log";

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let mut cli = Cli::parse_args();

    let paths = HomePaths::from_env()
        .context("Could not determine the home directory; set MINICLUSTER_HOME")?;
    resolve_logging_flags(&mut cli, &paths)?;
    init_logging(&cli, &paths)?;

    let mut ctx = engine::Context::new(
        paths,
        Verbosity::from_flags(cli.quiet, cli.debug),
        cli.interactive(),
    );
    ctx.ensure_layout()?;
    let mut flags = FlagSet::new();
    flags.insert_opt("timeout", cli.timeout);
    ctx.timeout = ctx.resolve_timeout(&flags, &ProcessEnv)?;
    install_interrupt_handler(Arc::clone(&ctx.cancel));

    commands::dispatch(cli.command, &ctx)
}

/// Fill `--v`, `--log_dir` and `--alsologtostderr` from the environment
/// or the global config when they were not given on the command line.
fn resolve_logging_flags(cli: &mut Cli, paths: &HomePaths) -> Result<()> {
    let registry = SettingRegistry::builtin();
    let global = ValueStore::open(
        Scope::Global,
        &paths.global_config_path(),
        Arc::clone(&registry),
    )?;

    let mut flags = FlagSet::new();
    flags.insert_opt("v", cli.verbosity);
    flags.insert_opt("log_dir", cli.log_dir.as_ref().map(|dir| dir.display()));
    if cli.alsologtostderr {
        flags.insert("alsologtostderr", "true");
    }
    let resolver = Resolver::new(&registry, &flags, &ProcessEnv, None, &global);

    cli.verbosity = resolver
        .int("v")?
        .map(|level| level.clamp(0, i64::from(u8::MAX)) as u8);
    cli.log_dir = resolver.non_empty("log_dir")?.map(PathBuf::from);
    cli.alsologtostderr = resolver.bool("alsologtostderr")?;
    Ok(())
}

/// Where diagnostics go for this invocation, if not only stderr.
fn log_file(cli: &Cli, paths: &HomePaths) -> Option<PathBuf> {
    if let Command::Image {
        action: ImageAction::Export {
            log_to_file: true, ..
        },
    } = &cli.command
    {
        let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        return Some(paths.image_export_log_path(&timestamp));
    }
    cli.log_dir.as_ref().map(|dir| dir.join(LOG_FILE_NAME))
}

/// Install the `tracing` subscriber.
///
/// `RUST_LOG` wins over `--v` and `--debug`.
fn init_logging(cli: &Cli, paths: &HomePaths) -> Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_directive()))
    };

    let Some(path) = log_file(cli, paths) else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_filter(filter()),
            )
            .init();
        return Ok(());
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory '{}'", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file '{}'", path.display()))?;
    let file_writer = BoxMakeWriter::new(Mutex::new(file));

    let stderr_layer = cli.alsologtostderr.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_filter(filter())
    });
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer)
                .with_filter(filter()),
        )
        .with(stderr_layer)
        .init();
    Ok(())
}

/// Set `cancel` on the first Ctrl-C. The pipeline notices between steps.
fn install_interrupt_handler(cancel: Arc<AtomicBool>) {
    let spawned = std::thread::Builder::new()
        .name("interrupt".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::warn!(error = %e, "interrupt handler unavailable");
                    return;
                }
            };
            runtime.block_on(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted; stopping after the current step");
                    cancel.store(true, Ordering::Relaxed);
                }
            });
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "interrupt handler unavailable");
    }
}
