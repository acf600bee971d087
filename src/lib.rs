//! minicluster - Run a single-node OpenShift cluster in a local VM
//!
//! minicluster creates a virtual machine through a driver, checks the host
//! and the VM, brings an OpenShift cluster up inside it, and applies addons
//! on top. Settings come from flags, the environment, and two JSON config
//! scopes; container images and the `oc` binary are cached on the host.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Start state machine, stop, delete, exit handlers
//! - [`core`] - Settings, value stores, persistence, paths, subprocesses
//! - [`driver`] - The VM driver trait and its adapters
//! - [`preflight`] - Host and VM checks around VM creation
//! - [`image`] - Content-addressed container image cache
//! - [`oc`] - Versioned `oc` binary cache
//! - [`addon`] - Addon definitions and their executor
//! - [`ui`] - User interaction utilities
//!
//! # Correctness Invariants
//!
//! minicluster maintains the following invariants:
//!
//! 1. A flag beats the environment, which beats the instance config, which
//!    beats the global config, which beats the registered default
//! 2. Config files are replaced atomically under a per-file lock
//! 3. A start against a running VM changes nothing
//! 4. Cached images and binaries are only published once complete

pub mod addon;
pub mod cli;
pub mod core;
pub mod driver;
pub mod engine;
pub mod image;
pub mod oc;
pub mod preflight;
pub mod ui;
