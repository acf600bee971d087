//! core
//!
//! Core domain types, configuration, and persistence for minicluster.
//!
//! # Modules
//!
//! - [`paths`] - Centralized path routing for the home directory
//! - [`value`] - Typed setting values and coercion
//! - [`config`] - Registry, Value Stores, persistence, precedence
//! - [`instance`] - Per-machine Instance State
//! - [`ops`] - File locks
//! - [`process`] - Host subprocess execution
//!
//! # Design Principles
//!
//! - Persisted state is only ever replaced atomically
//! - Every writer holds the lock for the file it writes
//! - Nothing in `core` exits the process or prints to the terminal

pub mod config;
pub mod instance;
pub mod ops;
pub mod paths;
pub mod process;
pub mod value;
