//! ui
//!
//! What the user sees outside of log output.
//!
//! # Modules
//!
//! - [`output`] - Verbosity-aware printing and the `warning:`/`error:` prefixes
//! - [`prompts`] - Yes/no confirmation for destructive commands
//! - [`progress`] - Dots printed while `oc cluster up` runs
//!
//! Engine code writes to injected `Write` handles instead of printing
//! directly, so tests can capture what a command would show.

pub mod output;
pub mod progress;
pub mod prompts;
