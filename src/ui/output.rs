//! ui::output
//!
//! User-facing output.
//!
//! # Design
//!
//! Everything the user is meant to read goes through here and respects
//! the quiet flag. Diagnostics go through `tracing` instead.

use std::fmt::Display;
use std::io::{self, Write};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - errors only
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }

    pub fn is_quiet(self) -> bool {
        self == Verbosity::Quiet
    }
}

/// Print a message (respects quiet mode).
pub fn print(message: impl Display, verbosity: Verbosity) {
    if verbosity != Verbosity::Quiet {
        println!("{}", message);
    }
}

/// Print a debug message (only in debug mode).
pub fn debug(message: impl Display, verbosity: Verbosity) {
    if verbosity == Verbosity::Debug {
        eprintln!("[debug] {}", message);
    }
}

/// Print an error message (always shown).
pub fn error(message: impl Display) {
    eprintln!("error: {}", message);
}

/// Write a warning line to `err` with the warning prefix.
pub fn warn_to(err: &mut dyn Write, message: impl Display) -> io::Result<()> {
    writeln!(err, "warning: {}", message)
}

/// Stdout, or a sink in quiet mode.
pub fn stdout(verbosity: Verbosity) -> Box<dyn Write> {
    if verbosity.is_quiet() {
        Box::new(io::sink())
    } else {
        Box::new(io::stdout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_wins_over_debug() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn warnings_carry_prefix() {
        let mut err = Vec::new();
        warn_to(&mut err, "image import failed").expect("write");
        assert_eq!(err, b"warning: image import failed\n");
    }
}
