//! ui::prompts
//!
//! Interactive confirmations.
//!
//! # Design
//!
//! Prompts are only shown in interactive mode. In non-interactive mode,
//! operations requiring user input must either have defaults or fail
//! with a clear error message.

use std::io::{self, BufRead, Write};

use thiserror::Error;

/// Errors from prompts.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt cancelled by user")]
    Cancelled,

    #[error("not in interactive mode")]
    NotInteractive,

    #[error("IO error: {0}")]
    IoError(String),
}

/// Ask a yes/no question on the terminal.
///
/// An empty answer takes `default`. End of input counts as cancellation.
pub fn confirm(message: &str, default: bool, interactive: bool) -> Result<bool, PromptError> {
    if !interactive {
        return Err(PromptError::NotInteractive);
    }
    let stdin = io::stdin();
    let mut input = stdin.lock();
    confirm_with(message, default, &mut input, &mut io::stdout())
}

/// [`confirm`] over arbitrary streams.
pub fn confirm_with(
    message: &str,
    default: bool,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<bool, PromptError> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    let io_error = |e: io::Error| PromptError::IoError(e.to_string());
    loop {
        write!(out, "{} {}: ", message, hint).map_err(io_error)?;
        out.flush().map_err(io_error)?;

        let mut line = String::new();
        if input.read_line(&mut line).map_err(io_error)? == 0 {
            return Err(PromptError::Cancelled);
        }
        match line.trim().to_ascii_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(out, "Please answer 'y' or 'n'.").map_err(io_error)?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask(answers: &str, default: bool) -> Result<bool, PromptError> {
        let mut input = answers.as_bytes();
        let mut out = Vec::new();
        confirm_with("Delete?", default, &mut input, &mut out)
    }

    #[test]
    fn confirm_requires_interactive() {
        assert!(matches!(
            confirm("Delete?", false, false),
            Err(PromptError::NotInteractive)
        ));
    }

    #[test]
    fn answers_are_case_insensitive() {
        assert!(ask("Y\n", false).expect("answer"));
        assert!(!ask("no\n", true).expect("answer"));
    }

    #[test]
    fn empty_answer_takes_default() {
        assert!(ask("\n", true).expect("answer"));
        assert!(!ask("\n", false).expect("answer"));
    }

    #[test]
    fn unrecognised_answer_asks_again() {
        assert!(ask("maybe\nyes\n", false).expect("answer"));
    }

    #[test]
    fn end_of_input_cancels() {
        assert!(matches!(ask("", false), Err(PromptError::Cancelled)));
    }
}
