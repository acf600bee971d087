//! engine::exit
//!
//! Scoped cleanup actions for one pipeline run.
//!
//! # Invariants
//!
//! - Handlers run exactly once, in reverse registration order
//! - A panicking handler is logged and the remaining handlers still run
//! - Dropping the value runs whatever has not run yet, so every exit path
//!   out of the owning scope (success, `?`, panic unwinding) cleans up
//!
//! # Example
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use minicluster::engine::exit::ExitHandlers;
//!
//! let log = Arc::new(Mutex::new(Vec::new()));
//! {
//!     let mut handlers = ExitHandlers::new();
//!     let first = Arc::clone(&log);
//!     handlers.register("first", move || first.lock().unwrap().push("first"));
//!     let second = Arc::clone(&log);
//!     handlers.register("second", move || second.lock().unwrap().push("second"));
//! }
//! assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
//! ```

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

type Handler = Box<dyn FnOnce() + Send>;

/// Cleanup actions owned by the orchestrator.
#[derive(Default)]
pub struct ExitHandlers {
    handlers: Vec<(String, Handler)>,
}

impl ExitHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cleanup action.
    pub fn register(&mut self, name: impl Into<String>, handler: impl FnOnce() + Send + 'static) {
        self.handlers.push((name.into(), Box::new(handler)));
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every pending handler now, newest first.
    pub fn run_all(&mut self) {
        while let Some((name, handler)) = self.handlers.pop() {
            debug!(handler = %name, "running exit handler");
            if panic::catch_unwind(AssertUnwindSafe(handler)).is_err() {
                error!(handler = %name, "exit handler panicked");
            }
        }
    }
}

impl Drop for ExitHandlers {
    fn drop(&mut self) {
        self.run_all();
    }
}

impl std::fmt::Debug for ExitHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(name, _)| name))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn panicking_handler_does_not_stop_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = ExitHandlers::new();
        let a = Arc::clone(&log);
        handlers.register("a", move || a.lock().unwrap().push("a"));
        handlers.register("boom", || panic!("handler failure"));
        let c = Arc::clone(&log);
        handlers.register("c", move || c.lock().unwrap().push("c"));

        handlers.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["c", "a"]);
        assert!(handlers.is_empty());
    }

    #[test]
    fn handlers_run_once() {
        let count = Arc::new(Mutex::new(0));
        {
            let mut handlers = ExitHandlers::new();
            let c = Arc::clone(&count);
            handlers.register("count", move || *c.lock().unwrap() += 1);
            handlers.run_all();
        }
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
