//! ui::progress
//!
//! A dot printed every few seconds while a long subprocess runs.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(100);

/// Running progress indicator. Stops when finished or dropped.
pub struct Progress {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Progress {
    /// Print `.` to stdout every `interval` until stopped.
    ///
    /// A disabled indicator prints nothing.
    pub fn start(interval: Duration, enabled: bool) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        if !enabled {
            return Self { stop, handle: None };
        }
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut last = Instant::now();
            while !flag.load(Ordering::Relaxed) {
                thread::sleep(POLL);
                if last.elapsed() >= interval {
                    let mut out = io::stdout();
                    let _ = write!(out, ".");
                    let _ = out.flush();
                    last = Instant::now();
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn finish(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.halt();
    }
}
