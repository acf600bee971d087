//! core::process
//!
//! Subprocess execution behind a trait.
//!
//! # Architecture
//!
//! Everything that shells out on the host (the cached `oc`, the container
//! runtime CLI, `virsh`, the detached image exporter) goes through
//! [`CommandRunner`], so the start pipeline can be driven end to end in
//! tests with a scripted runner instead of real binaries.
//!
//! # Invariants
//!
//! - A [`SystemRunner`] built with a timeout kills any bounded invocation
//!   still running at the deadline and reports `ErrorKind::TimedOut`
//! - Only invocations marked [`Invocation::unbounded`] run without a deadline
//! - stdout and stderr are drained concurrently, so a child filling one
//!   pipe never blocks progress on the other

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// How often a bounded child is polled for exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Exempt from the runner's timeout.
    pub unbounded: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            unbounded: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Run without a deadline. Only cluster bring-up needs this.
    pub fn unbounded(mut self) -> Self {
        self.unbounded = true;
        self
    }

    /// Shell-ish rendering for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code; `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// stdout followed by stderr, for captured logs.
    pub fn combined(&self) -> String {
        let mut log = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&self.stderr);
        }
        log
    }
}

/// Runs host programs.
pub trait CommandRunner: Send + Sync {
    /// Run to completion, capturing output.
    fn output(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;

    /// Run to completion with stdin fed from `input` and stdout written to
    /// `sink`. Only stderr is captured in the returned output.
    fn stream(
        &self,
        invocation: &Invocation,
        input: Option<&mut dyn Read>,
        sink: Option<&mut dyn Write>,
    ) -> io::Result<ProcessOutput>;

    /// Start a process with null stdio and do not wait for it.
    fn spawn_detached(&self, invocation: &Invocation) -> io::Result<()>;
}

/// Error returned when a child outlives its deadline.
pub fn timed_out(invocation: &Invocation, timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!(
            "'{}' did not finish within {}s",
            invocation.display(),
            timeout.as_secs_f64()
        ),
    )
}

/// Runs real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    /// Kill bounded invocations that run longer than `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    fn command(invocation: &Invocation) -> Command {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).envs(&invocation.env);
        command
    }

    fn deadline_for(&self, invocation: &Invocation) -> Option<Duration> {
        if invocation.unbounded {
            None
        } else {
            self.timeout
        }
    }

    /// Spawn, pump every pipe, and reap the child. stdout goes to `sink`
    /// when given and is captured otherwise.
    ///
    /// When both `input` and `sink` are given, `input` is written in full
    /// before `sink` is filled.
    fn run(
        &self,
        invocation: &Invocation,
        input: Option<&mut dyn Read>,
        sink: Option<&mut dyn Write>,
    ) -> io::Result<ProcessOutput> {
        let timeout = self.deadline_for(invocation);
        debug!(command = %invocation.display(), ?timeout, "running");

        let mut child = Self::command(invocation)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let reaper = thread::spawn(move || reap(child, timeout));
        let errors = thread::spawn(move || drain(stderr));
        let (captured, pumped) = match sink {
            Some(sink) => (None, pump(input, stdin, stdout, sink)),
            None => {
                let captured = thread::spawn(move || drain(stdout));
                (Some(captured), feed(input, stdin))
            }
        };

        let reaped = joined(reaper)?;
        if reaped.timed_out {
            let timeout = timeout.unwrap_or_default();
            warn!(command = %invocation.display(), ?timeout, "killed after timeout");
            // Readers still blocked on a pipe held open by a grandchild are
            // left to finish on their own.
            return Err(timed_out(invocation, timeout));
        }

        let stdout = match captured {
            Some(reader) => joined(reader)?,
            None => Vec::new(),
        };
        let stderr = joined(errors)?;
        let output = ProcessOutput {
            code: reaped.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };
        // A child that failed usually broke the pipe too; its exit code and
        // stderr say more than the pipe error.
        if output.success() {
            pumped?;
        } else if let Err(e) = pumped {
            debug!(error = %e, "pipe error from failed child");
        }
        Ok(output)
    }
}

struct Reaped {
    status: ExitStatus,
    timed_out: bool,
}

/// Wait for `child`, killing it once `timeout` has passed.
fn reap(mut child: Child, timeout: Option<Duration>) -> io::Result<Reaped> {
    let Some(timeout) = timeout else {
        return child.wait().map(|status| Reaped {
            status,
            timed_out: false,
        });
    };
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Reaped {
                status,
                timed_out: false,
            });
        }
        if Instant::now() >= deadline {
            if let Err(e) = child.kill() {
                debug!(error = %e, "kill failed; child may have just exited");
            }
            let status = child.wait()?;
            return Ok(Reaped {
                status,
                timed_out: true,
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain(pipe: Option<impl Read>) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

/// Copy `input` into the child's stdin, then close it.
fn feed(input: Option<&mut dyn Read>, stdin: Option<impl Write>) -> io::Result<()> {
    if let (Some(input), Some(mut stdin)) = (input, stdin) {
        io::copy(input, &mut stdin)?;
        stdin.flush()?;
    }
    Ok(())
}

fn pump(
    input: Option<&mut dyn Read>,
    stdin: Option<impl Write>,
    stdout: Option<impl Read>,
    sink: &mut dyn Write,
) -> io::Result<()> {
    feed(input, stdin)?;
    if let Some(mut stdout) = stdout {
        io::copy(&mut stdout, sink)?;
    }
    sink.flush()
}

fn joined<T>(handle: thread::JoinHandle<io::Result<T>>) -> io::Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "pipe thread panicked")))
}

impl CommandRunner for SystemRunner {
    fn output(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        self.run(invocation, None, None)
    }

    fn stream(
        &self,
        invocation: &Invocation,
        input: Option<&mut dyn Read>,
        sink: Option<&mut dyn Write>,
    ) -> io::Result<ProcessOutput> {
        self.run(invocation, input, sink)
    }

    fn spawn_detached(&self, invocation: &Invocation) -> io::Result<()> {
        debug!(command = %invocation.display(), "spawning detached");
        Self::command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map(|_child| ())
    }
}

/// Scripted runner for tests.
///
/// Invocations whose rendering contains a registered fragment get the
/// matching canned output; earlier registrations win. Anything else
/// succeeds with empty output. Every call is recorded, and so is every
/// byte fed to a streamed invocation.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    inner: Arc<Mutex<ScriptedInner>>,
}

#[derive(Debug, Default)]
struct ScriptedInner {
    script: Vec<(String, ProcessOutput)>,
    missing: Vec<String>,
    stalled: Vec<String>,
    calls: Vec<Invocation>,
    inputs: Vec<Vec<u8>>,
    detached: Vec<Invocation>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer invocations containing `fragment` with `output`.
    pub fn on(self, fragment: &str, output: ProcessOutput) -> Self {
        self.inner
            .lock()
            .unwrap()
            .script
            .push((fragment.to_string(), output));
        self
    }

    /// Answer with exit code 0 and `stdout`.
    pub fn on_ok(self, fragment: &str, stdout: &str) -> Self {
        self.on(
            fragment,
            ProcessOutput {
                code: 0,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        )
    }

    /// Make `program` fail to start, as if it were not installed.
    pub fn missing_program(self, program: &str) -> Self {
        self.inner.lock().unwrap().missing.push(program.to_string());
        self
    }

    /// Make invocations containing `fragment` hang until killed, the way
    /// a [`SystemRunner`] reports them once the deadline passes.
    pub fn stall(self, fragment: &str) -> Self {
        self.inner.lock().unwrap().stalled.push(fragment.to_string());
        self
    }

    /// Every captured invocation, in order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Bytes fed to streamed invocations, one entry per call with input.
    pub fn inputs(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().inputs.clone()
    }

    /// Every detached spawn, in order.
    pub fn detached(&self) -> Vec<Invocation> {
        self.inner.lock().unwrap().detached.clone()
    }

    fn answer(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(invocation.clone());
        if inner.missing.contains(&invocation.program) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: not found", invocation.program),
            ));
        }
        let line = invocation.display();
        if inner.stalled.iter().any(|f| line.contains(f.as_str())) {
            return Err(timed_out(invocation, Duration::ZERO));
        }
        Ok(inner
            .script
            .iter()
            .find(|(fragment, _)| line.contains(fragment.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

impl CommandRunner for ScriptedRunner {
    fn output(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        self.answer(invocation)
    }

    fn stream(
        &self,
        invocation: &Invocation,
        input: Option<&mut dyn Read>,
        sink: Option<&mut dyn Write>,
    ) -> io::Result<ProcessOutput> {
        let mut output = self.answer(invocation)?;
        if let Some(input) = input {
            let mut bytes = Vec::new();
            input.read_to_end(&mut bytes)?;
            self.inner.lock().unwrap().inputs.push(bytes);
        }
        if let Some(sink) = sink {
            sink.write_all(output.stdout.as_bytes())?;
            output.stdout.clear();
        }
        Ok(output)
    }

    fn spawn_detached(&self, invocation: &Invocation) -> io::Result<()> {
        self.inner.lock().unwrap().detached.push(invocation.clone());
        Ok(())
    }
}
