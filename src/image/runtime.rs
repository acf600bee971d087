//! image::runtime
//!
//! The container runtime inside the VM, as seen by the image cache.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::core::process::{CommandRunner, Invocation, ProcessOutput};

/// Errors from the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to run '{command}': {source}")]
    Spawn { command: String, source: io::Error },

    #[error("'{command}' exited with code {code}: {stderr}")]
    Failed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("image '{0}' not found")]
    NotFound(String),

    #[error("failed to stream image data: {0}")]
    Stream(#[from] io::Error),
}

/// Operations the image cache needs from a container runtime.
pub trait ContainerRuntime: Send + Sync {
    /// Every `name:tag` present in the runtime.
    fn images(&self) -> Result<BTreeSet<String>, RuntimeError>;

    /// Fetch an image from its registry.
    fn pull(&self, image: &str) -> Result<(), RuntimeError>;

    /// Write an image archive to `sink`.
    fn save(&self, image: &str, sink: &mut dyn Write) -> Result<(), RuntimeError>;

    /// Load an image archive from `source`.
    fn load(&self, source: &mut dyn Read) -> Result<(), RuntimeError>;
}

/// The `docker` CLI on the host, pointed at the VM's daemon through the
/// environment from `Driver::docker_env`. Every call goes through the
/// [`CommandRunner`], so it shares the runner's timeout.
#[derive(Clone)]
pub struct DockerCli {
    binary: String,
    env: BTreeMap<String, String>,
    runner: Arc<dyn CommandRunner>,
}

impl DockerCli {
    pub fn new(env: BTreeMap<String, String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: "docker".to_string(),
            env,
            runner,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn invocation(&self, args: &[&str]) -> Invocation {
        Invocation::new(self.binary.clone())
            .args(args.iter().copied())
            .envs(&self.env)
    }

    fn checked(
        invocation: &Invocation,
        result: io::Result<ProcessOutput>,
    ) -> Result<ProcessOutput, RuntimeError> {
        let output = result.map_err(|source| RuntimeError::Spawn {
            command: invocation.display(),
            source,
        })?;
        if !output.success() {
            return Err(RuntimeError::Failed {
                command: invocation.display(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let invocation = self.invocation(args);
        let result = self.runner.output(&invocation);
        Self::checked(&invocation, result).map(|output| output.stdout)
    }
}

impl ContainerRuntime for DockerCli {
    fn images(&self) -> Result<BTreeSet<String>, RuntimeError> {
        let stdout = self.run(&["images", "--format", "{{.Repository}}:{{.Tag}}"])?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.contains("<none>"))
            .map(str::to_string)
            .collect())
    }

    fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.run(&["pull", image]).map(|_| ())
    }

    fn save(&self, image: &str, sink: &mut dyn Write) -> Result<(), RuntimeError> {
        let invocation = self.invocation(&["save", image]);
        let result = self.runner.stream(&invocation, None, Some(sink));
        Self::checked(&invocation, result).map(|_| ())
    }

    fn load(&self, source: &mut dyn Read) -> Result<(), RuntimeError> {
        let invocation = self.invocation(&["load"]);
        let result = self.runner.stream(&invocation, Some(source), None);
        Self::checked(&invocation, result).map(|_| ())
    }
}

/// In-memory runtime for tests.
///
/// Archives are `name\n` followed by the image payload, so a saved image
/// loads back under the same name.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuntime {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    images: BTreeMap<String, Vec<u8>>,
    registry: BTreeMap<String, Vec<u8>>,
    pulls: Vec<String>,
    loads: Vec<String>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// An image already present in the runtime.
    pub fn with_image(self, name: &str, payload: &[u8]) -> Self {
        self.inner
            .lock()
            .unwrap()
            .images
            .insert(name.to_string(), payload.to_vec());
        self
    }

    /// An image that `pull` can fetch.
    pub fn with_remote(self, name: &str, payload: &[u8]) -> Self {
        self.inner
            .lock()
            .unwrap()
            .registry
            .insert(name.to_string(), payload.to_vec());
        self
    }

    pub fn remove_image(&self, name: &str) {
        self.inner.lock().unwrap().images.remove(name);
    }

    pub fn payload(&self, name: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().images.get(name).cloned()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.inner.lock().unwrap().pulls.clone()
    }

    pub fn loads(&self) -> Vec<String> {
        self.inner.lock().unwrap().loads.clone()
    }
}

impl ContainerRuntime for MemoryRuntime {
    fn images(&self) -> Result<BTreeSet<String>, RuntimeError> {
        Ok(self.inner.lock().unwrap().images.keys().cloned().collect())
    }

    fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.pulls.push(image.to_string());
        let payload = inner
            .registry
            .get(image)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(image.to_string()))?;
        inner.images.insert(image.to_string(), payload);
        Ok(())
    }

    fn save(&self, image: &str, sink: &mut dyn Write) -> Result<(), RuntimeError> {
        let payload = self
            .payload(image)
            .ok_or_else(|| RuntimeError::NotFound(image.to_string()))?;
        sink.write_all(image.as_bytes())?;
        sink.write_all(b"\n")?;
        sink.write_all(&payload)?;
        Ok(())
    }

    fn load(&self, source: &mut dyn Read) -> Result<(), RuntimeError> {
        let mut archive = Vec::new();
        source.read_to_end(&mut archive)?;
        let split = archive
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| {
                RuntimeError::Stream(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "archive has no image name",
                ))
            })?;
        let name = String::from_utf8_lossy(&archive[..split]).into_owned();
        let mut inner = self.inner.lock().unwrap();
        inner.loads.push(name.clone());
        inner.images.insert(name, archive[split + 1..].to_vec());
        Ok(())
    }
}
