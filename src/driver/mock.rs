//! driver::mock
//!
//! In-memory VM driver for deterministic testing.
//!
//! # Design
//!
//! `MockDriver` keeps machines in memory, answers SSH commands from a
//! script of canned responses, records every call, and can be told to fail
//! specific operations a given number of times (to exercise retries).
//!
//! # Example
//!
//! ```
//! use minicluster::driver::mock::{MockDriver, FailOn};
//! use minicluster::driver::{Driver, VmStatus};
//!
//! let driver = MockDriver::new().fail_on(FailOn::Create { times: 1 });
//! let config = MockDriver::config("minicluster");
//!
//! assert!(driver.create(&config).is_err());
//! driver.create(&config).unwrap();
//! assert_eq!(driver.status("minicluster").unwrap(), VmStatus::Running);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

use super::{Driver, DriverError, MachineConfig, SshOutput, VmStatus};

/// Mock driver for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping.
#[derive(Debug, Clone)]
pub struct MockDriver {
    inner: Arc<Mutex<MockDriverInner>>,
}

#[derive(Debug)]
struct MockDriverInner {
    machines: HashMap<String, MockVm>,
    ip: Ipv4Addr,
    fail_on: Vec<FailOn>,
    ssh_script: Vec<(String, SshOutput)>,
    operations: Vec<MockOperation>,
}

#[derive(Debug, Clone)]
struct MockVm {
    status: VmStatus,
}

/// Which operation should fail, and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailOn {
    /// Fail the next `times` create calls.
    Create { times: u32 },
    /// Fail the next `times` create calls after registering a stopped
    /// machine, like a hypervisor that died halfway through.
    PartialCreate { times: u32 },
    /// Fail every delete call.
    Delete,
    /// Fail every start call.
    Start,
    /// Fail every stop call.
    Stop,
    /// Fail every IP lookup.
    Ip,
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    Create { name: String, memory_mib: u64, disk_mb: u64 },
    Start { name: String },
    Stop { name: String },
    Delete { name: String },
    Ssh { name: String, command: String },
}

impl MockOperation {
    /// True for calls that change VM state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, MockOperation::Ssh { .. })
    }
}

impl MockDriver {
    /// Create a mock with no machines.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockDriverInner {
                machines: HashMap::new(),
                ip: Ipv4Addr::new(192, 168, 42, 10),
                fail_on: Vec::new(),
                ssh_script: Vec::new(),
                operations: Vec::new(),
            })),
        }
    }

    /// Create a mock with one machine already in `status`.
    pub fn with_machine(name: &str, status: VmStatus) -> Self {
        let driver = Self::new();
        driver
            .inner
            .lock()
            .unwrap()
            .machines
            .insert(name.to_string(), MockVm { status });
        driver
    }

    /// A minimal machine config for tests.
    pub fn config(name: &str) -> MachineConfig {
        MachineConfig {
            name: name.to_string(),
            vm_driver: "kvm".to_string(),
            iso_url: "b2d".to_string(),
            cpus: 2,
            memory_mib: 2048,
            disk_mb: 20000,
            host_only_cidr: None,
            docker_env: Vec::new(),
            docker_opt: Vec::new(),
            insecure_registry: Vec::new(),
            registry_mirror: Vec::new(),
        }
    }

    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.inner.lock().unwrap().fail_on.push(fail_on);
        self
    }

    /// Answer SSH commands containing `fragment` with `output`.
    ///
    /// Earlier registrations win. Unmatched commands succeed with empty
    /// output.
    pub fn on_ssh(self, fragment: &str, output: SshOutput) -> Self {
        self.inner
            .lock()
            .unwrap()
            .ssh_script
            .push((fragment.to_string(), output));
        self
    }

    pub fn with_ip(self, ip: Ipv4Addr) -> Self {
        self.inner.lock().unwrap().ip = ip;
        self
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Commands run over SSH, in order.
    pub fn ssh_commands(&self) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter_map(|op| match op {
                MockOperation::Ssh { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    fn record(&self, op: MockOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    /// Consume one failure matching `pred`, if configured.
    fn should_fail(&self, pred: impl Fn(&FailOn) -> bool) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(index) = inner.fail_on.iter().position(|f| pred(f)) else {
            return false;
        };
        if let FailOn::Create { times } | FailOn::PartialCreate { times } =
            &mut inner.fail_on[index]
        {
            *times -= 1;
            if *times == 0 {
                inner.fail_on.remove(index);
            }
        }
        true
    }

    fn require(&self, name: &str) -> Result<(), DriverError> {
        if self.inner.lock().unwrap().machines.contains_key(name) {
            Ok(())
        } else {
            Err(DriverError::NotFound(name.to_string()))
        }
    }

    fn set_status(&self, name: &str, status: VmStatus) {
        if let Some(vm) = self.inner.lock().unwrap().machines.get_mut(name) {
            vm.status = status;
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MockDriver {
    fn exists(&self, name: &str) -> Result<bool, DriverError> {
        Ok(self.inner.lock().unwrap().machines.contains_key(name))
    }

    fn create(&self, config: &MachineConfig) -> Result<(), DriverError> {
        self.record(MockOperation::Create {
            name: config.name.clone(),
            memory_mib: config.memory_mib,
            disk_mb: config.disk_mb,
        });
        if self.should_fail(|f| matches!(f, FailOn::Create { .. })) {
            return Err(DriverError::failed("create", &config.name, "injected failure"));
        }
        if self.should_fail(|f| matches!(f, FailOn::PartialCreate { .. })) {
            self.inner.lock().unwrap().machines.insert(
                config.name.clone(),
                MockVm {
                    status: VmStatus::Stopped,
                },
            );
            return Err(DriverError::failed("create", &config.name, "injected failure"));
        }
        self.inner.lock().unwrap().machines.insert(
            config.name.clone(),
            MockVm {
                status: VmStatus::Running,
            },
        );
        Ok(())
    }

    fn start(&self, name: &str) -> Result<(), DriverError> {
        self.record(MockOperation::Start {
            name: name.to_string(),
        });
        self.require(name)?;
        if self.should_fail(|f| *f == FailOn::Start) {
            return Err(DriverError::failed("start", name, "injected failure"));
        }
        self.set_status(name, VmStatus::Running);
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<(), DriverError> {
        self.record(MockOperation::Stop {
            name: name.to_string(),
        });
        self.require(name)?;
        if self.should_fail(|f| *f == FailOn::Stop) {
            return Err(DriverError::failed("stop", name, "injected failure"));
        }
        self.set_status(name, VmStatus::Stopped);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), DriverError> {
        self.record(MockOperation::Delete {
            name: name.to_string(),
        });
        self.require(name)?;
        if self.should_fail(|f| *f == FailOn::Delete) {
            return Err(DriverError::failed("delete", name, "injected failure"));
        }
        self.inner.lock().unwrap().machines.remove(name);
        Ok(())
    }

    fn status(&self, name: &str) -> Result<VmStatus, DriverError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .machines
            .get(name)
            .map(|vm| vm.status)
            .unwrap_or(VmStatus::DoesNotExist))
    }

    fn ip(&self, name: &str) -> Result<Ipv4Addr, DriverError> {
        self.require(name)?;
        if self.should_fail(|f| *f == FailOn::Ip) {
            return Err(DriverError::failed("ip", name, "injected failure"));
        }
        Ok(self.inner.lock().unwrap().ip)
    }

    fn ssh(&self, name: &str, command: &str) -> Result<SshOutput, DriverError> {
        self.record(MockOperation::Ssh {
            name: name.to_string(),
            command: command.to_string(),
        });
        self.require(name)?;
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .ssh_script
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn docker_env(&self, name: &str) -> Result<BTreeMap<String, String>, DriverError> {
        self.require(name)?;
        let ip = self.inner.lock().unwrap().ip;
        let mut env = BTreeMap::new();
        env.insert("DOCKER_HOST".to_string(), format!("tcp://{}:2376", ip));
        env.insert("DOCKER_TLS_VERIFY".to_string(), "1".to_string());
        Ok(env)
    }
}
