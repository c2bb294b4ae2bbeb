//! Scripted in-memory providers for tests and dry runs.
//!
//! Clones share state, so a test can keep one clone to inject failures and
//! inspect calls while the engine owns another.
//!
//! ```
//! use host_metrics::config::MenuConfig;
//! use host_metrics::metrics::{HostMetrics, MockProvider};
//!
//! let provider = MockProvider::new();
//! provider.fail_times("virtual_memory", 1);
//! let mut engine = HostMetrics::new(provider.clone(), MenuConfig::default());
//! assert!(engine.collect().is_ok());
//! assert_eq!(provider.calls("virtual_memory"), 2);
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::{ProviderError, SensorError};
use super::provider::{MetricsProvider, ProcessHandle, ProcessProvider};
use super::sensors::SensorSource;
use super::types::{
    CtxSwitches, DiskIoCounters, DiskUsage, MemoryInfo, NetIoCounters, PlatformInfo,
    SocketConnection, SwapMemory, VirtualMemory,
};

#[derive(Clone, Copy, Debug)]
enum Failure {
    Times(u32),
    Always,
}

#[derive(Default)]
struct Script {
    failures: HashMap<String, Failure>,
    calls: HashMap<String, u32>,
    log: Vec<String>,
}

impl Script {
    /// Records a call to `method` and decides whether it fails.
    fn enter(&mut self, method: &str) -> Result<(), ProviderError> {
        *self.calls.entry(method.to_string()).or_default() += 1;
        self.log.push(method.to_string());

        let fail = match self.failures.get_mut(method) {
            Some(Failure::Always) => true,
            Some(Failure::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        };
        if fail {
            Err(ProviderError::Unavailable(format!("scripted {} failure", method)))
        } else {
            Ok(())
        }
    }
}

#[derive(Clone, Default)]
struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    fn lock(&self) -> MutexGuard<'_, Script> {
        match self.0.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn enter(&self, method: &str) -> Result<(), ProviderError> {
        self.lock().enter(method)
    }

    fn fail_times(&self, method: &str, times: u32) {
        self.lock()
            .failures
            .insert(method.to_string(), Failure::Times(times));
    }

    fn fail_always(&self, method: &str) {
        self.lock()
            .failures
            .insert(method.to_string(), Failure::Always);
    }

    fn recover(&self, method: &str) {
        self.lock().failures.remove(method);
    }

    fn calls(&self, method: &str) -> u32 {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    fn call_log(&self) -> Vec<String> {
        self.lock().log.clone()
    }
}

/// Host provider returning fixed values. Method names used for scripting
/// match the [`MetricsProvider`] methods.
#[derive(Clone, Default)]
pub struct MockProvider {
    script: ScriptHandle,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` calls to `method`.
    pub fn fail_times(&self, method: &str, times: u32) {
        self.script.fail_times(method, times);
    }

    pub fn fail_always(&self, method: &str) {
        self.script.fail_always(method);
    }

    pub fn recover(&self, method: &str) {
        self.script.recover(method);
    }

    pub fn calls(&self, method: &str) -> u32 {
        self.script.calls(method)
    }

    /// Every call so far, in order.
    pub fn call_log(&self) -> Vec<String> {
        self.script.call_log()
    }
}

impl MetricsProvider for MockProvider {
    fn cpu_percent(&mut self) -> Result<f64, ProviderError> {
        self.script.enter("cpu_percent")?;
        Ok(12.5)
    }

    fn cpu_percent_per_core(&mut self) -> Result<Vec<f64>, ProviderError> {
        self.script.enter("cpu_percent_per_core")?;
        Ok(vec![10.0, 15.0])
    }

    fn virtual_memory(&mut self) -> Result<VirtualMemory, ProviderError> {
        self.script.enter("virtual_memory")?;
        Ok(VirtualMemory {
            total: 8_000,
            available: 6_000,
            percent: 25.0,
            used: 2_000,
            free: 5_000,
        })
    }

    fn swap_memory(&mut self) -> Result<SwapMemory, ProviderError> {
        self.script.enter("swap_memory")?;
        Ok(SwapMemory {
            total: 1_000,
            used: 0,
            free: 1_000,
            percent: 0.0,
        })
    }

    fn disk_usage(&mut self, path: &Path) -> Result<DiskUsage, ProviderError> {
        self.script.enter("disk_usage")?;
        if path != Path::new("/") {
            return Err(ProviderError::Unavailable(format!(
                "no mounted filesystem contains {}",
                path.display()
            )));
        }
        Ok(DiskUsage {
            total: 100,
            used: 40,
            free: 60,
            percent: 40.0,
        })
    }

    fn disk_io_counters(&mut self) -> Result<DiskIoCounters, ProviderError> {
        self.script.enter("disk_io_counters")?;
        Ok(DiskIoCounters {
            read_count: 10,
            write_count: 20,
            read_bytes: 5_120,
            write_bytes: 10_240,
            ..DiskIoCounters::default()
        })
    }

    fn net_io_counters(&mut self) -> Result<NetIoCounters, ProviderError> {
        self.script.enter("net_io_counters")?;
        Ok(NetIoCounters {
            bytes_sent: 300,
            bytes_recv: 700,
            packets_sent: 3,
            packets_recv: 7,
            errin: 0,
            errout: 0,
        })
    }

    fn pids(&mut self) -> Result<Vec<u32>, ProviderError> {
        self.script.enter("pids")?;
        Ok(vec![1, 42, 4242])
    }

    fn net_connections(&mut self) -> Result<Vec<SocketConnection>, ProviderError> {
        self.script.enter("net_connections")?;
        Ok(vec![SocketConnection {
            family: "inet".to_string(),
            kind: "tcp".to_string(),
            laddr: "127.0.0.1:8080".to_string(),
            raddr: String::new(),
            status: "LISTEN".to_string(),
        }])
    }

    fn platform(&mut self) -> Result<PlatformInfo, ProviderError> {
        self.script.enter("platform")?;
        Ok(PlatformInfo {
            machine: "x86_64".to_string(),
            system: "Linux".to_string(),
            os_version: "12".to_string(),
            platform: "Linux 12".to_string(),
            kernel_version: "6.1.0".to_string(),
            hostname: "mock-host".to_string(),
            processor: "Mock CPU".to_string(),
            cores: 2,
        })
    }
}

/// Fixed sensor text, or a scripted failure.
pub struct MockSensors {
    output: Option<String>,
}

impl MockSensors {
    pub fn text(text: impl Into<String>) -> Self {
        MockSensors {
            output: Some(text.into()),
        }
    }

    pub fn failing() -> Self {
        MockSensors { output: None }
    }
}

impl SensorSource for MockSensors {
    fn read(&mut self) -> Result<String, SensorError> {
        self.output.clone().ok_or_else(|| SensorError::Exit {
            command: "sensors".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "No sensors found!".to_string(),
        })
    }
}

/// One scripted process.
#[derive(Clone, Debug)]
pub struct MockProcess {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory: MemoryInfo,
    pub ctx_switches: CtxSwitches,
    pub num_fds: u64,
    pub children: Vec<u32>,
    pub threads: Vec<u32>,
    pub cmdline: Vec<String>,
}

impl Default for MockProcess {
    fn default() -> Self {
        MockProcess {
            cpu_percent: 1.5,
            memory_percent: 0.5,
            memory: MemoryInfo {
                rss: 4_096,
                vms: 65_536,
            },
            ctx_switches: CtxSwitches {
                voluntary: 10,
                involuntary: 2,
            },
            num_fds: 4,
            children: Vec::new(),
            threads: Vec::new(),
            cmdline: vec!["mockd".to_string(), "--serve".to_string()],
        }
    }
}

/// Process provider over a fixed process table. Query failures are scripted
/// per method name (`cpu_percent`, `num_fds`, ...), shared by all handles.
#[derive(Clone, Default)]
pub struct MockProcessProvider {
    processes: Arc<Mutex<HashMap<u32, MockProcess>>>,
    script: ScriptHandle,
}

impl MockProcessProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_process(self, pid: u32, process: MockProcess) -> Self {
        self.insert(pid, process);
        self
    }

    pub fn insert(&self, pid: u32, process: MockProcess) {
        lock(&self.processes).insert(pid, process);
    }

    /// Removes the process, so later queries through live handles fail.
    pub fn kill(&self, pid: u32) {
        lock(&self.processes).remove(&pid);
    }

    pub fn fail_times(&self, method: &str, times: u32) {
        self.script.fail_times(method, times);
    }

    pub fn fail_always(&self, method: &str) {
        self.script.fail_always(method);
    }

    pub fn calls(&self, method: &str) -> u32 {
        self.script.calls(method)
    }
}

impl ProcessProvider for MockProcessProvider {
    type Handle = MockProcessHandle;

    fn resolve(&self, pid: u32) -> Result<MockProcessHandle, ProviderError> {
        self.script.enter("resolve")?;
        if !lock(&self.processes).contains_key(&pid) {
            return Err(ProviderError::NoSuchProcess(pid));
        }
        Ok(MockProcessHandle {
            pid,
            processes: Arc::clone(&self.processes),
            script: self.script.clone(),
        })
    }
}

pub struct MockProcessHandle {
    pid: u32,
    processes: Arc<Mutex<HashMap<u32, MockProcess>>>,
    script: ScriptHandle,
}

impl MockProcessHandle {
    fn with<T>(&self, method: &str, read: impl FnOnce(&MockProcess) -> T) -> Result<T, ProviderError> {
        self.script.enter(method)?;
        lock(&self.processes)
            .get(&self.pid)
            .map(read)
            .ok_or(ProviderError::NoSuchProcess(self.pid))
    }
}

impl ProcessHandle for MockProcessHandle {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn cpu_percent(&mut self) -> Result<f64, ProviderError> {
        self.with("cpu_percent", |p| p.cpu_percent)
    }

    fn memory_percent(&mut self) -> Result<f64, ProviderError> {
        self.with("memory_percent", |p| p.memory_percent)
    }

    fn memory_info(&mut self) -> Result<MemoryInfo, ProviderError> {
        self.with("memory_info", |p| p.memory)
    }

    fn num_ctx_switches(&mut self) -> Result<CtxSwitches, ProviderError> {
        self.with("num_ctx_switches", |p| p.ctx_switches)
    }

    fn num_fds(&mut self) -> Result<u64, ProviderError> {
        self.with("num_fds", |p| p.num_fds)
    }

    fn is_running(&mut self) -> Result<bool, ProviderError> {
        self.script.enter("is_running")?;
        Ok(lock(&self.processes).contains_key(&self.pid))
    }

    fn children(&mut self) -> Result<Vec<u32>, ProviderError> {
        self.with("children", |p| p.children.clone())
    }

    fn threads(&mut self) -> Result<Vec<u32>, ProviderError> {
        self.with("threads", |p| p.threads.clone())
    }

    fn cmdline(&mut self) -> Result<Vec<String>, ProviderError> {
        self.with("cmdline", |p| p.cmdline.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
