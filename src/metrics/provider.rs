//! The seam between the collection engines and whatever reads the OS.
//!
//! Every accessor either returns a record or fails with a [`ProviderError`];
//! retry and flattening policy live in the engines, never here.

use std::path::Path;

use super::error::ProviderError;
use super::types::{
    CtxSwitches, DiskIoCounters, DiskUsage, MemoryInfo, NetIoCounters, PlatformInfo,
    SocketConnection, SwapMemory, VirtualMemory,
};

/// Host-wide metric accessors.
///
/// CPU sampling is interval based: each call reports usage since the
/// previous call of the same accessor, so the aggregate and per-core
/// readings keep independent baselines.
pub trait MetricsProvider: Send {
    fn cpu_percent(&mut self) -> Result<f64, ProviderError>;
    fn cpu_percent_per_core(&mut self) -> Result<Vec<f64>, ProviderError>;
    fn virtual_memory(&mut self) -> Result<VirtualMemory, ProviderError>;
    fn swap_memory(&mut self) -> Result<SwapMemory, ProviderError>;
    fn disk_usage(&mut self, path: &Path) -> Result<DiskUsage, ProviderError>;
    fn disk_io_counters(&mut self) -> Result<DiskIoCounters, ProviderError>;
    fn net_io_counters(&mut self) -> Result<NetIoCounters, ProviderError>;
    fn pids(&mut self) -> Result<Vec<u32>, ProviderError>;
    fn net_connections(&mut self) -> Result<Vec<SocketConnection>, ProviderError>;
    fn platform(&mut self) -> Result<PlatformInfo, ProviderError>;
}

/// Resolves process ids into live handles.
pub trait ProcessProvider {
    type Handle: ProcessHandle;

    /// Fails with [`ProviderError::NoSuchProcess`] when `pid` is not alive.
    fn resolve(&self, pid: u32) -> Result<Self::Handle, ProviderError>;
}

/// A reference to a process that may exit at any moment; every accessor
/// can fail because of that.
pub trait ProcessHandle {
    fn pid(&self) -> u32;
    fn cpu_percent(&mut self) -> Result<f64, ProviderError>;
    fn memory_percent(&mut self) -> Result<f64, ProviderError>;
    fn memory_info(&mut self) -> Result<MemoryInfo, ProviderError>;
    fn num_ctx_switches(&mut self) -> Result<CtxSwitches, ProviderError>;
    fn num_fds(&mut self) -> Result<u64, ProviderError>;
    fn is_running(&mut self) -> Result<bool, ProviderError>;
    fn children(&mut self) -> Result<Vec<u32>, ProviderError>;
    fn threads(&mut self) -> Result<Vec<u32>, ProviderError>;
    fn cmdline(&mut self) -> Result<Vec<String>, ProviderError>;
}
