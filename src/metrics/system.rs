use std::path::Path;

use log::debug;
use sysinfo::{Disks, Networks, Pid, Process, ProcessStatus, System};

use super::error::ProviderError;
use super::procfs::ProcFs;
use super::provider::{MetricsProvider, ProcessHandle, ProcessProvider};
use super::types::{
    percent, CtxSwitches, DiskIoCounters, DiskUsage, MemoryInfo, NetIoCounters, PlatformInfo,
    SocketConnection, SwapMemory, VirtualMemory,
};

/// Provider reading the live host through `sysinfo`, with `/proc` filling
/// the gaps on Linux.
pub struct SystemProvider {
    // aggregate and per-core CPU keep separate baselines
    aggregate: System,
    per_core: System,
    system: System,
    procfs: ProcFs,
}

impl Default for SystemProvider {
    fn default() -> Self {
        SystemProvider::new()
    }
}

impl SystemProvider {
    pub fn new() -> Self {
        SystemProvider::with_procfs(ProcFs::default())
    }

    pub fn with_procfs(procfs: ProcFs) -> Self {
        let mut aggregate = System::new();
        aggregate.refresh_cpu();
        let mut per_core = System::new();
        per_core.refresh_cpu();

        SystemProvider {
            aggregate,
            per_core,
            system: System::new(),
            procfs,
        }
    }

    fn require_linux(what: &'static str) -> Result<(), ProviderError> {
        if cfg!(target_os = "linux") {
            Ok(())
        } else {
            Err(ProviderError::Unsupported(what))
        }
    }
}

impl MetricsProvider for SystemProvider {
    fn cpu_percent(&mut self) -> Result<f64, ProviderError> {
        self.aggregate.refresh_cpu();
        if self.aggregate.cpus().is_empty() {
            return Err(ProviderError::Unavailable("cpu list empty".to_string()));
        }
        Ok(self.aggregate.global_cpu_info().cpu_usage() as f64)
    }

    fn cpu_percent_per_core(&mut self) -> Result<Vec<f64>, ProviderError> {
        self.per_core.refresh_cpu();
        let cpus = self.per_core.cpus();
        if cpus.is_empty() {
            return Err(ProviderError::Unavailable("cpu list empty".to_string()));
        }
        Ok(cpus.iter().map(|cpu| cpu.cpu_usage() as f64).collect())
    }

    fn virtual_memory(&mut self) -> Result<VirtualMemory, ProviderError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProviderError::Unavailable("total memory reported as zero".to_string()));
        }
        let available = self.system.available_memory();
        Ok(VirtualMemory {
            total,
            available,
            percent: percent(total.saturating_sub(available), total),
            used: self.system.used_memory(),
            free: self.system.free_memory(),
        })
    }

    fn swap_memory(&mut self) -> Result<SwapMemory, ProviderError> {
        self.system.refresh_memory();
        let total = self.system.total_swap();
        let used = self.system.used_swap();
        Ok(SwapMemory {
            total,
            used,
            free: self.system.free_swap(),
            percent: percent(used, total),
        })
    }

    fn disk_usage(&mut self, path: &Path) -> Result<DiskUsage, ProviderError> {
        let disks = Disks::new_with_refreshed_list();
        // deepest mount point containing `path`
        let disk = disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().components().count())
            .ok_or_else(|| {
                ProviderError::Unavailable(format!(
                    "no mounted filesystem contains {}",
                    path.display()
                ))
            })?;

        let total = disk.total_space();
        let free = disk.available_space();
        let used = total.saturating_sub(free);
        Ok(DiskUsage {
            total,
            used,
            free,
            percent: percent(used, total),
        })
    }

    fn disk_io_counters(&mut self) -> Result<DiskIoCounters, ProviderError> {
        Self::require_linux("disk I/O counters")?;
        self.procfs.disk_io_counters()
    }

    fn net_io_counters(&mut self) -> Result<NetIoCounters, ProviderError> {
        let networks = Networks::new_with_refreshed_list();
        let mut counters = NetIoCounters::default();
        for (_, data) in networks.iter() {
            counters.bytes_sent += data.total_transmitted();
            counters.bytes_recv += data.total_received();
            counters.packets_sent += data.total_packets_transmitted();
            counters.packets_recv += data.total_packets_received();
            counters.errin += data.total_errors_on_received();
            counters.errout += data.total_errors_on_transmitted();
        }
        Ok(counters)
    }

    fn pids(&mut self) -> Result<Vec<u32>, ProviderError> {
        self.system.refresh_processes();
        let mut pids: Vec<u32> = self.system.processes().keys().map(|pid| pid.as_u32()).collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn net_connections(&mut self) -> Result<Vec<SocketConnection>, ProviderError> {
        Self::require_linux("socket connections")?;
        self.procfs.net_connections()
    }

    fn platform(&mut self) -> Result<PlatformInfo, ProviderError> {
        let cpus = self.aggregate.cpus();
        Ok(PlatformInfo {
            machine: std::env::consts::ARCH.to_string(),
            system: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            platform: System::long_os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            hostname: System::host_name().unwrap_or_default(),
            processor: cpus
                .first()
                .map(|cpu| cpu.brand().trim().to_string())
                .unwrap_or_default(),
            cores: cpus.len(),
        })
    }
}

impl ProcessProvider for SystemProvider {
    type Handle = SystemProcess;

    fn resolve(&self, pid: u32) -> Result<SystemProcess, ProviderError> {
        SystemProcess::attach(pid, self.procfs.clone())
    }
}

/// Live process handle. Owns its own `System` so handles never share
/// refresh state.
pub struct SystemProcess {
    pid: Pid,
    system: System,
    procfs: ProcFs,
}

impl SystemProcess {
    pub fn attach(pid: u32, procfs: ProcFs) -> Result<Self, ProviderError> {
        let mut system = System::new();
        system.refresh_cpu();
        let sys_pid = Pid::from_u32(pid);
        if !system.refresh_process(sys_pid) {
            return Err(ProviderError::NoSuchProcess(pid));
        }
        debug!("Attached to process {}", pid);
        Ok(SystemProcess {
            pid: sys_pid,
            system,
            procfs,
        })
    }

    fn refreshed(&mut self) -> Result<&Process, ProviderError> {
        let pid = self.pid;
        if !self.system.refresh_process(pid) {
            return Err(ProviderError::NoSuchProcess(pid.as_u32()));
        }
        self.system
            .process(pid)
            .ok_or(ProviderError::NoSuchProcess(pid.as_u32()))
    }

    fn require_linux(&self, what: &'static str) -> Result<(), ProviderError> {
        SystemProvider::require_linux(what)
    }
}

impl ProcessHandle for SystemProcess {
    fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    fn cpu_percent(&mut self) -> Result<f64, ProviderError> {
        self.system.refresh_cpu();
        Ok(self.refreshed()?.cpu_usage() as f64)
    }

    fn memory_percent(&mut self) -> Result<f64, ProviderError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let rss = self.refreshed()?.memory();
        if total == 0 {
            return Ok(0.0);
        }
        Ok(rss as f64 / total as f64 * 100.0)
    }

    fn memory_info(&mut self) -> Result<MemoryInfo, ProviderError> {
        let process = self.refreshed()?;
        Ok(MemoryInfo {
            rss: process.memory(),
            vms: process.virtual_memory(),
        })
    }

    fn num_ctx_switches(&mut self) -> Result<CtxSwitches, ProviderError> {
        self.require_linux("context switch counters")?;
        self.procfs.ctx_switches(self.pid.as_u32())
    }

    fn num_fds(&mut self) -> Result<u64, ProviderError> {
        self.require_linux("descriptor counts")?;
        self.procfs.num_fds(self.pid.as_u32())
    }

    fn is_running(&mut self) -> Result<bool, ProviderError> {
        match self.refreshed() {
            Ok(process) => Ok(!matches!(
                process.status(),
                ProcessStatus::Zombie | ProcessStatus::Dead
            )),
            Err(ProviderError::NoSuchProcess(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn children(&mut self) -> Result<Vec<u32>, ProviderError> {
        let pid = self.pid;
        self.system.refresh_processes();
        if self.system.process(pid).is_none() {
            return Err(ProviderError::NoSuchProcess(pid.as_u32()));
        }
        let mut children: Vec<u32> = self
            .system
            .processes()
            .iter()
            .filter(|(_, process)| process.parent() == Some(pid))
            .map(|(child, _)| child.as_u32())
            .collect();
        children.sort_unstable();
        Ok(children)
    }

    fn threads(&mut self) -> Result<Vec<u32>, ProviderError> {
        self.require_linux("thread listing")?;
        self.procfs.threads(self.pid.as_u32())
    }

    fn cmdline(&mut self) -> Result<Vec<String>, ProviderError> {
        Ok(self.refreshed()?.cmd().to_vec())
    }
}
