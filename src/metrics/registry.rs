//! Category lookup and dispatch. No retry or flattening happens here.

use std::fmt;
use std::path::Path;

use super::error::ProviderError;
use super::provider::MetricsProvider;
use super::sensors::{parse_sensors, SensorSource};
use super::types::{MetricValue, RawMetricRecord};
use crate::config::MenuConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostCategory {
    CpuPercent,
    VirtualMemory,
    SwapMemory,
    DiskUsage,
    DiskIoCounters,
    NetIoCounters,
    Sensors,
    ProcessIdentifiers,
    NetworkConnections,
}

impl HostCategory {
    /// Collection order. CPU goes first so its sampling window is not
    /// stretched by the slower categories.
    pub const ALL: [HostCategory; 9] = [
        HostCategory::CpuPercent,
        HostCategory::VirtualMemory,
        HostCategory::SwapMemory,
        HostCategory::DiskUsage,
        HostCategory::DiskIoCounters,
        HostCategory::NetIoCounters,
        HostCategory::Sensors,
        HostCategory::ProcessIdentifiers,
        HostCategory::NetworkConnections,
    ];

    /// Report key, or key prefix for nested records.
    pub fn name(self) -> &'static str {
        match self {
            HostCategory::CpuPercent => "cpu_percentage",
            HostCategory::VirtualMemory => "virtual_memory",
            HostCategory::SwapMemory => "swap_memory",
            HostCategory::DiskUsage => "disk_usage",
            HostCategory::DiskIoCounters => "disk_io_counters",
            HostCategory::NetIoCounters => "net_io_counters",
            HostCategory::Sensors => "sensors",
            HostCategory::ProcessIdentifiers => "process_identifiers",
            HostCategory::NetworkConnections => "network_connections",
        }
    }

    pub fn is_enabled(self, menu: &MenuConfig) -> bool {
        match self {
            HostCategory::CpuPercent => menu.cpu_percent,
            HostCategory::VirtualMemory => menu.virtual_memory,
            HostCategory::SwapMemory => menu.swap_memory,
            HostCategory::DiskUsage => menu.disk_usage,
            HostCategory::DiskIoCounters => menu.disk_io_counters,
            HostCategory::NetIoCounters => menu.net_io_counters,
            HostCategory::Sensors => menu.sensors,
            HostCategory::ProcessIdentifiers => menu.pids,
            HostCategory::NetworkConnections => menu.socket_connections,
        }
    }

    /// Whether a failure of this category may be skipped instead of
    /// failing the whole pass.
    pub fn is_tolerated(self) -> bool {
        matches!(self, HostCategory::Sensors)
    }

    pub fn enabled(menu: &MenuConfig) -> impl Iterator<Item = HostCategory> + '_ {
        HostCategory::ALL
            .into_iter()
            .filter(move |category| category.is_enabled(menu))
    }
}

impl fmt::Display for HostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Queries one category.
///
/// CPU takes two provider calls, always aggregate first and per-core second,
/// and both land in one record.
pub fn collect<P: MetricsProvider + ?Sized>(
    provider: &mut P,
    sensors: &mut dyn SensorSource,
    category: HostCategory,
    disk_path: &Path,
) -> Result<RawMetricRecord, ProviderError> {
    let record = match category {
        HostCategory::CpuPercent => {
            let overall = provider.cpu_percent()?;
            let per_cpu = provider.cpu_percent_per_core()?;
            RawMetricRecord::nested([
                ("overall", MetricValue::from(overall)),
                ("per_cpu", per_cpu.into()),
            ])
        }
        HostCategory::VirtualMemory => provider.virtual_memory()?.into(),
        HostCategory::SwapMemory => provider.swap_memory()?.into(),
        HostCategory::DiskUsage => provider.disk_usage(disk_path)?.into(),
        HostCategory::DiskIoCounters => provider.disk_io_counters()?.into(),
        HostCategory::NetIoCounters => provider.net_io_counters()?.into(),
        HostCategory::Sensors => parse_sensors(&sensors.read()?).into(),
        HostCategory::ProcessIdentifiers => RawMetricRecord::Scalar(provider.pids()?.into()),
        HostCategory::NetworkConnections => {
            RawMetricRecord::Scalar(provider.net_connections()?.into())
        }
    };
    Ok(record)
}
