mod error;
mod flatten;
mod host;
pub mod mock;
mod process;
pub mod procfs;
mod provider;
mod registry;
mod retry;
mod sampler;
pub mod sensors;
mod sink;
mod system;
#[cfg(test)]
mod tests;
mod types;

pub use error::{
    CategoryError, CollectionFailed, PidError, ProcessCollectError, ProviderError, SensorError,
};
pub use flatten::{flatten, merge};
pub use host::{timestamp, HostMetrics};
pub use mock::{MockProcess, MockProcessProvider, MockProvider, MockSensors};
pub use process::{PidSelector, ProcessMetrics};
pub use provider::{MetricsProvider, ProcessHandle, ProcessProvider};
pub use registry::HostCategory;
pub use retry::{BoundedRetry, Exhausted, RETRY_LIMIT};
pub use sampler::{MetricsSampler, SamplerError, SharedHostMetrics};
pub use sensors::{parse_sensors, SensorReadings, SensorSource, SensorsCommand};
pub use sink::{ChannelSink, JsonLinesSink, ReportSink};
pub use system::{SystemProcess, SystemProvider};
pub use types::{
    percent, CtxSwitches, DiskIoCounters, DiskUsage, FlatReport, MemoryInfo, MetricValue,
    NetIoCounters, PlatformInfo, RawMetricRecord, SocketConnection, SwapMemory, VirtualMemory,
};
