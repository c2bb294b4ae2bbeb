//! Host and process resource metrics, flattened into namespaced reports.
//!
//! - `metrics`: collection engines, providers, sensor parsing, scheduling
//! - `config`: menus and agent configuration

pub mod config;
pub mod metrics;

pub use config::{AgentConfig, MenuConfig, ProcessConfig, ProcessMenu, SensorsConfig};
pub use metrics::{
    FlatReport, HostMetrics, MetricValue, MetricsSampler, ProcessMetrics, ReportSink,
    SystemProvider,
};
