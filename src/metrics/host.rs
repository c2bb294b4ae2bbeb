use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::{debug, warn};

use super::error::{CategoryError, CollectionFailed, ProviderError};
use super::flatten::merge;
use super::provider::MetricsProvider;
use super::registry::{self, HostCategory};
use super::retry::BoundedRetry;
use super::sensors::{SensorSource, SensorsCommand};
use super::sink::ReportSink;
use super::types::FlatReport;
use crate::config::{AgentConfig, MenuConfig};

/// Host-wide collection engine.
///
/// A pass that fails on any non-tolerated category is discarded and the
/// whole pass is repeated, up to the retry limit. Nothing partial is ever
/// returned.
pub struct HostMetrics<P> {
    provider: P,
    sensors: Box<dyn SensorSource>,
    menu: MenuConfig,
    disk_path: PathBuf,
    retry: BoundedRetry,
}

impl<P: MetricsProvider> HostMetrics<P> {
    pub fn new(provider: P, menu: MenuConfig) -> Self {
        HostMetrics {
            provider,
            sensors: Box::new(SensorsCommand::default()),
            menu,
            disk_path: PathBuf::from("/"),
            retry: BoundedRetry::default(),
        }
    }

    pub fn from_config(provider: P, config: &AgentConfig) -> Self {
        HostMetrics::new(provider, config.menu.clone())
            .with_disk_path(config.disk_path.clone())
            .with_sensor_source(SensorsCommand::from(&config.sensors))
    }

    pub fn with_sensor_source(mut self, source: impl SensorSource + 'static) -> Self {
        self.sensors = Box::new(source);
        self
    }

    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    pub fn with_retry(mut self, retry: BoundedRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.count()
    }

    /// Runs one collection pass with bounded retries.
    pub fn collect(&mut self) -> Result<FlatReport, CollectionFailed> {
        let HostMetrics {
            provider,
            sensors,
            menu,
            disk_path,
            retry,
        } = self;

        retry
            .run("system metrics", || {
                collect_pass(&mut *provider, sensors.as_mut(), menu, disk_path.as_path())
            })
            .map_err(|exhausted| CollectionFailed {
                attempts: exhausted.attempts,
                last: exhausted.last,
            })
    }

    /// Runs one pass and hands a successful report to `sink`, for callers
    /// that collect on their own signal instead of a timer. A failed pass
    /// notifies nothing. Returns whether a report was delivered.
    pub fn collect_and_notify(&mut self, sink: &dyn ReportSink) -> bool {
        match self.collect() {
            Ok(report) => {
                sink.notify(vec![report]);
                true
            }
            Err(failed) => {
                warn!("No metrics report for this signal: {}", failed);
                false
            }
        }
    }

    /// Same as [`collect`](Self::collect); the on-demand entry point.
    pub fn report(&mut self) -> Result<FlatReport, CollectionFailed> {
        self.collect()
    }

    /// Current aggregate CPU usage.
    pub fn cpu(&mut self) -> Result<f64, ProviderError> {
        self.provider.cpu_percent()
    }

    pub fn platform(&mut self) -> Result<FlatReport, ProviderError> {
        Ok(self.provider.platform()?.into())
    }
}

/// Current UTC time, ISO-8601.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// One attempt: every enabled category in fixed order into a fresh report.
fn collect_pass<P: MetricsProvider + ?Sized>(
    provider: &mut P,
    sensors: &mut dyn SensorSource,
    menu: &MenuConfig,
    disk_path: &Path,
) -> Result<FlatReport, CategoryError> {
    let mut report = FlatReport::new();

    for category in HostCategory::enabled(menu) {
        match registry::collect(provider, sensors, category, disk_path) {
            Ok(record) => merge(&mut report, category.name(), record),
            Err(err) if category.is_tolerated() => {
                warn!("Skipping {} for this pass: {}", category, err);
            }
            Err(source) => {
                return Err(CategoryError {
                    category: category.name(),
                    source,
                })
            }
        }
    }

    debug!("Collected {} metrics", report.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::mock::{MockProvider, MockSensors};
    use crate::metrics::retry::RETRY_LIMIT;
    use crate::metrics::types::MetricValue;

    fn only(configure: impl FnOnce(&mut MenuConfig)) -> MenuConfig {
        let mut menu = MenuConfig::none();
        configure(&mut menu);
        menu
    }

    #[test]
    fn disk_usage_only_flattens_to_four_keys() {
        let provider = MockProvider::new();
        let mut engine = HostMetrics::new(provider, only(|m| m.disk_usage = true));

        let report = engine.collect().unwrap();
        let expected: FlatReport = [
            ("disk_usage_total", MetricValue::UInt(100)),
            ("disk_usage_used", MetricValue::UInt(40)),
            ("disk_usage_free", MetricValue::UInt(60)),
            ("disk_usage_percent", MetricValue::Float(40.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(report, expected);
    }

    #[test]
    fn cpu_is_sampled_aggregate_then_per_core() {
        let provider = MockProvider::new();
        let mut engine = HostMetrics::new(provider.clone(), only(|m| m.cpu_percent = true));

        let report = engine.collect().unwrap();
        assert!(report.contains_key("cpu_percentage_overall"));
        assert!(report.contains_key("cpu_percentage_per_cpu"));
        assert_eq!(
            provider.call_log(),
            vec!["cpu_percent", "cpu_percent_per_core"]
        );
    }

    #[test]
    fn categories_run_in_fixed_order() {
        let provider = MockProvider::new();
        let mut menu = MenuConfig::default();
        menu.pids = true;
        menu.socket_connections = true;
        let mut engine = HostMetrics::new(provider.clone(), menu);

        engine.collect().unwrap();
        assert_eq!(
            provider.call_log(),
            vec![
                "cpu_percent",
                "cpu_percent_per_core",
                "virtual_memory",
                "swap_memory",
                "disk_usage",
                "disk_io_counters",
                "net_io_counters",
                "pids",
                "net_connections",
            ]
        );
    }

    #[test]
    fn always_failing_provider_gives_up_after_limit() {
        let provider = MockProvider::new();
        provider.fail_always("swap_memory");
        let mut engine = HostMetrics::new(provider.clone(), MenuConfig::default());

        let failed = engine.collect().unwrap_err();
        assert_eq!(failed.attempts, RETRY_LIMIT + 1);
        assert_eq!(failed.last.category, "swap_memory");
        assert_eq!(provider.calls("swap_memory"), RETRY_LIMIT + 1);
        assert_eq!(engine.retry_count(), 0);

        provider.recover("swap_memory");
        assert!(engine.collect().is_ok());
        assert_eq!(provider.calls("swap_memory"), RETRY_LIMIT + 2);
    }

    #[test]
    fn single_failure_recovers_with_whole_pass_rerun() {
        let provider = MockProvider::new();
        provider.fail_times("disk_io_counters", 1);
        let mut engine = HostMetrics::new(provider.clone(), MenuConfig::default());

        let report = engine.collect().unwrap();
        assert!(report.contains_key("disk_io_counters_read_bytes"));
        assert_eq!(engine.retry_count(), 0);
        // the categories before the failure were queried again
        assert_eq!(provider.calls("virtual_memory"), 2);
        assert_eq!(provider.calls("cpu_percent"), 2);
        assert_eq!(provider.calls("cpu_percent_per_core"), 2);
    }

    #[test]
    fn sensor_failure_is_tolerated() {
        let provider = MockProvider::new();
        let mut engine = HostMetrics::new(provider, only(|m| {
            m.sensors = true;
            m.virtual_memory = true;
        }))
        .with_sensor_source(MockSensors::failing());

        let report = engine.collect().unwrap();
        assert!(report.contains_key("virtual_memory_total"));
        assert!(!report.keys().any(|k| k.starts_with("sensors")));
        assert_eq!(engine.retry_count(), 0);
    }

    #[test]
    fn sensor_readings_are_prefixed() {
        let provider = MockProvider::new();
        let mut engine = HostMetrics::new(provider, only(|m| m.sensors = true)).with_sensor_source(
            MockSensors::text("acpitz-virtual-0\nAdapter: Virtual device\ntemp1:\n  temp1_input: 26.800\n"),
        );

        let report = engine.collect().unwrap();
        assert_eq!(
            report.get("sensors_acpitz-virtual-0_temp1_input"),
            Some(&MetricValue::Float(26.8))
        );
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn bulk_categories_use_bare_keys() {
        let provider = MockProvider::new();
        let mut engine = HostMetrics::new(provider, only(|m| {
            m.pids = true;
            m.socket_connections = true;
        }));

        let report = engine.collect().unwrap();
        assert_eq!(report.len(), 2);
        assert_eq!(
            report.get("process_identifiers"),
            Some(&MetricValue::from(vec![1u32, 42, 4242]))
        );
        assert_eq!(
            report
                .get("network_connections")
                .and_then(MetricValue::as_list)
                .map(|l| l.len()),
            Some(1)
        );
    }

    #[test]
    fn retry_budget_is_configurable() {
        let provider = MockProvider::new();
        provider.fail_always("swap_memory");
        let mut engine = HostMetrics::new(provider.clone(), MenuConfig::default())
            .with_retry(BoundedRetry::new(1));

        let failed = engine.collect().unwrap_err();
        assert_eq!(failed.attempts, 2);
        assert_eq!(provider.calls("swap_memory"), 2);
    }

    #[test]
    fn collect_and_notify_delivers_only_successful_passes() {
        use std::sync::Mutex;

        let provider = MockProvider::new();
        let mut engine = HostMetrics::new(provider.clone(), only(|m| m.swap_memory = true));
        let batches = Mutex::new(Vec::new());
        let sink = |reports: Vec<FlatReport>| batches.lock().unwrap().push(reports);

        assert!(engine.collect_and_notify(&sink));
        provider.fail_always("swap_memory");
        assert!(!engine.collect_and_notify(&sink));

        let batches = batches.into_inner().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert!(batches[0][0].contains_key("swap_memory_total"));
    }

    #[test]
    fn timestamp_is_utc_iso8601() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }
}
