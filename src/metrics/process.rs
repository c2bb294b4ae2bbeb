use std::io::BufRead;

use log::{debug, error, warn};
use serde_json::Value;

use super::error::{CategoryError, CollectionFailed, PidError, ProcessCollectError, ProviderError};
use super::provider::{ProcessHandle, ProcessProvider};
use super::retry::{BoundedRetry, RETRY_LIMIT};
use super::sink::ReportSink;
use super::types::{FlatReport, MetricValue};
use crate::config::{ProcessConfig, ProcessMenu};

/// Extracts a pid from an inbound JSON event by a dot-separated field path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PidSelector {
    field: String,
}

impl Default for PidSelector {
    fn default() -> Self {
        PidSelector::new("pid")
    }
}

impl PidSelector {
    pub fn new(field: impl Into<String>) -> Self {
        PidSelector {
            field: field.into(),
        }
    }

    /// `Missing` when the path is absent or null, `Invalid` when a value is
    /// there but is not a pid. Numeric strings are accepted.
    pub fn select(&self, event: &Value) -> Result<u32, PidError> {
        let mut current = event;
        for part in self.field.split('.') {
            match current.get(part) {
                Some(next) => current = next,
                None => return Err(self.missing()),
            }
        }

        let pid = match current {
            Value::Null => return Err(self.missing()),
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(text) => text.trim().parse::<u32>().ok(),
            _ => None,
        };
        pid.ok_or_else(|| PidError::Invalid {
            field: self.field.clone(),
            value: current.to_string(),
        })
    }

    fn missing(&self) -> PidError {
        PidError::Missing {
            field: self.field.clone(),
        }
    }
}

/// Per-process collection engine, driven by inbound events.
///
/// Each call gets its own retry budget; concurrent callers share nothing
/// mutable.
pub struct ProcessMetrics<P> {
    provider: P,
    menu: ProcessMenu,
    selector: PidSelector,
    retry_limit: u32,
}

impl<P: ProcessProvider> ProcessMetrics<P> {
    pub fn new(provider: P, menu: ProcessMenu, selector: PidSelector) -> Self {
        ProcessMetrics {
            provider,
            menu,
            selector,
            retry_limit: RETRY_LIMIT,
        }
    }

    pub fn from_config(provider: P, config: &ProcessConfig) -> Self {
        ProcessMetrics::new(
            provider,
            config.menu.clone(),
            PidSelector::new(config.pid_field.clone()),
        )
    }

    pub fn with_retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    /// Collects one report for `pid`. A pid that does not resolve is
    /// reported straight away; query failures are retried with the same pid.
    pub fn collect_for_process(&self, pid: u32) -> Result<FlatReport, ProcessCollectError> {
        let mut handle = self
            .provider
            .resolve(pid)
            .map_err(|source| ProcessCollectError::NoSuchProcess { pid, source })?;

        let mut retry = BoundedRetry::new(self.retry_limit);
        let label = format!("process metrics for pid {}", pid);
        retry
            .run(&label, || query_process(&mut handle, &self.menu))
            .map_err(|exhausted| {
                ProcessCollectError::Failed(CollectionFailed {
                    attempts: exhausted.attempts,
                    last: exhausted.last,
                })
            })
    }

    /// Handles a batch of events, returning the reports that succeeded.
    /// Events without a pid are skipped quietly; everything else that fails
    /// is logged and skipped.
    pub fn process_events(&self, events: &[Value]) -> Vec<FlatReport> {
        let mut reports = Vec::new();
        for event in events {
            let pid = match self.selector.select(event) {
                Ok(pid) => pid,
                Err(err @ PidError::Missing { .. }) => {
                    debug!("Skipping event {}: {}", event, err);
                    continue;
                }
                Err(err) => {
                    error!("Error while processing event: {}", err);
                    continue;
                }
            };

            match self.collect_for_process(pid) {
                Ok(report) => reports.push(report),
                Err(err) => error!("Error while processing event for pid {}: {}", pid, err),
            }
        }
        reports
    }

    /// Processes a batch and hands any reports to `sink` in one notification.
    /// Returns how many reports were delivered.
    pub fn process_and_notify(&self, events: &[Value], sink: &dyn ReportSink) -> usize {
        let reports = self.process_events(events);
        let delivered = reports.len();
        if delivered > 0 {
            sink.notify(reports);
        }
        delivered
    }

    /// Streams events from `reader`, one line at a time. Each line is a
    /// batch: a JSON array of events, or a single event. Each batch is
    /// reported as soon as its line is read, so an unbounded feed keeps
    /// flowing. Malformed lines are logged and skipped.
    pub fn process_lines<R: BufRead>(
        &self,
        reader: R,
        sink: &dyn ReportSink,
    ) -> std::io::Result<usize> {
        let mut delivered = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let batch = match serde_json::from_str::<Value>(&line) {
                Ok(Value::Array(events)) => events,
                Ok(event) => vec![event],
                Err(err) => {
                    warn!("Skipping malformed event line: {}", err);
                    continue;
                }
            };
            delivered += self.process_and_notify(&batch, sink);
        }
        Ok(delivered)
    }
}

fn query_process<H: ProcessHandle>(
    handle: &mut H,
    menu: &ProcessMenu,
) -> Result<FlatReport, CategoryError> {
    let mut report = FlatReport::new();
    report.insert("pid", handle.pid());

    if menu.cpu_percent {
        let value = handle.cpu_percent().map_err(failed("cpu_percentage"))?;
        report.insert("cpu_percentage", value);
    }
    if menu.memory_percent {
        let value = handle.memory_percent().map_err(failed("memory_percent"))?;
        report.insert("memory_percent", value);
    }
    if menu.virtual_memory {
        let info = handle.memory_info().map_err(failed("virtual_memory"))?;
        report.insert("virtual_memory", info.vms);
    }
    if menu.num_ctx_switches {
        let ctx = handle.num_ctx_switches().map_err(failed("num_ctx_switches"))?;
        report.insert(
            "num_ctx_switches",
            MetricValue::from(vec![ctx.voluntary, ctx.involuntary]),
        );
    }
    if menu.num_fds {
        let value = handle.num_fds().map_err(failed("num_fds"))?;
        report.insert("num_fds", value);
    }
    if menu.is_running {
        let value = handle.is_running().map_err(failed("is_running"))?;
        report.insert("is_running", value);
    }
    if menu.children {
        let value = handle.children().map_err(failed("children"))?;
        report.insert("children", value);
    }
    if menu.threads {
        let value = handle.threads().map_err(failed("threads"))?;
        report.insert("threads", value);
    }
    if menu.cmd_line {
        let value = handle.cmdline().map_err(failed("cmd_line"))?;
        report.insert("cmd_line", value.join(" "));
    }

    Ok(report)
}

fn failed(category: &'static str) -> impl Fn(ProviderError) -> CategoryError {
    move |source| CategoryError { category, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn selector_reads_top_level_and_nested_fields() {
        assert_eq!(PidSelector::default().select(&json!({"pid": 42})), Ok(42));
        assert_eq!(PidSelector::default().select(&json!({"pid": "77"})), Ok(77));
        assert_eq!(
            PidSelector::new("meta.process.pid").select(&json!({"meta": {"process": {"pid": 9}}})),
            Ok(9)
        );
    }

    #[test]
    fn each_line_is_reported_as_its_own_batch() {
        use crate::metrics::mock::{MockProcess, MockProcessProvider};
        use std::io::Cursor;
        use std::sync::Mutex;

        let provider = MockProcessProvider::new()
            .with_process(1, MockProcess::default())
            .with_process(2, MockProcess::default());
        let engine = ProcessMetrics::new(provider, ProcessMenu::default(), PidSelector::default());
        let batches = Mutex::new(Vec::new());
        let sink = |reports: Vec<FlatReport>| batches.lock().unwrap().push(reports.len());

        let input = "{\"pid\": 1}\n\nnot json\n[{\"pid\": 1}, {\"pid\": 2}]\n{\"pid\": 99}\n";
        let delivered = engine.process_lines(Cursor::new(input), &sink).unwrap();

        assert_eq!(delivered, 3);
        assert_eq!(batches.into_inner().unwrap(), vec![1, 2]);
    }

    #[test]
    fn selector_distinguishes_missing_from_invalid() {
        let selector = PidSelector::default();
        assert!(matches!(
            selector.select(&json!({"name": "x"})),
            Err(PidError::Missing { .. })
        ));
        assert!(matches!(
            selector.select(&json!({"pid": null})),
            Err(PidError::Missing { .. })
        ));
        assert!(matches!(
            selector.select(&json!({"pid": -3})),
            Err(PidError::Invalid { .. })
        ));
        assert!(matches!(
            selector.select(&json!({"pid": "abc"})),
            Err(PidError::Invalid { .. })
        ));
        assert!(matches!(
            selector.select(&json!({"pid": 1.5})),
            Err(PidError::Invalid { .. })
        ));
    }
}
