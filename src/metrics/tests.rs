#![cfg(test)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use super::{
    ChannelSink, FlatReport, HostMetrics, MetricValue, MetricsSampler, MockProcess,
    MockProcessProvider, MockProvider, PidSelector, ProcessCollectError, ProcessMetrics,
    SamplerError, SystemProvider, RETRY_LIMIT,
};
use crate::config::{MenuConfig, ProcessMenu};

fn sampler_with_channel(
    provider: MockProvider,
) -> (MetricsSampler<MockProvider>, mpsc::UnboundedReceiver<Vec<FlatReport>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = HostMetrics::new(provider, MenuConfig::default());
    (MetricsSampler::new(engine, Arc::new(ChannelSink::new(tx))), rx)
}

#[tokio::test]
async fn sampler_emits_reports_until_stopped() {
    let (mut sampler, mut rx) = sampler_with_channel(MockProvider::new());
    sampler.start(Duration::from_millis(20)).unwrap();
    assert!(sampler.is_running());

    let reports = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("sampler did not produce a report in time")
        .expect("sink channel closed");
    assert_eq!(reports.len(), 1);
    assert!(reports[0].contains_key("cpu_percentage_overall"));
    assert!(reports[0].contains_key("net_io_counters_bytes_sent"));

    sampler.stop();
    sampler.stop();
    assert!(!sampler.is_running());

    // let an in-flight tick land, then nothing else may arrive
    sleep(Duration::from_millis(60)).await;
    while rx.try_recv().is_ok() {}
    assert!(timeout(Duration::from_millis(120), rx.recv()).await.is_err());
}

#[tokio::test]
async fn failing_ticks_emit_nothing_and_sampler_self_heals() {
    let provider = MockProvider::new();
    provider.fail_always("virtual_memory");
    let (mut sampler, mut rx) = sampler_with_channel(provider.clone());
    sampler.start(Duration::from_millis(10)).unwrap();

    sleep(Duration::from_millis(80)).await;
    assert!(rx.try_recv().is_err());
    assert!(sampler.is_running());
    assert!(provider.calls("virtual_memory") >= RETRY_LIMIT + 1);

    provider.recover("virtual_memory");
    let reports = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("sampler did not recover")
        .expect("sink channel closed");
    assert!(reports[0].contains_key("virtual_memory_total"));
    sampler.stop();
}

#[tokio::test]
async fn sampler_keeps_ticking_after_sink_panics() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let notified = AtomicUsize::new(0);
    let sink = move |reports: Vec<FlatReport>| {
        if notified.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("sink rejected the first report");
        }
        let _ = tx.send(reports);
    };
    let engine = HostMetrics::new(MockProvider::new(), MenuConfig::none());
    let mut sampler = MetricsSampler::new(engine, Arc::new(sink));
    sampler.start(Duration::from_millis(10)).unwrap();

    let reports = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("sampler stopped after the sink panicked")
        .expect("sink channel closed");
    assert_eq!(reports.len(), 1);
    assert!(sampler.is_running());
    sampler.stop();
}

#[tokio::test]
async fn on_demand_report_shares_the_engine() {
    let (mut sampler, _rx) = sampler_with_channel(MockProvider::new());
    sampler.start(Duration::from_secs(60)).unwrap();

    let engine = sampler.engine();
    let report = tokio::task::spawn_blocking(move || engine.lock().unwrap().report())
        .await
        .unwrap()
        .unwrap();
    assert!(report.contains_key("disk_usage_percent"));
    sampler.stop();
}

#[test]
fn sampler_runs_without_ambient_runtime() {
    let (tx, rx) = std_mpsc::channel();
    let tx = Mutex::new(tx);
    let sink = move |reports: Vec<FlatReport>| {
        let _ = tx.lock().unwrap().send(reports);
    };
    let engine = HostMetrics::new(MockProvider::new(), MenuConfig::default());
    let mut sampler = MetricsSampler::new(engine, Arc::new(sink));

    sampler.start(Duration::from_millis(20)).unwrap();
    let reports = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("sampler did not produce a report in time");
    assert_eq!(reports.len(), 1);
    drop(sampler);
}

#[test]
fn stop_without_start_is_harmless() {
    let (mut sampler, _rx) = sampler_with_channel(MockProvider::new());
    sampler.stop();
    assert!(!sampler.is_running());
    assert!(matches!(
        sampler.start(Duration::ZERO),
        Err(SamplerError::ZeroInterval)
    ));
}

#[test]
fn live_provider_reports_expected_prefixes() {
    let mut menu = MenuConfig::none();
    menu.cpu_percent = true;
    menu.virtual_memory = true;
    menu.swap_memory = true;
    menu.net_io_counters = true;
    let mut engine = HostMetrics::new(SystemProvider::new(), menu);

    let report = engine.collect().expect("live collection failed");
    let expected = ["cpu_percentage", "virtual_memory", "swap_memory", "net_io_counters"];
    for key in report.keys() {
        assert!(
            expected.iter().any(|prefix| key.starts_with(prefix)),
            "Unexpected report key '{}'",
            key
        );
    }
    for prefix in expected {
        assert!(report.keys().any(|key| key.starts_with(prefix)), "missing {}", prefix);
    }
}

fn process_engine(provider: MockProcessProvider, menu: ProcessMenu) -> ProcessMetrics<MockProcessProvider> {
    ProcessMetrics::new(provider, menu, PidSelector::default())
}

#[test]
fn unresolved_pid_is_reported_without_retry() {
    let provider = MockProcessProvider::new();
    let engine = process_engine(provider.clone(), ProcessMenu::default());

    let err = engine.collect_for_process(99).unwrap_err();
    assert!(matches!(err, ProcessCollectError::NoSuchProcess { pid: 99, .. }));
    assert_eq!(provider.calls("resolve"), 1);

    let notified = Mutex::new(0);
    let sink = |_: Vec<FlatReport>| *notified.lock().unwrap() += 1;
    assert_eq!(engine.process_and_notify(&[json!({"pid": 99})], &sink), 0);
    assert_eq!(*notified.lock().unwrap(), 0);
    assert_eq!(provider.calls("resolve"), 2);
}

#[test]
fn default_process_menu_keys() {
    let provider = MockProcessProvider::new().with_process(7, MockProcess::default());
    let engine = process_engine(provider, ProcessMenu::default());

    let report = engine.collect_for_process(7).unwrap();
    let keys: Vec<_> = report.keys().collect();
    assert_eq!(
        keys,
        vec![
            "cpu_percentage",
            "is_running",
            "memory_percent",
            "num_ctx_switches",
            "num_fds",
            "pid",
            "virtual_memory",
        ]
    );
    assert_eq!(report.get("pid"), Some(&MetricValue::UInt(7)));
    assert_eq!(report.get("virtual_memory"), Some(&MetricValue::UInt(65_536)));
    assert_eq!(
        report.get("num_ctx_switches"),
        Some(&MetricValue::from(vec![10u64, 2]))
    );
    assert_eq!(report.get("is_running"), Some(&MetricValue::Bool(true)));
}

#[test]
fn optional_process_fields() {
    let process = MockProcess {
        children: vec![8, 9],
        threads: vec![7, 11],
        ..MockProcess::default()
    };
    let provider = MockProcessProvider::new().with_process(7, process);
    let menu = ProcessMenu {
        children: true,
        threads: true,
        cmd_line: true,
        ..ProcessMenu::default()
    };
    let report = process_engine(provider, menu).collect_for_process(7).unwrap();

    assert_eq!(report.get("children"), Some(&MetricValue::from(vec![8u32, 9])));
    assert_eq!(report.get("threads"), Some(&MetricValue::from(vec![7u32, 11])));
    assert_eq!(report.get("cmd_line"), Some(&MetricValue::from("mockd --serve")));
}

#[test]
fn query_failures_retry_with_the_same_pid() {
    let provider = MockProcessProvider::new().with_process(7, MockProcess::default());
    provider.fail_times("num_fds", 2);
    let engine = process_engine(provider.clone(), ProcessMenu::default());

    let report = engine.collect_for_process(7).unwrap();
    assert_eq!(report.get("pid"), Some(&MetricValue::UInt(7)));
    assert_eq!(provider.calls("num_fds"), 3);
    assert_eq!(provider.calls("resolve"), 1);
}

#[test]
fn exited_process_is_not_retried() {
    let provider = MockProcessProvider::new().with_process(7, MockProcess::default());
    let engine = process_engine(provider.clone(), ProcessMenu::default());
    assert!(engine.collect_for_process(7).is_ok());

    provider.kill(7);
    assert!(matches!(
        engine.collect_for_process(7),
        Err(ProcessCollectError::NoSuchProcess { pid: 7, .. })
    ));
    assert_eq!(provider.calls("resolve"), 2);
    assert_eq!(provider.calls("cpu_percent"), 1);
}

#[test]
fn persistent_query_failure_exhausts_retries() {
    let provider = MockProcessProvider::new().with_process(7, MockProcess::default());
    provider.fail_always("memory_percent");
    let engine = process_engine(provider.clone(), ProcessMenu::default());

    match engine.collect_for_process(7) {
        Err(ProcessCollectError::Failed(failed)) => {
            assert_eq!(failed.attempts, RETRY_LIMIT + 1);
            assert_eq!(failed.last.category, "memory_percent");
        }
        other => panic!("expected exhausted retries, got {:?}", other.map(|r| r.len())),
    }
    assert_eq!(provider.calls("memory_percent"), RETRY_LIMIT + 1);
    assert_eq!(provider.calls("resolve"), 1);

    // zero retries means a single attempt
    let retried = process_engine(provider.clone(), ProcessMenu::default()).with_retry_limit(0);
    assert!(retried.collect_for_process(7).is_err());
    assert_eq!(provider.calls("memory_percent"), RETRY_LIMIT + 2);
}

#[test]
fn batch_emits_one_notification_for_successful_events() {
    let provider = MockProcessProvider::new()
        .with_process(1, MockProcess::default())
        .with_process(2, MockProcess::default());
    let engine = process_engine(provider, ProcessMenu::default());

    let batches = Mutex::new(Vec::new());
    let sink = |reports: Vec<FlatReport>| batches.lock().unwrap().push(reports);
    let events = [
        json!({"pid": 1}),
        json!({"name": "no pid here"}),
        json!({"pid": "bogus"}),
        json!({"pid": 2}),
        json!({"pid": 99}),
    ];

    assert_eq!(engine.process_and_notify(&events, &sink), 2);
    let batches = batches.into_inner().unwrap();
    assert_eq!(batches.len(), 1);
    let pids: Vec<_> = batches[0].iter().map(|r| r.get("pid").cloned()).collect();
    assert_eq!(pids, vec![Some(MetricValue::UInt(1)), Some(MetricValue::UInt(2))]);
}
