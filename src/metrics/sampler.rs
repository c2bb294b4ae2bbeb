use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, warn};
use thiserror::Error;
use tokio::select;
use tokio::task::{self, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::host::HostMetrics;
use super::provider::MetricsProvider;
use super::sink::ReportSink;
use super::types::FlatReport;

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("sampling interval must be greater than zero")]
    ZeroInterval,
    #[error("failed to build metrics sampler runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Shared handle to the engine a sampler drives, for on-demand queries.
pub type SharedHostMetrics<P> = Arc<Mutex<HostMetrics<P>>>;

/// Periodic driver for a [`HostMetrics`] engine.
///
/// Every tick runs one `collect()` and hands a successful report to the
/// sink. A tick never starts while the previous collection is still running;
/// ticks missed that way are dropped, not queued.
pub struct MetricsSampler<P> {
    engine: SharedHostMetrics<P>,
    sink: Arc<dyn ReportSink>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl<P: MetricsProvider + 'static> MetricsSampler<P> {
    pub fn new(engine: HostMetrics<P>, sink: Arc<dyn ReportSink>) -> Self {
        MetricsSampler {
            engine: Arc::new(Mutex::new(engine)),
            sink,
            cancel: None,
            task: None,
            runtime: None,
        }
    }

    pub fn engine(&self) -> SharedHostMetrics<P> {
        Arc::clone(&self.engine)
    }

    pub fn is_running(&self) -> bool {
        match (&self.cancel, &self.task) {
            (Some(cancel), Some(task)) => !cancel.is_cancelled() && !task.is_finished(),
            _ => false,
        }
    }

    /// Starts ticking every `period`, first tick one period from now.
    /// Uses the ambient tokio runtime when there is one. Calling it while
    /// already running does nothing.
    pub fn start(&mut self, period: Duration) -> Result<(), SamplerError> {
        if period.is_zero() {
            return Err(SamplerError::ZeroInterval);
        }
        if self.is_running() {
            warn!("Metrics sampler already running; ignoring start");
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let fut = run(
            Arc::clone(&self.engine),
            Arc::clone(&self.sink),
            period,
            cancel.clone(),
        );

        let task = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.spawn(fut),
            Err(_) => {
                let runtime = match self.runtime.take() {
                    Some(runtime) => runtime,
                    None => tokio::runtime::Builder::new_multi_thread()
                        .worker_threads(1)
                        .enable_all()
                        .build()?,
                };
                let task = runtime.spawn(fut);
                self.runtime = Some(runtime);
                task
            }
        };

        debug!("Metrics sampler started, interval {:?}", period);
        self.cancel = Some(cancel);
        self.task = Some(task);
        Ok(())
    }

    /// Stops further ticks. Does not wait for an in-flight collection.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            debug!("Metrics sampler stopping");
        }
        self.task = None;
    }
}

impl<P> Drop for MetricsSampler<P> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

async fn run<P: MetricsProvider + 'static>(
    engine: SharedHostMetrics<P>,
    sink: Arc<dyn ReportSink>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let engine = Arc::clone(&engine);
                let outcome = task::spawn_blocking(move || lock(&engine).collect()).await;
                match outcome {
                    Ok(Ok(report)) => deliver(sink.as_ref(), report),
                    Ok(Err(failed)) => warn!("No metrics report this tick: {}", failed),
                    Err(join_err) => error!("Metrics collection task failed: {}", join_err),
                }
            }
        }
    }

    debug!("Metrics sampler stopped");
}

/// Hands one report to the sink. A panicking sink costs that report only.
fn deliver(sink: &dyn ReportSink, report: FlatReport) {
    if panic::catch_unwind(AssertUnwindSafe(|| sink.notify(vec![report]))).is_err() {
        error!("Report sink panicked; report dropped, sampler keeps running");
    }
}

fn lock<P>(engine: &Mutex<HostMetrics<P>>) -> MutexGuard<'_, HostMetrics<P>> {
    match engine.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
