use std::io::Write;
use std::sync::Mutex;

use log::{error, warn};
use tokio::sync::mpsc::UnboundedSender;

use super::types::FlatReport;

/// Receives the reports of one tick or one processed batch as one unit.
///
/// Delivery is fire-and-forget: implementations handle their own errors.
pub trait ReportSink: Send + Sync {
    fn notify(&self, reports: Vec<FlatReport>);
}

impl<F> ReportSink for F
where
    F: Fn(Vec<FlatReport>) + Send + Sync,
{
    fn notify(&self, reports: Vec<FlatReport>) {
        self(reports)
    }
}

/// Forwards reports into a tokio channel.
pub struct ChannelSink {
    tx: UnboundedSender<Vec<FlatReport>>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<Vec<FlatReport>>) -> Self {
        ChannelSink { tx }
    }
}

impl ReportSink for ChannelSink {
    fn notify(&self, reports: Vec<FlatReport>) {
        if self.tx.send(reports).is_err() {
            warn!("Report receiver dropped; discarding reports");
        }
    }
}

/// Writes each report as one JSON line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(writer) => writer,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> ReportSink for JsonLinesSink<W> {
    fn notify(&self, reports: Vec<FlatReport>) {
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for report in &reports {
            let written = serde_json::to_writer(&mut *writer, report)
                .map_err(std::io::Error::from)
                .and_then(|_| writer.write_all(b"\n"));
            if let Err(err) = written {
                error!("Failed to write report: {}", err);
                return;
            }
        }
        if let Err(err) = writer.flush() {
            error!("Failed to flush reports: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_sink_writes_one_line_per_report() {
        let sink = JsonLinesSink::new(Vec::new());
        let first: FlatReport = [("cpu_percentage_overall", 12.5f64)].into_iter().collect();
        let second: FlatReport = [("pid", 42u64)].into_iter().collect();
        sink.notify(vec![first, second]);

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines, vec![r#"{"cpu_percentage_overall":12.5}"#, r#"{"pid":42}"#]);
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(0usize);
        let sink = |reports: Vec<FlatReport>| *seen.lock().unwrap() += reports.len();
        sink.notify(vec![FlatReport::new(), FlatReport::new()]);
        assert_eq!(*seen.lock().unwrap(), 2);
    }
}
