//! Report forwarding off the data path.
//!
//! Closed windows are produced inside the send/receive loops, where a blocking
//! CSV write or console print would disturb pacing. Instead the loops push
//! records into an unbounded channel and a separate task hands them to the
//! [`MetricsSink`](crate::metrics::MetricsSink).

use crate::metrics::{MetricsRecord, SinkRef};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Message sent to the reporter task
#[derive(Debug, Clone)]
pub enum ReportMessage {
    /// One closed window
    Record(MetricsRecord),
    /// No more records will follow
    Complete,
}

/// Handle for sending records to the reporter task
///
/// # Examples
///
/// ```
/// use netmeter::interval_reporter::ReportHandle;
/// use netmeter::metrics::WindowMetrics;
///
/// #[tokio::main]
/// async fn main() {
///     let (reporter, mut receiver) = ReportHandle::new();
///     let peer = "127.0.0.1:5001".parse().unwrap();
///
///     reporter.report(WindowMetrics::bandwidth_only(1.0).into_record(peer));
///     reporter.complete();
///
///     assert!(receiver.recv().await.is_some());
/// }
/// ```
#[derive(Clone)]
pub struct ReportHandle {
    sender: mpsc::UnboundedSender<ReportMessage>,
}

impl ReportHandle {
    /// Creates a new handle and the receiver the reporter task should drain.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ReportMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Send a record
    pub fn report(&self, record: MetricsRecord) {
        let _ = self.sender.send(ReportMessage::Record(record));
    }

    /// Signal that the run is over
    pub fn complete(&self) {
        let _ = self.sender.send(ReportMessage::Complete);
    }
}

/// Forwards records to `sink` until `Complete` arrives or every handle is dropped.
pub async fn run_reporter_task(
    mut receiver: mpsc::UnboundedReceiver<ReportMessage>,
    sink: SinkRef,
) {
    while let Some(msg) = receiver.recv().await {
        match msg {
            ReportMessage::Record(record) => sink.record(record),
            ReportMessage::Complete => break,
        }
    }
}

/// Spawns the reporter task on the current runtime.
pub fn spawn_reporter(sink: SinkRef) -> (ReportHandle, JoinHandle<()>) {
    let (handle, receiver) = ReportHandle::new();
    let task = tokio::spawn(run_reporter_task(receiver, sink));
    (handle, task)
}
