//! Status reporting to the parent monitor
//!
//! All timers share one [`StatusReporter`]. Reports are queued and written
//! by a single writer thread, so the parent channel sees one ordered stream
//! and a slow parent never stalls a timer for longer than the send timeout.

use crate::error::{Error, Result};
use crate::sickbay::machine::HealthStatus;
use crate::sync_pipe::{StatusSink, MSG_HEALTHCHECK_STATUS};
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

/// Event type tag for healthcheck status events
pub const EVENT_TYPE: &str = "healthcheck_status";

/// One status event as sent to the parent monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub container_id: String,
    pub status: String,
    pub exit_code: i32,
    pub timestamp: i64,
}

impl StatusEvent {
    pub fn new(container_id: &str, status: HealthStatus, exit_code: i32) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            kind: EVENT_TYPE.to_string(),
            container_id: container_id.to_string(),
            status: status.as_str().to_string(),
            exit_code,
            timestamp: i64::try_from(timestamp).unwrap_or(i64::MAX),
        }
    }
}

/// Cloneable handle used by timers to queue status events
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: Sender<StatusEvent>,
    send_timeout: Duration,
}

/// The writer thread behind a [`StatusReporter`]
///
/// The thread exits once every reporter handle has been dropped.
#[derive(Debug)]
pub struct ReporterThread {
    handle: JoinHandle<()>,
}

impl ReporterThread {
    /// Wait for queued events to be written and the writer to exit
    pub fn join(self) {
        if self.handle.join().is_err() {
            error!("Status reporter thread panicked");
        }
    }
}

impl StatusReporter {
    /// Start the writer thread draining into `sink`
    pub fn spawn<S>(sink: S, capacity: usize, send_timeout: Duration) -> Result<(Self, ReporterThread)>
    where
        S: StatusSink + 'static,
    {
        let (tx, rx) = channel::bounded(capacity.max(1));
        let handle = thread::Builder::new()
            .name("health-report".to_string())
            .spawn(move || write_loop(sink, rx))?;

        Ok((Self { tx, send_timeout }, ReporterThread { handle }))
    }

    /// Queue a status event for `container_id`
    pub fn report(&self, container_id: &str, status: HealthStatus, exit_code: i32) -> Result<()> {
        let event = StatusEvent::new(container_id, status, exit_code);
        self.tx
            .send_timeout(event, self.send_timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => Error::ReportFailed(format!(
                    "queue still full after {:?}",
                    self.send_timeout
                )),
                SendTimeoutError::Disconnected(_) => Error::ChannelClosed,
            })
    }
}

fn write_loop<S: StatusSink>(mut sink: S, rx: Receiver<StatusEvent>) {
    for event in rx.iter() {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode healthcheck status");
                continue;
            }
        };

        match sink.send(MSG_HEALTHCHECK_STATUS, &payload) {
            Ok(()) => debug!(
                container_id = %event.container_id,
                status = %event.status,
                exit_code = event.exit_code,
                "Sent healthcheck status"
            ),
            Err(e) => warn!(
                container_id = %event.container_id,
                status = %event.status,
                error = %e,
                "Failed to send healthcheck status"
            ),
        }
    }
    debug!("Status reporter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sickbay::testing::{FailingSink, GatedSink, MemorySink};
    use std::io;
    use std::time::Instant;

    #[test]
    fn test_event_json_shape() {
        let event = StatusEvent::new("abc", HealthStatus::Unhealthy, 1);
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "healthcheck_status");
        assert_eq!(value["container_id"], "abc");
        assert_eq!(value["status"], "unhealthy");
        assert_eq!(value["exit_code"], 1);
        assert!(value["timestamp"].as_i64().unwrap() > 0);
        assert_eq!(value.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_reports_are_written_in_order() {
        let (sink, received) = MemorySink::new();
        let (reporter, thread) =
            StatusReporter::spawn(sink, 8, Duration::from_secs(1)).unwrap();

        reporter.report("c1", HealthStatus::Starting, 0).unwrap();
        reporter.report("c1", HealthStatus::Healthy, 0).unwrap();
        reporter.report("c2", HealthStatus::Unhealthy, 137).unwrap();
        drop(reporter);
        thread.join();

        let messages: Vec<(i32, String)> = received.try_iter().collect();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|(t, _)| *t == MSG_HEALTHCHECK_STATUS));

        let last: StatusEvent = serde_json::from_str(&messages[2].1).unwrap();
        assert_eq!(last.container_id, "c2");
        assert_eq!(last.status, "unhealthy");
        assert_eq!(last.exit_code, 137);
    }

    #[test]
    fn test_sink_failure_is_not_fatal() {
        let (reporter, thread) =
            StatusReporter::spawn(FailingSink, 8, Duration::from_secs(1)).unwrap();
        reporter.report("c1", HealthStatus::Healthy, 0).unwrap();
        reporter.report("c1", HealthStatus::Healthy, 0).unwrap();
        drop(reporter);
        thread.join();
    }

    #[test]
    fn test_full_queue_times_out() {
        let (sink, gate) = GatedSink::new();
        let (reporter, thread) =
            StatusReporter::spawn(sink, 1, Duration::from_millis(300)).unwrap();

        // One event held by the writer, one filling the queue
        reporter.report("c1", HealthStatus::Healthy, 0).unwrap();
        reporter.report("c1", HealthStatus::Healthy, 0).unwrap();

        let begin = Instant::now();
        let err = reporter.report("c1", HealthStatus::Healthy, 0).unwrap_err();
        let waited = begin.elapsed();
        assert!(matches!(err, Error::ReportFailed(_)));
        assert!(waited >= Duration::from_millis(250));
        assert!(waited < Duration::from_secs(2));

        drop(gate);
        drop(reporter);
        thread.join();
    }

    struct PanickingSink;

    impl StatusSink for PanickingSink {
        fn send(&mut self, _msg_type: i32, _payload: &str) -> io::Result<()> {
            panic!("sink exploded");
        }
    }

    #[test]
    fn test_dead_writer_reports_channel_closed() {
        let (reporter, thread) =
            StatusReporter::spawn(PanickingSink, 4, Duration::from_millis(100)).unwrap();
        reporter.report("c1", HealthStatus::Healthy, 0).unwrap();
        thread.join();

        let err = reporter.report("c1", HealthStatus::Healthy, 0).unwrap_err();
        assert!(matches!(err, Error::ChannelClosed));
    }
}
