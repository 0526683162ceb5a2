//! Reporting boundary.
//!
//! The core only decides what a report contains. Presentation belongs to a
//! [`ReportSink`]: [`TracingSink`] for console logs, [`JsonLinesSink`] for
//! machine-readable output, or any `Fn(MonitorEvent)` closure.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{info, warn};

use crate::backend::BackendKind;
use crate::meter::ThroughputReport;

/// Measurement and lifecycle events handed to a sink.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// Connection established.
    Connected {
        /// Unix milliseconds.
        at_ms: u64,
        /// Full subscription URL, cursor included.
        endpoint: String,
        backend: BackendKind,
    },
    /// `stop()` was called for the first time.
    StopRequested {
        /// Unix milliseconds.
        at_ms: u64,
    },
    /// One throughput window completed.
    Throughput(ThroughputReport),
    /// Raw payload preview, only produced when inspection is enabled.
    Payload {
        /// 1-based position in the run.
        seq: u64,
        /// Full payload length in bytes.
        len: usize,
        preview_hex: String,
    },
}

impl MonitorEvent {
    /// Builds a payload preview of at most `limit` leading bytes.
    pub fn payload(seq: u64, payload: &[u8], limit: usize) -> Self {
        let shown = &payload[..payload.len().min(limit)];
        MonitorEvent::Payload {
            seq,
            len: payload.len(),
            preview_hex: hex::encode(shown),
        }
    }

    /// Encodes the event as a single-line JSON object.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Receives monitor events. Called from the run's execution context.
pub trait ReportSink: Send + Sync {
    /// Presents one event. Must not block for long; it runs on the message path.
    fn emit(&self, event: MonitorEvent);
}

impl<F> ReportSink for F
where
    F: Fn(MonitorEvent) + Send + Sync,
{
    fn emit(&self, event: MonitorEvent) {
        self(event)
    }
}

/// Logs events through `tracing`; the subscriber supplies timestamps.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn emit(&self, event: MonitorEvent) {
        match event {
            MonitorEvent::Connected {
                endpoint, backend, ..
            } => {
                info!(event = "connected", %endpoint, %backend, "Connected");
            }
            MonitorEvent::StopRequested { .. } => {
                info!(event = "stop_requested", "Stopping...");
            }
            MonitorEvent::Throughput(report) => {
                info!(
                    event = "throughput",
                    events = report.events,
                    elapsed_secs = report.elapsed_secs,
                    "Processing {:.1} evt/s",
                    report.rate
                );
            }
            MonitorEvent::Payload {
                seq,
                len,
                preview_hex,
            } => {
                info!(event = "payload", seq, len, preview = %preview_hex);
            }
        }
    }
}

/// Writes one JSON object per event to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonLinesSink;

impl JsonLinesSink {
    /// Writes `event` to `out` as one JSON line.
    pub fn write_event<W: Write>(&self, out: &mut W, event: &MonitorEvent) -> io::Result<()> {
        let line = event.to_text()?;
        writeln!(out, "{line}")
    }
}

impl ReportSink for JsonLinesSink {
    fn emit(&self, event: MonitorEvent) {
        let mut stdout = io::stdout().lock();
        if let Err(err) = self.write_event(&mut stdout, &event) {
            warn!(event = "report_write_failed", error = %err);
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::MonitorEvent;
    use crate::backend::BackendKind;
    use crate::meter::ThroughputReport;

    #[test]
    fn payload_preview_is_truncated_hex() {
        let event = MonitorEvent::payload(3, &[0xa2, 0x61, 0x74, 0x65, 0x23], 2);
        assert_eq!(
            event,
            MonitorEvent::Payload {
                seq: 3,
                len: 5,
                preview_hex: "a261".to_string(),
            }
        );
    }

    #[test]
    fn payload_preview_handles_short_payloads() {
        let event = MonitorEvent::payload(1, &[0x01], 64);
        assert!(matches!(
            event,
            MonitorEvent::Payload { len: 1, ref preview_hex, .. } if preview_hex == "01"
        ));
    }

    #[test]
    fn connected_event_is_tagged_json() {
        let event = MonitorEvent::Connected {
            at_ms: 1_700_000_000_000,
            endpoint: "wss://bsky.network/xrpc/com.atproto.sync.subscribeRepos".to_string(),
            backend: BackendKind::Cooperative,
        };
        let value: Value = serde_json::from_str(&event.to_text().expect("encode")).expect("json");
        assert_eq!(value["type"], "connected");
        assert_eq!(value["backend"], "cooperative");
        assert_eq!(value["at_ms"], 1_700_000_000_000u64);
    }

    #[test]
    fn saturated_throughput_encodes_null_rate() {
        let event = MonitorEvent::Throughput(ThroughputReport {
            at_ms: 5,
            events: 10,
            elapsed_secs: 0.0,
            rate: f64::INFINITY,
            saturated: true,
        });
        let value: Value = serde_json::from_str(&event.to_text().expect("encode")).expect("json");
        assert_eq!(value["type"], "throughput");
        assert_eq!(value["events"], 10);
        assert!(value["rate"].is_null());
        assert_eq!(value["saturated"], true);
    }

    #[test]
    fn closures_are_sinks() {
        use std::sync::{Arc, Mutex};

        use super::ReportSink;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |event: MonitorEvent| seen.lock().expect("lock").push(event)
        };
        sink.emit(MonitorEvent::StopRequested { at_ms: 1 });
        assert_eq!(
            *seen.lock().expect("lock"),
            vec![MonitorEvent::StopRequested { at_ms: 1 }]
        );
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() {
        use super::JsonLinesSink;

        let mut out = Vec::new();
        let sink = JsonLinesSink;
        sink.write_event(&mut out, &MonitorEvent::StopRequested { at_ms: 7 })
            .expect("write stop");
        sink.write_event(&mut out, &MonitorEvent::payload(1, &[0xff, 0x00], 8))
            .expect("write payload");

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert!(text.ends_with('\n'));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "stop_requested");
        assert_eq!(lines[0]["at_ms"], 7);
        assert_eq!(lines[1]["type"], "payload");
        assert_eq!(lines[1]["preview_hex"], "ff00");
    }
}
