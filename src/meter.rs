//! Windowed throughput measurement.
//!
//! [`ThroughputMeter`] turns a stream of "message arrived" events into one
//! rate report per `window` events. It holds only a counter and a window
//! start, so memory stays constant however long the run lasts.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::report::{now_ms, MonitorEvent, ReportSink};

/// Rate observed over one completed window.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThroughputReport {
    /// Wall-clock time of the report, unix milliseconds.
    pub at_ms: u64,
    /// Messages in the window; always the configured window size.
    pub events: u64,
    /// Time between the window's first and last message.
    pub elapsed_secs: f64,
    /// Events per second. `f64::INFINITY` when `saturated`.
    pub rate: f64,
    /// The window filled within a single clock tick.
    pub saturated: bool,
}

impl ThroughputReport {
    fn new(events: u64, elapsed: Duration) -> Self {
        Self {
            at_ms: now_ms(),
            events,
            elapsed_secs: elapsed.as_secs_f64(),
            rate: rate_per_sec(events, elapsed),
            saturated: elapsed.is_zero(),
        }
    }
}

/// Events per second over `elapsed`.
///
/// A window that fills without any measurable elapsed time has no finite
/// rate; it is reported as `f64::INFINITY` rather than dividing by zero.
pub fn rate_per_sec(events: u64, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return f64::INFINITY;
    }
    events as f64 / elapsed.as_secs_f64()
}

/// Counts messages and emits a [`ThroughputReport`] every `window` messages.
///
/// Owned by the message path of a single run and never shared.
pub struct ThroughputMeter {
    window: NonZeroU64,
    count: u64,
    window_start: Option<Instant>,
    total: u64,
    reports: u64,
    sink: Arc<dyn ReportSink>,
}

impl ThroughputMeter {
    /// Creates a meter that reports to `sink` every `window` messages.
    pub fn new(window: NonZeroU64, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            window,
            count: 0,
            window_start: None,
            total: 0,
            reports: 0,
            sink,
        }
    }

    /// Messages counted in the current, incomplete window.
    pub fn pending(&self) -> u64 {
        self.count
    }

    /// Messages recorded since creation.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Reports emitted since creation.
    pub fn reports(&self) -> u64 {
        self.reports
    }

    /// Records one message arriving now.
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    /// Records one message arriving at `now`.
    ///
    /// The first call starts the first window, so meter construction is not
    /// part of the first measurement. When the window fills, the report is
    /// emitted and the count and window start reset together.
    pub fn record_at(&mut self, now: Instant) {
        let start = *self.window_start.get_or_insert(now);
        self.count += 1;
        self.total += 1;
        if self.count < self.window.get() {
            return;
        }

        let report = ThroughputReport::new(self.count, now.saturating_duration_since(start));
        self.count = 0;
        self.window_start = Some(now);
        self.reports += 1;
        self.sink.emit(MonitorEvent::Throughput(report));
    }
}
