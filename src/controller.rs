//! Top-level wiring for a benchmark run.
//!
//! A [`Controller`] validates the configuration, builds the meter and the
//! session, hands them to the selected backend and exposes the single stop
//! switch. One controller drives one run: once stopped it stays stopped, so
//! a caller that wants another attempt builds a new controller.

use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{
    BackendKind, ConcurrencyBackend, CooperativeBackend, ReactorBackend, RunSummary, SessionJob,
};
use crate::error::FirehoseError;
use crate::meter::ThroughputMeter;
use crate::report::{now_ms, MonitorEvent, ReportSink};
use crate::stream::client::{Transport, WebSocketTransport};
use crate::stream::proto::FirehoseEndpoint;
use crate::stream::session::{CancellationSignal, StreamSession};

/// Default run settings.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FirehoseDefaults;

impl FirehoseDefaults {
    /// Messages per throughput report.
    pub const WINDOW_SIZE: u64 = 30_000;
    /// Upper bound on the connect step.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Settings for one run.
#[derive(Clone, Debug)]
pub struct FirehoseConfig {
    /// Where the session runs.
    pub backend: BackendKind,
    /// Relay address and cursor.
    pub endpoint: FirehoseEndpoint,
    /// Messages per throughput report. Must be positive.
    pub window_size: u64,
    /// `None` waits for the transport's own connect outcome.
    pub connect_timeout: Option<Duration>,
    /// Leading payload bytes to preview; `None` disables inspection.
    pub inspect_bytes: Option<usize>,
}

impl Default for FirehoseConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            endpoint: FirehoseEndpoint::default(),
            window_size: FirehoseDefaults::WINDOW_SIZE,
            connect_timeout: Some(FirehoseDefaults::CONNECT_TIMEOUT),
            inspect_bytes: None,
        }
    }
}

impl FirehoseConfig {
    /// Selects the execution backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the relay endpoint.
    pub fn with_endpoint(mut self, endpoint: FirehoseEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Sets the messages per report; validated at start.
    pub fn with_window_size(mut self, window_size: u64) -> Self {
        self.window_size = window_size;
        self
    }

    /// Bounds the connect step; `None` disables the bound.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enables payload previews of up to `bytes` leading bytes.
    pub fn with_inspection(mut self, bytes: Option<usize>) -> Self {
        self.inspect_bytes = bytes;
        self
    }

    /// Checks the settings and returns the window size.
    pub fn validate(&self) -> Result<NonZeroU64, FirehoseError> {
        let window = NonZeroU64::new(self.window_size).ok_or_else(|| {
            FirehoseError::Configuration("window size must be a positive integer".to_string())
        })?;
        if self.connect_timeout.is_some_and(|timeout| timeout.is_zero()) {
            return Err(FirehoseError::Configuration(
                "connect timeout must be greater than zero".to_string(),
            ));
        }
        self.endpoint
            .url()
            .map_err(|err| FirehoseError::Configuration(format!("endpoint: {err}")))?;
        Ok(window)
    }
}

/// Parses a window size given as text, rejecting zero and negative values.
pub fn parse_window_size(value: &str) -> Result<u64, FirehoseError> {
    match value.trim().parse::<i64>() {
        Ok(window) if window > 0 => Ok(window as u64),
        _ => Err(FirehoseError::Configuration(format!(
            "window size must be a positive integer, got {value:?}"
        ))),
    }
}

/// Cloneable stop switch, safe to call from any thread or signal task.
#[derive(Clone)]
pub struct StopHandle {
    cancel: CancellationSignal,
    sink: Arc<dyn ReportSink>,
}

impl StopHandle {
    /// Requests the run to end. Only the first call has any effect.
    pub fn stop(&self) {
        if self.cancel.cancel() {
            debug!(event = "stop_requested");
            self.sink.emit(MonitorEvent::StopRequested { at_ms: now_ms() });
        }
    }

    /// Returns whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Runs one benchmark and owns its stop switch.
pub struct Controller {
    sink: Arc<dyn ReportSink>,
    stop: StopHandle,
}

impl Controller {
    /// Creates a controller reporting to `sink`.
    pub fn new(sink: Arc<dyn ReportSink>) -> Self {
        let stop = StopHandle {
            cancel: CancellationSignal::new(),
            sink: Arc::clone(&sink),
        };
        Self { sink, stop }
    }

    /// Returns a handle that can stop this controller's run.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Sets the cancellation signal; idempotent.
    ///
    /// An open connection is released by the receive loop as soon as it
    /// observes the signal.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Returns whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Runs against the relay over websocket.
    pub async fn start(&self, config: &FirehoseConfig) -> Result<RunSummary, FirehoseError> {
        self.start_with_transport(config, WebSocketTransport).await
    }

    /// Runs with `transport`, on the backend named by `config.backend`.
    pub async fn start_with_transport<T: Transport>(
        &self,
        config: &FirehoseConfig,
        transport: T,
    ) -> Result<RunSummary, FirehoseError> {
        match config.backend {
            BackendKind::Reactor => {
                let backend = ReactorBackend::current()?;
                self.start_on(&backend, config, transport).await
            }
            BackendKind::Cooperative => {
                self.start_on(&CooperativeBackend::new(), config, transport)
                    .await
            }
        }
    }

    /// Runs with an explicit backend instance, e.g. a reactor sharing a
    /// caller-owned runtime.
    ///
    /// The run follows this controller's stop switch. Dropping the returned
    /// future cancels the run without stopping the controller.
    pub async fn start_on<B, T>(
        &self,
        backend: &B,
        config: &FirehoseConfig,
        transport: T,
    ) -> Result<RunSummary, FirehoseError>
    where
        B: ConcurrencyBackend,
        T: Transport,
    {
        let window = config.validate()?;
        info!(
            event = "run_starting",
            backend = %backend.kind(),
            window = window.get(),
            relay = config.endpoint.relay(),
            cursor = config.endpoint.cursor().unwrap_or("")
        );

        let meter = ThroughputMeter::new(window, Arc::clone(&self.sink));
        let mut session = StreamSession::new(transport, config.endpoint.clone());
        if let Some(timeout) = config.connect_timeout {
            session = session.with_connect_timeout(timeout);
        }
        let job = SessionJob::new(
            session,
            meter,
            Arc::clone(&self.sink),
            self.stop.cancel.child(),
        )
        .with_inspection(config.inspect_bytes);

        let result = backend.execute(job).await;
        match &result {
            Ok(summary) => info!(
                event = "run_finished",
                outcome = ?summary.outcome,
                messages = summary.messages
            ),
            Err(err) => warn!(event = "run_failed", error = %err),
        }
        result
    }
}
