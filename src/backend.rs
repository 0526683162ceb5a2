//! Execution backends for a run.
//!
//! Both backends execute the same [`SessionJob`]; they differ only in where
//! the receive loop is scheduled:
//! - [`ReactorBackend`] spawns it as a task on an existing multi-threaded
//!   tokio runtime that may be shared with other work.
//! - [`CooperativeBackend`] creates a current-thread scheduler on a dedicated
//!   OS thread for this run and blocks on the job as its only task.
//!
//! In both cases the job outlives the future that awaits it, so `execute`
//! holds a drop guard on the job's signal: abandoning the future cancels the
//! run and the session releases its connection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::DropGuard;
use tracing::debug;

use crate::error::FirehoseError;
use crate::meter::ThroughputMeter;
use crate::report::{now_ms, MonitorEvent, ReportSink};
use crate::stream::client::Transport;
use crate::stream::session::{CancellationSignal, SessionOutcome, StreamSession};

const COOPERATIVE_THREAD_NAME: &str = "firehose-cooperative";

/// Selects the execution backend.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Task on a shared multi-threaded runtime.
    #[default]
    Reactor,
    /// Dedicated current-thread scheduler.
    Cooperative,
}

impl BackendKind {
    /// Canonical lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            BackendKind::Reactor => "reactor",
            BackendKind::Cooperative => "cooperative",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = FirehoseError;

    /// Accepts `reactor`/`cooperative` and the engine names `eventmachine`
    /// and `async`, case-insensitively.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reactor" | "eventmachine" => Ok(BackendKind::Reactor),
            "cooperative" | "async" => Ok(BackendKind::Cooperative),
            _ => Err(FirehoseError::Configuration(format!(
                "unknown engine type: {value:?}"
            ))),
        }
    }
}

/// Terminal result of a run that did not fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RunSummary {
    /// How the session ended.
    pub outcome: SessionOutcome,
    /// Payloads handed to the message handler.
    pub messages: u64,
    /// Backend that executed the run.
    pub backend: BackendKind,
}

/// Everything one run needs: session, meter, sink and stop signal.
pub struct SessionJob<T: Transport> {
    session: StreamSession<T>,
    meter: ThroughputMeter,
    sink: Arc<dyn ReportSink>,
    cancel: CancellationSignal,
    inspect_bytes: Option<usize>,
}

impl<T: Transport> SessionJob<T> {
    /// Bundles a run; inspection is off.
    pub fn new(
        session: StreamSession<T>,
        meter: ThroughputMeter,
        sink: Arc<dyn ReportSink>,
        cancel: CancellationSignal,
    ) -> Self {
        Self {
            session,
            meter,
            sink,
            cancel,
            inspect_bytes: None,
        }
    }

    /// Emits a hex preview of up to `bytes` leading bytes of every payload.
    pub fn with_inspection(mut self, bytes: Option<usize>) -> Self {
        self.inspect_bytes = bytes;
        self
    }

    /// Guard that cancels this job's signal when dropped.
    fn abandon_guard(&self) -> DropGuard {
        self.cancel.drop_guard()
    }

    /// Runs the session to completion in the caller's execution context.
    pub async fn run(mut self, backend: BackendKind) -> Result<RunSummary, FirehoseError> {
        let sink = &self.sink;
        let meter = &mut self.meter;
        let inspect_bytes = self.inspect_bytes;
        let mut messages = 0u64;

        let outcome = self
            .session
            .run(
                &self.cancel,
                |url| {
                    sink.emit(MonitorEvent::Connected {
                        at_ms: now_ms(),
                        endpoint: url.to_string(),
                        backend,
                    })
                },
                |payload| {
                    messages += 1;
                    if let Some(limit) = inspect_bytes {
                        sink.emit(MonitorEvent::payload(messages, &payload, limit));
                    }
                    meter.record();
                },
            )
            .await?;

        Ok(RunSummary {
            outcome,
            messages,
            backend,
        })
    }
}

/// Supplies the execution context for a [`SessionJob`].
#[async_trait]
pub trait ConcurrencyBackend: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Runs `job` to completion or cancellation.
    ///
    /// Dropping the returned future before it resolves cancels the job.
    async fn execute<T: Transport>(&self, job: SessionJob<T>) -> Result<RunSummary, FirehoseError>;
}

/// Runs the job as a task on an existing tokio runtime.
#[derive(Clone, Debug)]
pub struct ReactorBackend {
    handle: Handle,
}

impl ReactorBackend {
    /// Uses the runtime identified by `handle`, which may be shared.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> Result<Self, FirehoseError> {
        Handle::try_current().map(Self::new).map_err(|err| {
            FirehoseError::Runtime(format!("reactor backend needs a running tokio runtime: {err}"))
        })
    }
}

#[async_trait]
impl ConcurrencyBackend for ReactorBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Reactor
    }

    async fn execute<T: Transport>(&self, job: SessionJob<T>) -> Result<RunSummary, FirehoseError> {
        debug!(event = "backend_spawn", backend = %self.kind());
        let guard = job.abandon_guard();
        let task = self.handle.spawn(job.run(self.kind()));
        let result = task.await;
        guard.disarm();
        result.map_err(|err| FirehoseError::Runtime(format!("reactor task failed: {err}")))?
    }
}

/// Runs the job on a scheduler created for this run alone.
#[derive(Clone, Debug)]
pub struct CooperativeBackend {
    thread_name: String,
}

impl CooperativeBackend {
    /// Uses the default scheduler thread name.
    pub fn new() -> Self {
        Self {
            thread_name: COOPERATIVE_THREAD_NAME.to_string(),
        }
    }

    /// Names the scheduler thread.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for CooperativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConcurrencyBackend for CooperativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cooperative
    }

    async fn execute<T: Transport>(&self, job: SessionJob<T>) -> Result<RunSummary, FirehoseError> {
        let (result_tx, result_rx) = oneshot::channel();
        let kind = self.kind();

        debug!(event = "backend_spawn", backend = %kind, thread = %self.thread_name);
        let guard = job.abandon_guard();
        std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let result = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(scheduler) => scheduler.block_on(job.run(kind)),
                    Err(err) => Err(FirehoseError::Runtime(format!(
                        "failed to build cooperative scheduler: {err}"
                    ))),
                };
                let _ = result_tx.send(result);
            })
            .map_err(|err| {
                FirehoseError::Runtime(format!("failed to spawn scheduler thread: {err}"))
            })?;

        let result = result_rx.await;
        guard.disarm();
        result.map_err(|_| {
            FirehoseError::Runtime("cooperative scheduler stopped without a result".to_string())
        })?
    }
}
