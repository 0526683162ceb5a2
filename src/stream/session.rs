//! Single-connection stream session.
//!
//! `StreamSession` owns one connection from connect to close and drives the
//! receive loop. Sessions are single-use: once `Closed`, a new run needs a
//! new session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};
use url::Url;

use crate::error::FirehoseError;
use crate::stream::client::{Connection, StreamClientError, Transport};
use crate::stream::proto::FirehoseEndpoint;

/// Lifecycle of a [`StreamSession`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// Created, no connect attempted yet.
    Idle,
    /// Connect in flight.
    Connecting,
    /// Connection held; the receive loop may run.
    Streaming,
    /// Terminal.
    Closed,
}

/// How a session ended when it did not fail.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionOutcome {
    /// The remote end closed the stream.
    Completed,
    /// The cancellation signal was observed.
    Cancelled,
}

/// One-shot stop flag shared between a controller and a receive loop.
///
/// Once set it stays set; there is no way to clear it.
#[derive(Clone, Debug, Default)]
pub struct CancellationSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl CancellationSignal {
    /// Creates an unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a signal that is set whenever `self` is, but can also be set
    /// on its own without affecting `self`.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a guard that sets the signal when dropped, unless disarmed.
    pub fn drop_guard(&self) -> DropGuard {
        self.token.clone().drop_guard()
    }

    /// Sets the flag. Returns `true` only for the call that actually set it.
    pub fn cancel(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::SeqCst);
        self.token.cancel();
        first
    }

    /// Returns whether the signal is set.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the flag is set.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

/// Owns one connection to a stream endpoint.
pub struct StreamSession<T: Transport> {
    transport: T,
    endpoint: FirehoseEndpoint,
    connect_timeout: Option<Duration>,
    state: SessionState,
    connection: Option<T::Connection>,
}

impl<T: Transport> StreamSession<T> {
    /// Creates an idle session for `endpoint`.
    pub fn new(transport: T, endpoint: FirehoseEndpoint) -> Self {
        Self {
            transport,
            endpoint,
            connect_timeout: None,
            state: SessionState::Idle,
            connection: None,
        }
    }

    /// Bounds the connect step; expiry surfaces as a connection error.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns whether a connection handle is currently held.
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Opens the connection, passing the cursor as a resumption parameter.
    ///
    /// Failures are returned as [`FirehoseError::Connection`] and leave the
    /// session `Closed`; nothing is retried.
    pub async fn connect(&mut self) -> Result<Url, FirehoseError> {
        if self.state != SessionState::Idle {
            return Err(FirehoseError::Configuration(format!(
                "session cannot connect from {:?} state",
                self.state
            )));
        }
        self.state = SessionState::Connecting;

        let url = match self.endpoint.url() {
            Ok(url) => url,
            Err(err) => {
                self.state = SessionState::Closed;
                return Err(FirehoseError::Connection(err));
            }
        };
        debug!(event = "session_connecting", url = %url);

        let attempt = self.transport.connect(&url);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, attempt)
                .await
                .unwrap_or_else(|_| Err(StreamClientError::Timeout(limit))),
            None => attempt.await,
        };

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = SessionState::Streaming;
                debug!(event = "session_streaming", url = %url);
                Ok(url)
            }
            Err(err) => {
                self.state = SessionState::Closed;
                Err(FirehoseError::Connection(err))
            }
        }
    }

    /// Pulls payloads one at a time and hands each to `on_message`.
    ///
    /// The next receive is only issued after `on_message` returns, so a slow
    /// handler throttles the stream instead of growing a buffer. The signal
    /// is checked before every receive and wins any race with a pending one,
    /// so `on_message` never runs after cancellation has been observed.
    pub async fn receive_loop<F>(
        &mut self,
        cancel: &CancellationSignal,
        mut on_message: F,
    ) -> Result<SessionOutcome, FirehoseError>
    where
        F: FnMut(Vec<u8>),
    {
        let Some(connection) = self.connection.as_mut() else {
            return Err(FirehoseError::Configuration(
                "receive loop requires an open connection".to_string(),
            ));
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(SessionOutcome::Cancelled);
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(SessionOutcome::Cancelled),
                next = connection.recv() => next,
            };

            match next {
                Ok(Some(payload)) => on_message(payload),
                Ok(None) => return Ok(SessionOutcome::Completed),
                Err(err) => return Err(FirehoseError::Transport(err)),
            }
        }
    }

    /// Releases the connection, if any, and marks the session `Closed`.
    ///
    /// Safe to call when no connection was ever opened and safe to call
    /// repeatedly; the underlying close runs at most once.
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            if let Err(err) = connection.close().await {
                warn!(event = "session_close_failed", error = %err);
            }
            debug!(event = "session_closed");
        }
        self.state = SessionState::Closed;
    }

    /// Connects, runs the receive loop and closes on every exit path.
    ///
    /// A cancellation observed while connecting ends the run as
    /// [`SessionOutcome::Cancelled`] without a handle ever being held.
    pub async fn run<C, F>(
        &mut self,
        cancel: &CancellationSignal,
        on_connected: C,
        on_message: F,
    ) -> Result<SessionOutcome, FirehoseError>
    where
        C: FnOnce(&Url),
        F: FnMut(Vec<u8>),
    {
        let result = self.connect_and_stream(cancel, on_connected, on_message).await;
        self.close().await;
        result
    }

    async fn connect_and_stream<C, F>(
        &mut self,
        cancel: &CancellationSignal,
        on_connected: C,
        on_message: F,
    ) -> Result<SessionOutcome, FirehoseError>
    where
        C: FnOnce(&Url),
        F: FnMut(Vec<u8>),
    {
        let url = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SessionOutcome::Cancelled),
            connected = self.connect() => connected?,
        };
        on_connected(&url);
        self.receive_loop(cancel, on_message).await
    }
}
