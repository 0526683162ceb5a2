//! Scripted in-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use url::Url;

use crate::stream::client::{Connection, StreamClientError, Transport};

/// One scripted receive result.
pub(crate) enum Step {
    Payload(Vec<u8>),
    Fail(&'static str),
    /// Blocks forever, like a relay that went quiet.
    Stall,
}

/// Counters shared between a transport and the test that built it.
#[derive(Clone, Default)]
pub(crate) struct Counters {
    connects: Arc<AtomicUsize>,
    recvs: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl Counters {
    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn recvs(&self) -> usize {
        self.recvs.load(Ordering::SeqCst)
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub(crate) struct ScriptedTransport {
    steps: Mutex<Option<Vec<Step>>>,
    connect_error: Option<&'static str>,
    stall_connect: bool,
    counters: Counters,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(Some(steps)),
            connect_error: None,
            stall_connect: false,
            counters: Counters::default(),
        }
    }

    pub(crate) fn failing(message: &'static str) -> Self {
        Self {
            connect_error: Some(message),
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn stalled_connect() -> Self {
        Self {
            stall_connect: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn counters(&self) -> Counters {
        self.counters.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Connection = ScriptedConnection;

    async fn connect(&self, _url: &Url) -> Result<ScriptedConnection, StreamClientError> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        if self.stall_connect {
            std::future::pending::<()>().await;
        }
        if let Some(message) = self.connect_error {
            return Err(StreamClientError::Protocol(message.to_string()));
        }
        let steps = self
            .steps
            .lock()
            .expect("steps lock")
            .take()
            .unwrap_or_default();
        Ok(ScriptedConnection {
            steps: steps.into(),
            counters: self.counters.clone(),
        })
    }
}

pub(crate) struct ScriptedConnection {
    steps: VecDeque<Step>,
    counters: Counters,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, StreamClientError> {
        self.counters.recvs.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Payload(payload)) => Ok(Some(payload)),
            Some(Step::Fail(message)) => Err(StreamClientError::Protocol(message.to_string())),
            Some(Step::Stall) => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), StreamClientError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
