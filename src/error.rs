use thiserror::Error;

use crate::stream::client::StreamClientError;

/// Errors that end a run.
///
/// Cancellation is not an error; it is reported as
/// [`SessionOutcome::Cancelled`](crate::stream::session::SessionOutcome).
#[derive(Debug, Error)]
pub enum FirehoseError {
    /// DNS, TCP or handshake failure while connecting. Not retried.
    #[error("connection failed: {0}")]
    Connection(#[source] StreamClientError),

    /// Failure while receiving on an established connection.
    #[error("transport failed: {0}")]
    Transport(#[source] StreamClientError),

    /// Invalid backend selector, window size or endpoint.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Execution backend could not be created or its task died.
    #[error("runtime error: {0}")]
    Runtime(String),
}
