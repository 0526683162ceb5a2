//! Throughput benchmark for relay event firehoses.
//!
//! The crate is organized by concern:
//! - `stream`: transport boundary, endpoint addressing and the
//!   single-connection session with its receive loop.
//! - `meter`: windowed events-per-second measurement.
//! - `report`: monitor events and the sinks that present them.
//! - `backend`: the reactor and cooperative execution backends.
//! - `controller`: configuration, wiring and the stop switch.

/// Execution backends.
pub mod backend;
/// Run configuration and top-level wiring.
pub mod controller;
/// Run-level error type.
pub mod error;
/// Throughput measurement.
pub mod meter;
/// Reporting boundary.
pub mod report;
/// Stream transport and session.
pub mod stream;

pub use backend::{BackendKind, RunSummary};
pub use controller::{Controller, FirehoseConfig, StopHandle};
pub use error::FirehoseError;
pub use stream::session::SessionOutcome;
