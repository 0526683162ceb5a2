//! Stream modules.
//!
//! - `client`: transport traits and the websocket transport.
//! - `proto`: relay endpoint addressing and resumption cursor.
//! - `session`: single-connection lifecycle, receive loop and cancellation.

/// Transport boundary and websocket implementation.
pub mod client;
/// Relay endpoint addressing.
pub mod proto;
/// Connection lifecycle and receive loop.
pub mod session;

#[cfg(test)]
pub(crate) mod mock;
