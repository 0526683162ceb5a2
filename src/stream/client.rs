//! Transport boundary and the websocket implementation used against relays.
//!
//! A session needs three things from a transport: open a connection, pull the
//! next payload, and release the connection. [`WebSocketTransport`] provides
//! them on top of `tokio-tungstenite`; tests substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

/// Opens connections to a stream endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection handle produced by [`Transport::connect`].
    type Connection: Connection;

    /// Opens a connection to `url`.
    async fn connect(&self, url: &Url) -> Result<Self::Connection, StreamClientError>;
}

/// An open stream connection.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Waits for the next payload.
    ///
    /// Returns `Ok(None)` once the remote end has closed the stream.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, StreamClientError>;

    /// Releases the connection.
    async fn close(&mut self) -> Result<(), StreamClientError>;
}

/// Websocket transport for relay firehoses.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    async fn connect(&self, url: &Url) -> Result<WebSocketConnection, StreamClientError> {
        let (socket, response) = connect_async(url.as_str()).await?;
        debug!(
            event = "websocket_upgraded",
            status = response.status().as_u16()
        );
        Ok(WebSocketConnection { socket })
    }
}

/// Open websocket to a relay.
#[derive(Debug)]
pub struct WebSocketConnection {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WebSocketConnection {
    async fn recv(&mut self) -> Result<Option<Vec<u8>>, StreamClientError> {
        loop {
            match self.socket.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                // tungstenite queues the pong and flushes it on the next read.
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(event = "websocket_close_received", frame = ?frame);
                    return Ok(None);
                }
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(err)) => return Err(StreamClientError::WebSocket(err)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), StreamClientError> {
        match self.socket.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(StreamClientError::WebSocket(err)),
        }
    }
}

/// Errors produced by the transport layer.
#[derive(Debug, Error)]
pub enum StreamClientError {
    /// Websocket handshake or transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Endpoint could not be parsed as a URL.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),

    /// Connection was not established within the configured limit.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Stream protocol or endpoint contract error.
    #[error("protocol error: {0}")]
    Protocol(String),
}
