//! Binary chunk transport -- one bidirectional streaming connection per session.
//!
//! - [`Transport`] - ordered control/binary writes and a single inbound surface
//! - [`Connector`] - opens transports; [`open`] applies the connect timeout
//! - [`websocket`] - the production WebSocket implementation
//!
//! A transport does no retrying and no buffering of its own. Chunk pacing is
//! the protocol client's job and job sequencing is the batch's.

use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use crate::error::Result;

pub mod websocket;

pub use websocket::{WsConnector, WsTransport};

/// A message received from the remote side
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A text frame parsed as a JSON control message
    Control(serde_json::Value),
    /// A raw binary frame
    Binary(Vec<u8>),
}

/// One open streaming connection
///
/// Writes are ordered and never interleaved: each `send_*` call completes
/// (including flush) before the next one starts.
#[async_trait]
pub trait Transport: Send {
    /// Send a JSON control message as a text frame
    async fn send_control(&mut self, message: &serde_json::Value) -> Result<()>;

    /// Send one binary chunk
    async fn send_binary(&mut self, chunk: &[u8]) -> Result<()>;

    /// Wait for the next inbound message
    ///
    /// Returns `None` once the connection is closed, by either side.
    async fn recv(&mut self) -> Option<Result<Inbound>>;

    /// Close the connection; closing twice is a no-op
    async fn close(&mut self);
}

/// Opens transports for a session URL
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`
    ///
    /// Implementations do not need to apply a timeout; [`open`] does.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Why a transport could not be opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    /// The connection did not open within the timeout
    TimedOut(Duration),
    /// The connection attempt failed
    Failed(String),
}

impl std::fmt::Display for OpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenError::TimedOut(timeout) => {
                write!(f, "no connection after {} ms", timeout.as_millis())
            }
            OpenError::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Open a transport with a bounded timeout
pub async fn open(
    connector: &dyn Connector,
    url: &Url,
    timeout: Duration,
) -> std::result::Result<Box<dyn Transport>, OpenError> {
    match tokio::time::timeout(timeout, connector.connect(url)).await {
        Ok(Ok(transport)) => Ok(transport),
        Ok(Err(e)) => Err(OpenError::Failed(e.to_string())),
        Err(_) => Err(OpenError::TimedOut(timeout)),
    }
}
