//! WebSocket transport: text frames for JSON control messages, binary frames for chunks.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Connector, Inbound, Transport};
use crate::error::Result;

/// Production [`Connector`] opening WebSocket connections
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        tracing::debug!(
            status = response.status().as_u16(),
            host = url.host_str().unwrap_or_default(),
            "WebSocket session opened"
        );
        Ok(Box::new(WsTransport {
            stream,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// One open WebSocket session
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_control(&mut self, message: &serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(message)?;
        tracing::trace!(message = %text, "Sending control frame");
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn send_binary(&mut self, chunk: &[u8]) -> Result<()> {
        self.stream.send(Message::binary(chunk.to_vec())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Inbound>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(
                        serde_json::from_str(text.as_str())
                            .map(Inbound::Control)
                            .map_err(Into::into),
                    );
                }
                Ok(Message::Binary(bytes)) => return Some(Ok(Inbound::Binary(bytes.to_vec()))),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(frame = ?frame, "Remote closed WebSocket session");
                    self.closed = true;
                    return None;
                }
                // Pings are answered by tungstenite on the next read or write
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    self.closed = true;
                    return None;
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}
