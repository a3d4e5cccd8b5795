//! Relay connections.
//!
//! The coordinator never touches a socket directly. It asks a [`Connector`]
//! for a [`RelayTransport`] per relay URL and exchanges decoded frames with
//! it. [`WsConnector`] is the production implementation over WebSockets.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message as WsMessage,
};
use tracing::{debug, trace};

use crate::error::RelayError;
use crate::message::{ClientMessage, MessageError, RelayMessage};

/// Default time allowed for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One open connection to one relay.
#[async_trait]
pub trait RelayTransport: Send {
    /// Relay URL this transport is connected to.
    fn url(&self) -> &str;

    async fn send(&mut self, message: &ClientMessage) -> Result<(), RelayError>;

    /// Next decoded frame. `Ok(None)` means the relay closed the connection.
    ///
    /// A frame that fails to decode is reported as [`RelayError::Codec`];
    /// the connection stays usable.
    async fn recv(&mut self) -> Result<Option<RelayMessage>, RelayError>;

    async fn close(&mut self) -> Result<(), RelayError>;
}

/// Opens transports by URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayTransport>, RelayError>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Connects to relays over `ws://` / `wss://`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    pub const fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayTransport>, RelayError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(RelayError::Connect {
                url: url.to_string(),
                reason: "relay URLs must use ws:// or wss://".into(),
            });
        }

        let handshake = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| RelayError::Timeout {
                url: url.to_string(),
                waited: self.connect_timeout,
            })?;
        let (stream, _response) = handshake.map_err(|e| RelayError::Connect {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        debug!(relay = url, "connected");
        Ok(Box::new(WsTransport {
            url: url.to_string(),
            stream,
        }))
    }
}

struct WsTransport {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    fn transport_error(&self, err: impl std::fmt::Display) -> RelayError {
        RelayError::Transport {
            url: self.url.clone(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl RelayTransport for WsTransport {
    fn url(&self) -> &str {
        &self.url
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), RelayError> {
        let frame = message.to_json()?;
        trace!(relay = %self.url, frame = %frame, "send");
        self.stream
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| self.transport_error(e))
    }

    async fn recv(&mut self) -> Result<Option<RelayMessage>, RelayError> {
        loop {
            let Some(next) = self.stream.next().await else {
                return Ok(None);
            };
            let message = next.map_err(|e| self.transport_error(e))?;
            match message {
                WsMessage::Text(text) => return Ok(Some(RelayMessage::parse(text.as_str())?)),
                WsMessage::Binary(bytes) => {
                    let text = std::str::from_utf8(&bytes).map_err(|_| MessageError::Shape {
                        kind: "frame".into(),
                        reason: "binary frame is not UTF-8",
                    })?;
                    return Ok(Some(RelayMessage::parse(text)?));
                }
                WsMessage::Close(_) => return Ok(None),
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), RelayError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            // Closing an already closed socket is not an error worth reporting.
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(e) => Err(self.transport_error(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_websocket_urls_are_refused() {
        let connector = WsConnector::default();
        let Err(err) = connector.connect("https://relay.example").await else {
            panic!("http URL must not connect");
        };
        assert!(matches!(err, RelayError::Connect { .. }));
        assert!(err.to_string().contains("ws://"));
    }

    #[tokio::test]
    async fn unreachable_relay_fails_to_connect() {
        // Port 9 on localhost is discard; nothing listens there in CI.
        let connector = WsConnector::new(Duration::from_secs(2));
        let result = connector.connect("ws://127.0.0.1:9").await;
        assert!(matches!(
            result,
            Err(RelayError::Connect { .. } | RelayError::Timeout { .. })
        ));
    }
}
