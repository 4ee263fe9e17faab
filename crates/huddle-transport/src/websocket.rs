//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`]. Text frames are chat messages;
//! binary frames are accepted and decoded as UTF-8.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, MessageSink, MessageStream, TransportError};

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// An upgraded WebSocket connection.
pub struct WebSocketConnection {
    id: ConnectionId,
    socket: WebSocket,
    remote_addr: Option<SocketAddr>,
    max_message_size: usize,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            id: ConnectionId::generate(),
            socket,
            remote_addr: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }

    /// Record the peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the maximum accepted inbound message size.
    #[must_use]
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

impl Connection for WebSocketConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|a| a.to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let (sink, stream) = self.socket.split();
        let sink = WebSocketSink {
            id: self.id.clone(),
            sink,
            closed: false,
        };
        let stream = WebSocketStream {
            id: self.id,
            stream,
            max_message_size: self.max_message_size,
        };
        (Box::new(sink), Box::new(stream))
    }
}

/// Send half of a WebSocket connection.
pub struct WebSocketSink {
    id: ConnectionId,
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(connection = %self.id, bytes = text.len(), "Sending text frame");
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        debug!(connection = %self.id, "Closing WebSocket");
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {e}")))
    }
}

/// Receive half of a WebSocket connection.
pub struct WebSocketStream {
    id: ConnectionId,
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

#[async_trait]
impl MessageStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    check_size(text.len(), self.max_message_size)?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    check_size(data.len(), self.max_message_size)?;
                    return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Pings are answered by the WebSocket layer
                }
                Some(Ok(Message::Close(_))) => {
                    debug!(connection = %self.id, "Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "WebSocket error");
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!(connection = %self.id, "WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

fn check_size(size: usize, limit: usize) -> Result<(), TransportError> {
    if size > limit {
        warn!("Message too large: {} bytes (max: {})", size, limit);
        return Err(TransportError::FrameTooLarge { size, limit });
    }
    Ok(())
}
