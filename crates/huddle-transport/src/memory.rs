//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the [`MemoryPeer`]
//! that plays the client. Useful for tests and for embedding rooms inside a
//! single process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionId, MessageSink, MessageStream, TransportError};

enum Inbound {
    Message(String),
    Fail(String),
}

/// Create a connected server/client pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (to_peer, from_server) = mpsc::unbounded_channel();
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let conn = MemoryConnection {
        id: ConnectionId::generate(),
        to_peer,
        from_peer,
        closed: Arc::clone(&closed),
    };
    let peer = MemoryPeer {
        to_server: Some(to_server),
        from_server,
        closed,
    };
    (conn, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    to_peer: mpsc::UnboundedSender<String>,
    from_peer: mpsc::UnboundedReceiver<Inbound>,
    closed: Arc<AtomicBool>,
}

impl Connection for MemoryConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }

    fn split(self: Box<Self>) -> (Box<dyn MessageSink>, Box<dyn MessageStream>) {
        let sink = MemorySink {
            to_peer: Some(self.to_peer),
            closed: self.closed,
        };
        let stream = MemoryStream {
            from_peer: self.from_peer,
        };
        (Box::new(sink), Box::new(stream))
    }
}

struct MemorySink {
    to_peer: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let tx = self.to_peer.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text.to_owned())
            .map_err(|_| TransportError::SendFailed("peer stopped reading".into()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        // Dropping the sender lets the peer drain what was already delivered
        self.to_peer = None;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryStream {
    from_peer: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        match self.from_peer.recv().await {
            Some(Inbound::Message(text)) => Ok(Some(text)),
            Some(Inbound::Fail(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<Inbound>>,
    from_server: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a message to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer disconnected or the server dropped its
    /// receive half.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let tx = self.to_server.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(Inbound::Message(text.into()))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Make the server's next receive fail with the given reason.
    pub fn fail(&self, reason: impl Into<String>) {
        if let Some(tx) = &self.to_server {
            let _ = tx.send(Inbound::Fail(reason.into()));
        }
    }

    /// Close the client side cleanly.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Stop accepting messages from the server; later sends to this peer fail.
    pub fn stop_reading(&mut self) {
        self.from_server.close();
    }

    /// Wait for the next message from the server.
    ///
    /// Returns `None` once the server closed the connection and everything
    /// already sent has been received.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_server.recv().await
    }

    /// Take every message that is already queued.
    pub fn drain(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = self.from_server.try_recv() {
            out.push(msg);
        }
        out
    }

    /// Check whether the server closed the connection.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_roundtrip() {
        let (conn, mut peer) = pair();
        let (mut sink, mut stream) = Box::new(conn).split();

        peer.send("hello").unwrap();
        assert_eq!(stream.recv().await.unwrap().as_deref(), Some("hello"));

        sink.send("world").await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("world"));
    }

    #[tokio::test]
    async fn test_fail_and_disconnect() {
        let (conn, mut peer) = pair();
        let (_sink, mut stream) = Box::new(conn).split();

        peer.fail("boom");
        assert!(matches!(
            stream.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));

        peer.disconnect();
        assert!(stream.recv().await.unwrap().is_none());
        assert!(peer.send("late").is_err());
    }

    #[tokio::test]
    async fn test_close_and_stop_reading() {
        let (conn, mut peer) = pair();
        let (mut sink, _stream) = Box::new(conn).split();

        sink.send("last").await.unwrap();
        sink.close().await.unwrap();
        assert!(peer.is_closed());
        assert_eq!(peer.recv().await.as_deref(), Some("last"));
        assert!(peer.recv().await.is_none());
        assert!(matches!(
            sink.send("again").await,
            Err(TransportError::ConnectionClosed)
        ));

        let (conn, mut peer) = pair();
        let (mut sink, _stream) = Box::new(conn).split();
        peer.stop_reading();
        assert!(matches!(
            sink.send("lost").await,
            Err(TransportError::SendFailed(_))
        ));
    }
}
