//! Per-connection relay loop.
//!
//! A relay owns the receive half of exactly one connection. It reads
//! messages until the connection fails, is closed, goes idle, or the hub is
//! shut down, broadcasting each one to its room as a chat line. Whatever the
//! reason, it then releases the member's seat, tells the rest of the room,
//! and closes the connection.

use crate::member::Identity;
use crate::room::Room;
use huddle_protocol::Event;
use huddle_transport::{ConnectionId, MessageStream, TransportError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Relay configuration.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    /// End the relay if no message arrives within this window.
    pub idle_timeout: Option<Duration>,
}

/// Why a relay stopped.
#[derive(Debug)]
pub enum RelayExit {
    /// The client closed the connection.
    PeerClosed,
    /// Receiving from the connection failed.
    ReceiveFailed(TransportError),
    /// The hub was shut down.
    Cancelled,
    /// No message arrived within the idle window.
    IdleTimeout,
}

impl RelayExit {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            RelayExit::PeerClosed => "peer_closed",
            RelayExit::ReceiveFailed(_) => "receive_failed",
            RelayExit::Cancelled => "cancelled",
            RelayExit::IdleTimeout => "idle_timeout",
        }
    }
}

impl fmt::Display for RelayExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayExit::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            other => f.write_str(other.reason()),
        }
    }
}

/// The message pump for one member's connection.
pub struct Relay {
    room: Arc<Room>,
    identity: Identity,
    connection: ConnectionId,
    stream: Box<dyn MessageStream>,
    shutdown: CancellationToken,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay for a member that has already joined `room` through
    /// `connection`.
    #[must_use]
    pub fn new(
        room: Arc<Room>,
        identity: Identity,
        connection: ConnectionId,
        stream: Box<dyn MessageStream>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            room,
            identity,
            connection,
            stream,
            shutdown,
            config: RelayConfig::default(),
        }
    }

    /// Set the relay configuration.
    #[must_use]
    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Run until the connection ends, then leave the room.
    pub async fn run(mut self) -> RelayExit {
        debug!(
            room = %self.room.id(),
            member = %self.identity.id,
            connection = %self.connection,
            "Relay started"
        );

        let exit = self.pump().await;
        self.finish(&exit).await;
        exit
    }

    async fn pump(&mut self) -> RelayExit {
        loop {
            let received = tokio::select! {
                biased;

                () = self.shutdown.cancelled() => return RelayExit::Cancelled,

                received = next_message(self.stream.as_mut(), self.config.idle_timeout) => received,
            };

            let Some(received) = received else {
                return RelayExit::IdleTimeout;
            };

            match received {
                Ok(Some(text)) => {
                    trace!(
                        room = %self.room.id(),
                        member = %self.identity.id,
                        bytes = text.len(),
                        "Relaying message"
                    );
                    let event = Event::chat(self.identity.name.as_str(), text);
                    self.room.broadcast_event(&event).await;
                }
                Ok(None) => return RelayExit::PeerClosed,
                Err(e) => return RelayExit::ReceiveFailed(e),
            }
        }
    }

    async fn finish(&mut self, exit: &RelayExit) {
        let notice = Event::left(self.identity.name.as_str());
        let released = self
            .room
            .depart(&self.identity.id, &self.connection, Some(&notice))
            .await;

        match released {
            Some(mut sink) => {
                if let Err(e) = sink.close().await {
                    debug!(connection = %self.connection, error = %e, "Close after leave failed");
                }
            }
            None => {
                debug!(
                    room = %self.room.id(),
                    member = %self.identity.id,
                    connection = %self.connection,
                    "Seat already released or taken over"
                );
            }
        }

        info!(
            room = %self.room.id(),
            member = %self.identity.id,
            connection = %self.connection,
            reason = %exit,
            "Relay finished"
        );
    }
}

/// `None` when the idle window elapsed before the stream produced anything.
async fn next_message(
    stream: &mut dyn MessageStream,
    idle_timeout: Option<Duration>,
) -> Option<Result<Option<String>, TransportError>> {
    match idle_timeout {
        Some(window) => tokio::time::timeout(window, stream.recv()).await.ok(),
        None => Some(stream.recv().await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomConfig;
    use huddle_transport::memory::{self, MemoryPeer};
    use huddle_transport::Connection;

    async fn start(
        room: &Arc<Room>,
        id: &str,
        shutdown: &CancellationToken,
        config: RelayConfig,
    ) -> (MemoryPeer, tokio::task::JoinHandle<RelayExit>) {
        let (conn, peer) = memory::pair();
        let conn_id = conn.id().clone();
        let (sink, stream) = Box::new(conn).split();
        room.join_announced(Identity::new(id), conn_id.clone(), sink)
            .await
            .unwrap();
        let relay = Relay::new(
            Arc::clone(room),
            Identity::new(id),
            conn_id,
            stream,
            shutdown.child_token(),
        )
        .with_config(config);
        (peer, tokio::spawn(relay.run()))
    }

    async fn next(peer: &mut MemoryPeer) -> String {
        tokio::time::timeout(Duration::from_secs(5), peer.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
    }

    #[tokio::test]
    async fn test_messages_keep_sender_order() {
        let room = Arc::new(Room::new("lobby", RoomConfig::default()));
        let shutdown = CancellationToken::new();
        let (alice, _h1) = start(&room, "alice", &shutdown, RelayConfig::default()).await;
        let (mut bob, _h2) = start(&room, "bob", &shutdown, RelayConfig::default()).await;

        for i in 0..20 {
            alice.send(format!("m{i}")).unwrap();
        }
        for i in 0..20 {
            assert_eq!(next(&mut bob).await, format!("alice: m{i}"));
        }
    }

    #[tokio::test]
    async fn test_peer_close_leaves_room() {
        let room = Arc::new(Room::new("lobby", RoomConfig::default()));
        let shutdown = CancellationToken::new();
        let (mut alice, handle) =
            start(&room, "alice", &shutdown, RelayConfig::default()).await;
        let (mut bob, _h2) = start(&room, "bob", &shutdown, RelayConfig::default()).await;
        assert_eq!(next(&mut alice).await, "bob joined the room!");

        alice.disconnect();
        assert!(matches!(handle.await.unwrap(), RelayExit::PeerClosed));

        assert_eq!(room.members().await, vec!["bob".to_string()]);
        assert_eq!(next(&mut bob).await, "alice left the room!");
        assert!(alice.is_closed());
    }

    #[tokio::test]
    async fn test_cancellation_runs_cleanup() {
        let room = Arc::new(Room::new("lobby", RoomConfig::default()));
        let shutdown = CancellationToken::new();
        let (alice, h1) = start(&room, "alice", &shutdown, RelayConfig::default()).await;
        let (bob, h2) = start(&room, "bob", &shutdown, RelayConfig::default()).await;

        shutdown.cancel();
        assert!(matches!(h1.await.unwrap(), RelayExit::Cancelled));
        assert!(matches!(h2.await.unwrap(), RelayExit::Cancelled));

        assert_eq!(room.member_count().await, 0);
        assert!(alice.is_closed());
        assert!(bob.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let room = Arc::new(Room::new("lobby", RoomConfig::default()));
        let shutdown = CancellationToken::new();
        let config = RelayConfig {
            idle_timeout: Some(Duration::from_secs(30)),
        };
        let (alice, handle) = start(&room, "alice", &shutdown, config).await;

        assert!(matches!(handle.await.unwrap(), RelayExit::IdleTimeout));
        assert!(!room.contains("alice").await);
        assert!(alice.is_closed());
    }

    /// A stream whose transport reports its own timeout.
    struct TimingOutStream;

    #[async_trait::async_trait]
    impl MessageStream for TimingOutStream {
        async fn recv(&mut self) -> Result<Option<String>, TransportError> {
            Err(TransportError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_transport_timeout_is_receive_failure() {
        let room = Arc::new(Room::new("lobby", RoomConfig::default()));
        let (conn, alice) = memory::pair();
        let conn_id = conn.id().clone();
        let (sink, _stream) = Box::new(conn).split();
        room.join(Identity::new("alice"), conn_id.clone(), sink)
            .await
            .unwrap();

        let exit = Relay::new(
            Arc::clone(&room),
            Identity::new("alice"),
            conn_id,
            Box::new(TimingOutStream),
            CancellationToken::new(),
        )
        .run()
        .await;

        assert!(matches!(
            exit,
            RelayExit::ReceiveFailed(TransportError::Timeout)
        ));
        assert!(!room.contains("alice").await);
        assert!(alice.is_closed());
    }

    #[test]
    fn test_exit_reason() {
        assert_eq!(RelayExit::PeerClosed.reason(), "peer_closed");
        let failed = RelayExit::ReceiveFailed(TransportError::ReceiveFailed("reset".into()));
        assert_eq!(failed.reason(), "receive_failed");
        assert_eq!(failed.to_string(), "receive failed: Receive failed: reset");
    }
}
