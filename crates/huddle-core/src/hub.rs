//! The hub: room operations exposed to the HTTP layer.
//!
//! Identity resolution, room-id generation and the WebSocket upgrade happen
//! outside; the hub receives their results and drives the core.

use crate::member::{Identity, MemberId};
use crate::registry::{RegistryConfig, RegistryError, RegistryStats, RoomRegistry};
use crate::relay::{Relay, RelayConfig, RelayExit};
use crate::room::{Room, RoomError, RoomId};
use huddle_protocol::api::MemberInfo;
use huddle_transport::Connection;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Registry-level failure (unknown room, id conflicts, limits).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Room-level failure (member conflicts, limits).
    #[error(transparent)]
    Room(#[from] RoomError),

    /// The hub is shutting down and accepts no new members.
    #[error("Hub is shutting down")]
    ShuttingDown,
}

impl HubError {
    /// Check whether this error means the room does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::Registry(RegistryError::NotFound(_)))
    }
}

/// Hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Registry and per-room settings.
    pub registry: RegistryConfig,
    /// Relay loop settings.
    pub relay: RelayConfig,
}

/// Entry point for creating, joining and inspecting rooms.
pub struct Hub {
    registry: RoomRegistry,
    relay: RelayConfig,
    shutdown: CancellationToken,
}

impl Hub {
    /// Create a hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        Self {
            registry: RoomRegistry::with_config(config.registry),
            relay: config.relay,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get the underlying registry.
    #[must_use]
    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    /// Create a room with a caller-chosen id.
    ///
    /// # Errors
    ///
    /// See [`RoomRegistry::create`].
    pub fn create_room(&self, id: impl Into<RoomId>) -> Result<Arc<Room>, HubError> {
        Ok(self.registry.create(id)?)
    }

    /// Create a room with an id from `generate`.
    ///
    /// # Errors
    ///
    /// See [`RoomRegistry::create_with`].
    pub fn create_room_with<F>(&self, generate: F) -> Result<Arc<Room>, HubError>
    where
        F: FnMut() -> RoomId,
    {
        Ok(self.registry.create_with(generate)?)
    }

    /// Look up a room.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the room does not exist.
    pub fn lookup(&self, room_id: &str) -> Result<Arc<Room>, HubError> {
        Ok(self.registry.lookup(room_id)?)
    }

    /// Join `connection` to a room and start its relay loop.
    ///
    /// The member is registered and everyone else in the room is told before
    /// this returns. The returned handle resolves when the relay ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist (nothing is registered),
    /// the room refuses the member, or the hub is shutting down.
    pub async fn join(
        &self,
        room_id: &str,
        identity: Identity,
        connection: Box<dyn Connection>,
    ) -> Result<JoinHandle<RelayExit>, HubError> {
        if self.shutdown.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let room = self.registry.lookup(room_id)?;
        let connection_id = connection.id().clone();
        let (sink, stream) = connection.split();

        room.join_announced(identity.clone(), connection_id.clone(), sink)
            .await?;

        info!(
            room = %room_id,
            member = %identity.id,
            connection = %connection_id,
            "Member joined room"
        );

        let relay = Relay::new(
            room,
            identity,
            connection_id,
            stream,
            self.shutdown.child_token(),
        )
        .with_config(self.relay.clone());

        Ok(tokio::spawn(relay.run()))
    }

    /// Snapshot of a room's member ids.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the room does not exist.
    pub async fn list_members(&self, room_id: &str) -> Result<Vec<MemberId>, HubError> {
        let room = self.registry.lookup(room_id)?;
        Ok(room.members().await)
    }

    /// Snapshot of a room's members with names and join times.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the room does not exist.
    pub async fn roster(&self, room_id: &str) -> Result<Vec<MemberInfo>, HubError> {
        let room = self.registry.lookup(room_id)?;
        Ok(room.roster().await)
    }

    /// Get hub statistics.
    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Stop every relay loop. Each one leaves its room and closes its
    /// connection; further joins are refused.
    pub fn shutdown(&self) {
        debug!("Hub shutdown requested");
        self.shutdown.cancel();
    }

    /// Check whether shutdown has been requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
