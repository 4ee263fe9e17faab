//! Rooms: membership and broadcast.
//!
//! A room owns the send half of every member's connection. One async mutex
//! guards the membership map, and every broadcast runs its whole fan-out
//! while holding it, so a broadcast never observes a half-applied join or
//! leave and broadcasts to one room are totally ordered.

use crate::member::{now_millis, validate_member_id, Identity, MemberId};
use huddle_protocol::api::MemberInfo;
use huddle_protocol::{Event, WireFormat};
use huddle_transport::{ConnectionId, MessageSink, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, trace, warn};

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Default bound on a single outgoing send during broadcast.
const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// A room identifier.
pub type RoomId = String;

/// Validate a room id.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("Room id too long");
    }
    if id.starts_with('$') {
        return Err("Room ids starting with '$' are reserved");
    }
    if !id.chars().all(|c| !c.is_control() && c != '/') {
        return Err("Room id contains invalid characters");
    }
    Ok(())
}

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid member identifier.
    #[error("Invalid member id: {0}")]
    InvalidMember(&'static str),

    /// Member id already present and duplicates are rejected.
    #[error("Member already in room: {0}")]
    MemberExists(MemberId),

    /// Room is at its member limit.
    #[error("Room is full ({0} members)")]
    Full(usize),
}

/// What a join does when the member id is already present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// The new connection takes over the membership; the old one is closed.
    #[default]
    Replace,
    /// The join fails and the new connection is closed.
    Reject,
}

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Behavior on duplicate member ids.
    pub on_duplicate: DuplicatePolicy,
    /// Rendering of relayed events.
    pub wire_format: WireFormat,
    /// Maximum concurrent members (0 = unlimited).
    pub max_members: usize,
    /// Bound on each outgoing send during broadcast.
    pub send_timeout: Option<Duration>,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            on_duplicate: DuplicatePolicy::Replace,
            wire_format: WireFormat::Text,
            max_members: 0,
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
        }
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the message was handed to.
    pub delivered: usize,
    /// Members whose send failed.
    pub failed: usize,
}

/// A member's registration.
struct Seat {
    name: String,
    connection: ConnectionId,
    sink: Box<dyn MessageSink>,
    joined_at: u64,
}

/// A named broadcast domain.
pub struct Room {
    id: RoomId,
    config: RoomConfig,
    members: Mutex<HashMap<MemberId, Seat>>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(id: impl Into<RoomId>, config: RoomConfig) -> Self {
        Self {
            id: id.into(),
            config,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the room configuration.
    #[must_use]
    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// Register `sink` under the identity's member id.
    ///
    /// Returns `true` if an earlier connection with the same member id was
    /// displaced (see [`DuplicatePolicy`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the member id is invalid, duplicates are rejected,
    /// or the room is full. The offered sink is closed in that case.
    pub async fn join(
        &self,
        identity: Identity,
        connection: ConnectionId,
        sink: Box<dyn MessageSink>,
    ) -> Result<bool, RoomError> {
        self.admit(identity, connection, sink, false).await
    }

    /// Register a member and notify everyone else, under one lock acquisition.
    ///
    /// The joiner does not receive its own "joined" notice.
    ///
    /// # Errors
    ///
    /// Same as [`Room::join`].
    pub async fn join_announced(
        &self,
        identity: Identity,
        connection: ConnectionId,
        sink: Box<dyn MessageSink>,
    ) -> Result<bool, RoomError> {
        self.admit(identity, connection, sink, true).await
    }

    async fn admit(
        &self,
        identity: Identity,
        connection: ConnectionId,
        mut sink: Box<dyn MessageSink>,
        announce: bool,
    ) -> Result<bool, RoomError> {
        if let Err(reason) = validate_member_id(&identity.id) {
            close_quietly(sink.as_mut()).await;
            return Err(RoomError::InvalidMember(reason));
        }

        let displaced = {
            let mut members = self.members.lock().await;
            let present = members.contains_key(&identity.id);

            let rejection = if present && self.config.on_duplicate == DuplicatePolicy::Reject {
                Some(RoomError::MemberExists(identity.id.clone()))
            } else if !present
                && self.config.max_members > 0
                && members.len() >= self.config.max_members
            {
                Some(RoomError::Full(self.config.max_members))
            } else {
                None
            };

            if let Some(err) = rejection {
                drop(members);
                warn!(room = %self.id, member = %identity.id, error = %err, "Join refused");
                close_quietly(sink.as_mut()).await;
                return Err(err);
            }

            let seat = Seat {
                name: identity.name.clone(),
                connection: connection.clone(),
                sink,
                joined_at: now_millis(),
            };
            let displaced = members.insert(identity.id.clone(), seat);

            debug!(
                room = %self.id,
                member = %identity.id,
                connection = %connection,
                members = members.len(),
                "Member joined"
            );

            if announce {
                if let Some(text) = self.render(&Event::joined(&identity.name)) {
                    self.deliver(&mut members, &text, Some(&identity.id)).await;
                }
            }

            displaced
        };

        match displaced {
            Some(mut old) => {
                info!(
                    room = %self.id,
                    member = %identity.id,
                    old_connection = %old.connection,
                    new_connection = %connection,
                    "Duplicate member id, replaced earlier connection"
                );
                close_quietly(old.sink.as_mut()).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a member.
    ///
    /// Returns `true` if the member was present. Removing an absent member is
    /// a no-op. The removed connection's send half is closed.
    pub async fn leave(&self, member_id: &str) -> bool {
        let removed = self.members.lock().await.remove(member_id);
        match removed {
            Some(mut seat) => {
                debug!(room = %self.id, member = %member_id, "Member removed");
                close_quietly(seat.sink.as_mut()).await;
                true
            }
            None => false,
        }
    }

    /// Remove a member only if `connection` still holds its seat, and
    /// broadcast `notice` to the remaining members in the same critical
    /// section.
    ///
    /// Returns the released send half for the caller to close, or `None` if
    /// the member was already gone or its seat was taken over by another
    /// connection (in which case nothing is broadcast).
    pub async fn depart(
        &self,
        member_id: &str,
        connection: &ConnectionId,
        notice: Option<&Event>,
    ) -> Option<Box<dyn MessageSink>> {
        let mut members = self.members.lock().await;

        let owned = members
            .get(member_id)
            .is_some_and(|seat| &seat.connection == connection);
        if !owned {
            trace!(room = %self.id, member = %member_id, connection = %connection, "Seat not held");
            return None;
        }

        let seat = members.remove(member_id)?;
        debug!(
            room = %self.id,
            member = %member_id,
            connection = %connection,
            members = members.len(),
            "Member departed"
        );

        if let Some(text) = notice.and_then(|event| self.render(event)) {
            self.deliver(&mut members, &text, None).await;
        }

        Some(seat.sink)
    }

    /// Send `text` to every member.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let mut members = self.members.lock().await;
        self.deliver(&mut members, text, None).await
    }

    /// Send `text` to every member except `member_id`.
    pub async fn broadcast_except(&self, member_id: &str, text: &str) -> BroadcastReport {
        let mut members = self.members.lock().await;
        self.deliver(&mut members, text, Some(member_id)).await
    }

    /// Render an event in the room's wire format and send it to every member.
    pub async fn broadcast_event(&self, event: &Event) -> BroadcastReport {
        match self.render(event) {
            Some(text) => self.broadcast(&text).await,
            None => BroadcastReport::default(),
        }
    }

    /// Snapshot of current member ids.
    pub async fn members(&self) -> Vec<MemberId> {
        self.members.lock().await.keys().cloned().collect()
    }

    /// Snapshot of current members with display names and join times.
    pub async fn roster(&self) -> Vec<MemberInfo> {
        self.members
            .lock()
            .await
            .iter()
            .map(|(id, seat)| MemberInfo {
                id: id.clone(),
                name: seat.name.clone(),
                connection: seat.connection.to_string(),
                joined_at: seat.joined_at,
            })
            .collect()
    }

    /// Number of current members.
    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Check whether a member id is present.
    pub async fn contains(&self, member_id: &str) -> bool {
        self.members.lock().await.contains_key(member_id)
    }

    fn render(&self, event: &Event) -> Option<String> {
        match event.render(self.config.wire_format) {
            Ok(text) => Some(text),
            Err(e) => {
                error!(room = %self.id, error = %e, "Failed to render event");
                None
            }
        }
    }

    /// Fan out to every seat. Must be called with the membership lock held.
    async fn deliver(
        &self,
        members: &mut HashMap<MemberId, Seat>,
        text: &str,
        skip: Option<&str>,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();

        for (member_id, seat) in members.iter_mut() {
            if skip == Some(member_id.as_str()) {
                continue;
            }

            let sent = match self.config.send_timeout {
                Some(limit) => tokio::time::timeout(limit, seat.sink.send(text))
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => seat.sink.send(text).await,
            };

            match sent {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        room = %self.id,
                        member = %member_id,
                        connection = %seat.connection,
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }

        trace!(
            room = %self.id,
            delivered = report.delivered,
            failed = report.failed,
            "Broadcast"
        );
        report
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn close_quietly(sink: &mut dyn MessageSink) {
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Close failed");
    }
}
