//! Room registry.
//!
//! Maps room ids to rooms. A map shard is locked only for the duration of a
//! single insert or lookup; callers get an `Arc<Room>` and work with the room
//! after the registry has been released.

use crate::room::{validate_room_id, Room, RoomConfig, RoomId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// How many generated ids are tried before giving up.
const MAX_ID_ATTEMPTS: usize = 16;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Invalid room id.
    #[error("Invalid room id: {0}")]
    InvalidRoomId(&'static str),

    /// Room not found.
    #[error("Room not found: {0}")]
    NotFound(RoomId),

    /// A room with this id already exists.
    #[error("Room already exists: {0}")]
    AlreadyExists(RoomId),

    /// Maximum number of rooms reached.
    #[error("Maximum number of rooms reached ({0})")]
    CapacityReached(usize),

    /// The id generator kept producing ids that are taken.
    #[error("No free room id after {0} attempts")]
    IdSpaceExhausted(usize),
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of rooms (0 = unlimited).
    pub max_rooms: usize,
    /// Configuration applied to every new room.
    pub room: RoomConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_rooms: 10_000,
            room: RoomConfig::default(),
        }
    }
}

/// The set of live rooms.
///
/// Rooms are retained for the lifetime of the registry.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Arc<Room>>,
    /// Rooms ever created. Never decremented, since rooms are never removed.
    created: AtomicUsize,
    config: RegistryConfig,
}

impl RoomRegistry {
    /// Create a registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry with custom configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        info!("Creating room registry with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            created: AtomicUsize::new(0),
            config,
        }
    }

    /// Create an empty room under `id`.
    ///
    /// The room limit holds under concurrent creation: a slot is reserved
    /// while the entry for `id` is locked.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is invalid or taken, or the room limit is
    /// reached.
    pub fn create(&self, id: impl Into<RoomId>) -> Result<Arc<Room>, RegistryError> {
        let id = id.into();
        validate_room_id(&id).map_err(RegistryError::InvalidRoomId)?;

        match self.rooms.entry(id) {
            Entry::Occupied(entry) => Err(RegistryError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                // `len` would visit the shard this entry holds, so count separately
                if !self.reserve_slot() {
                    warn!(room = %entry.key(), max = self.config.max_rooms, "Room limit reached");
                    return Err(RegistryError::CapacityReached(self.config.max_rooms));
                }
                let room = Arc::new(Room::new(entry.key().clone(), self.config.room.clone()));
                entry.insert(Arc::clone(&room));
                info!(room = %room.id(), "Room created");
                Ok(room)
            }
        }
    }

    fn reserve_slot(&self) -> bool {
        let max = self.config.max_rooms;
        self.created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .is_ok()
    }

    /// Create a room under an id drawn from `generate`, retrying on collision.
    ///
    /// # Errors
    ///
    /// Returns an error if no free id was produced, or as for
    /// [`RoomRegistry::create`].
    pub fn create_with<F>(&self, mut generate: F) -> Result<Arc<Room>, RegistryError>
    where
        F: FnMut() -> RoomId,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            match self.create(generate()) {
                Err(RegistryError::AlreadyExists(id)) => {
                    debug!(room = %id, "Generated room id collided, retrying");
                }
                other => return other,
            }
        }
        Err(RegistryError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Look up a room. Never creates one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if no room has this id.
    pub fn lookup(&self, id: &str) -> Result<Arc<Room>, RegistryError> {
        self.rooms
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Check if a room exists.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.rooms.contains_key(id)
    }

    /// Get all room ids.
    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Check if there are no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Get registry statistics.
    pub async fn stats(&self) -> RegistryStats {
        // Collect first so no shard lock is held while awaiting room locks
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();

        let mut member_count = 0;
        for room in &rooms {
            member_count += room.member_count().await;
        }

        RegistryStats {
            room_count: rooms.len(),
            member_count,
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of rooms.
    pub room_count: usize,
    /// Members across all rooms.
    pub member_count: usize,
}
