//! # huddle-core
//!
//! Room membership and broadcast engine for the Huddle relay.
//!
//! - **Room** - a named broadcast domain; membership map behind one lock
//! - **RoomRegistry** - room id to room, never removed once created
//! - **Relay** - per-connection loop reading messages and broadcasting them
//! - **Hub** - the operations exposed to the HTTP layer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │     Hub     │────▶│ RoomRegistry │────▶│    Room     │
//! └─────────────┘     └──────────────┘     └─────────────┘
//!        │                                        ▲
//!        ▼                                        │ broadcast
//! ┌─────────────┐                                 │
//! │    Relay    │─────────────────────────────────┘
//! └─────────────┘
//! ```
//!
//! The registry lock and a room lock are never held together: a room is
//! looked up, its `Arc` cloned, and the registry released before any
//! membership operation begins.

pub mod hub;
pub mod member;
pub mod registry;
pub mod relay;
pub mod room;

pub use hub::{Hub, HubConfig, HubError};
pub use member::{Identity, MemberId};
pub use registry::{RegistryConfig, RegistryError, RegistryStats, RoomRegistry};
pub use relay::{Relay, RelayConfig, RelayExit};
pub use room::{BroadcastReport, DuplicatePolicy, Room, RoomConfig, RoomError, RoomId};

pub use huddle_protocol::api::MemberInfo;
