//! # huddle-protocol
//!
//! Wire vocabulary for the Huddle room relay.
//!
//! Two things cross the network:
//!
//! - **Relay events** - chat lines and join/leave notices pushed to room
//!   members over their WebSocket. See [`Event`] and [`WireFormat`].
//! - **HTTP bodies** - the JSON requests and responses of the room API.
//!   See the [`api`] module.
//!
//! ## Example
//!
//! ```rust
//! use huddle_protocol::{Event, WireFormat};
//!
//! let event = Event::chat("alice", "hi");
//! assert_eq!(event.render(WireFormat::Text).unwrap(), "alice: hi");
//! ```

pub mod api;
pub mod event;

pub use event::{Event, EventKind, WireError, WireFormat};
