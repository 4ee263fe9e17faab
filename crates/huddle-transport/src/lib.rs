//! # huddle-transport
//!
//! Connection abstraction for the Huddle room relay.
//!
//! A [`Connection`] is a bidirectional, message-oriented channel to one
//! client. Before use it is split into two halves with different owners:
//!
//! - **[`MessageSink`]** - the send half, owned by the room the client joined
//!   and written to by whichever task is broadcasting.
//! - **[`MessageStream`]** - the receive half, owned exclusively by the
//!   client's relay loop.
//!
//! ```rust,ignore
//! use huddle_transport::{Connection, MessageStream};
//!
//! async fn pump(conn: Box<dyn Connection>) {
//!     let (mut sink, mut stream) = conn.split();
//!     while let Ok(Some(text)) = stream.recv().await {
//!         let _ = sink.send(&text).await;
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{Connection, ConnectionId, MessageSink, MessageStream, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
