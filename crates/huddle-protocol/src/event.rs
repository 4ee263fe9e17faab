//! Relay events and their wire renderings.
//!
//! Every payload a member receives is one [`Event`] rendered to a string.
//! The flat text rendering is what existing clients understand; the JSON
//! envelope lets newer clients tell notices apart from chat.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while rendering or decoding events.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unrecognized wire format name.
    #[error("Unknown wire format: {0}")]
    UnknownFormat(String),
}

/// Event kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Chat,
    Joined,
    Left,
}

/// A message relayed to room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    /// A chat line sent by a member.
    Chat {
        /// Display name of the sender.
        sender: String,
        /// Message text as received.
        text: String,
    },

    /// A member entered the room.
    Joined {
        /// Display name of the member.
        member: String,
    },

    /// A member left the room.
    Left {
        /// Display name of the member.
        member: String,
    },
}

impl Event {
    /// Create a chat event.
    #[must_use]
    pub fn chat(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Event::Chat {
            sender: sender.into(),
            text: text.into(),
        }
    }

    /// Create a join notice.
    #[must_use]
    pub fn joined(member: impl Into<String>) -> Self {
        Event::Joined {
            member: member.into(),
        }
    }

    /// Create a leave notice.
    #[must_use]
    pub fn left(member: impl Into<String>) -> Self {
        Event::Left {
            member: member.into(),
        }
    }

    /// Get the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Chat { .. } => EventKind::Chat,
            Event::Joined { .. } => EventKind::Joined,
            Event::Left { .. } => EventKind::Left,
        }
    }

    /// Render the event for the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON encoding fails.
    pub fn render(&self, format: WireFormat) -> Result<String, WireError> {
        match format {
            WireFormat::Text => Ok(self.to_string()),
            WireFormat::Json => Ok(serde_json::to_string(self)?),
        }
    }

    /// Decode a JSON envelope.
    ///
    /// The text rendering is not decodable: a chat line whose text contains
    /// `": "` cannot be told apart from the sender prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid envelope.
    pub fn from_json(data: &str) -> Result<Self, WireError> {
        Ok(serde_json::from_str(data)?)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Chat { sender, text } => write!(f, "{sender}: {text}"),
            Event::Joined { member } => write!(f, "{member} joined the room!"),
            Event::Left { member } => write!(f, "{member} left the room!"),
        }
    }
}

/// How events are rendered on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Plain strings such as `alice: hi` and `alice joined the room!`.
    #[default]
    Text,
    /// Tagged JSON objects with a `kind` field.
    Json,
}

impl WireFormat {
    /// Get the format name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Text => "text",
            WireFormat::Json => "json",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(WireFormat::Text),
            "json" => Ok(WireFormat::Json),
            other => Err(WireError::UnknownFormat(other.to_string())),
        }
    }
}
