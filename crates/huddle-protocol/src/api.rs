//! JSON bodies of the Huddle HTTP API.
//!
//! Field names follow the established client contract (`userID`, `roomID`).

use serde::{Deserialize, Serialize};

/// `POST /register` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Display name to register.
    #[serde(default)]
    pub name: String,
}

/// `POST /register` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub message: String,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub name: String,
}

/// `POST /create-room` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(default)]
    pub name: String,
}

/// `POST /create-room` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub message: String,
    #[serde(rename = "roomID")]
    pub room_id: String,
}

/// Query string of `GET /join-room/:roomID`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinQuery {
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /list-members/:roomID` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<String>,
}

/// `GET /rooms` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomsResponse {
    pub rooms: Vec<String>,
}

/// One entry of a room roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// Member identifier (membership key).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Connection currently holding the membership.
    pub connection: String,
    /// Join time in Unix milliseconds.
    pub joined_at: u64,
}

/// `GET /rooms/:roomID` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterResponse {
    #[serde(rename = "roomID")]
    pub room_id: String,
    pub members: Vec<MemberInfo>,
}

/// Error body returned with any non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    /// Create an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
