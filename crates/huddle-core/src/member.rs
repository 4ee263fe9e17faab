//! Member identity.
//!
//! The HTTP layer resolves who a client is; the core only receives the
//! resulting [`Identity`] value.

use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum member identifier length.
pub const MAX_MEMBER_ID_LENGTH: usize = 256;

/// A member identifier, unique only within one room.
pub type MemberId = String;

/// Validate a member identifier.
///
/// # Errors
///
/// Returns an error message if the identifier is invalid.
pub fn validate_member_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("Member id cannot be empty");
    }
    if id.len() > MAX_MEMBER_ID_LENGTH {
        return Err("Member id too long");
    }
    if id.chars().any(char::is_control) {
        return Err("Member id contains control characters");
    }
    Ok(())
}

/// A resolved member identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Membership key within a room.
    pub id: MemberId,
    /// Name shown in chat lines and notices.
    pub name: String,
}

impl Identity {
    /// Create an identity whose display name is its id.
    #[must_use]
    pub fn new(id: impl Into<MemberId>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }

    /// Create an identity with a separate display name.
    #[must_use]
    pub fn with_name(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
