//! Participants
//!
//! Player identity, the profile snapshot taken at admission, and the
//! per-room participant record that carries the replay.

use std::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::game::replay::Replay;

/// Rating assigned to guests and fresh profiles.
pub const DEFAULT_RATING: i32 = 600;

/// Avatar shown for participants without one.
pub const DEFAULT_AVATAR: &str = "https://i.imgur.com/oPyoVMy.jpg";

// =============================================================================
// PLAYER ID
// =============================================================================

/// Unique player identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering. Serialized as a
/// hyphenated UUID string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s)
            .ok()
            .map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// First four bytes as hex, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

impl Serialize for PlayerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_uuid_string())
    }
}

impl<'de> Deserialize<'de> for PlayerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_uuid_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid player id: {s}")))
    }
}

// =============================================================================
// PROFILE
// =============================================================================

/// Profile as held by the external profile store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Current rating.
    pub rating: i32,
    /// Avatar URL.
    pub avatar: Option<String>,
}

impl Profile {
    /// Avatar, falling back to the default one.
    pub fn avatar_or_default(&self) -> &str {
        self.avatar.as_deref().unwrap_or(DEFAULT_AVATAR)
    }
}

// =============================================================================
// PARTICIPANT
// =============================================================================

/// A player seated in a room.
#[derive(Clone, Debug)]
pub struct Participant {
    /// Player identifier.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Rating at the time the room was formed.
    pub rating: i32,
    /// Avatar URL.
    pub avatar: String,
    /// Whether the participant's channel is still open.
    pub connected: bool,
    /// Edit events for the current round.
    pub replay: Replay,
    /// Ranked round wins.
    pub score: u32,
}

impl Participant {
    /// Seat a player from their profile.
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            id: profile.id,
            name: profile.name.clone(),
            rating: profile.rating,
            avatar: profile.avatar_or_default().to_string(),
            connected: true,
            replay: Replay::new(),
            score: 0,
        }
    }
}
