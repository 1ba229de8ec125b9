//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every message is a JSON text frame, internally tagged by `"type"`.

use serde::{Serialize, Deserialize};

use crate::core::clock::Timestamp;
use crate::game::events::MatchSummary;
use crate::game::participant::{Participant, PlayerId};
use crate::game::pickban::PickBanPhase;
use crate::game::rating::RatingChange;
use crate::game::replay::EditEvent;
use crate::game::room::{Room, RoomError, RoomId, RoomMode, RoomPhase};
use crate::game::text::{TargetText, TextCategory};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with the server. Must be the first message.
    Auth(AuthRequest),

    /// Join a casual lobby or the ranked queue.
    Join { mode: RoomMode },

    /// Batch of edit events for the current round.
    Edit(EditRequest),

    /// Ban a category during the ranked pick/ban.
    CategoryBan { category: TextCategory },

    /// Pick the category for the next ranked round.
    CategorySelect { category: TextCategory },

    /// Ping for latency measurement.
    Ping { timestamp: u64 },

    /// Leave the room or queue and close the connection.
    Leave,
}

/// Authentication request.
///
/// A `token` identifies a registered player. Without one the connection
/// plays as a guest whose identity is derived from `guest_seed`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Bearer JWT.
    #[serde(default)]
    pub token: Option<String>,
    /// Client-chosen guest seed.
    #[serde(default)]
    pub guest_seed: Option<String>,
    /// Client version for compatibility logging.
    #[serde(default)]
    pub client_version: Option<String>,
}

/// Edit batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    /// Whose replay the events belong to. Must be the sender.
    pub participant_id: PlayerId,
    /// Events in send order.
    pub events: Vec<EditEvent>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Full room state. Sent on join and after every room transition.
    RoomSnapshot(RoomSnapshot),

    /// Someone joined the room.
    NewParticipant(ParticipantView),

    /// Edits accepted from another participant.
    ParticipantEdit {
        participant_id: PlayerId,
        events: Vec<EditEvent>,
    },

    /// A participant's connection closed.
    ParticipantDisconnected { participant_id: PlayerId },

    /// Ranked queue status: the current search band.
    WaitingStatus { band_min: i32, band_max: i32 },

    /// The match is over.
    MatchEnded(MatchSummary),

    /// New ratings after a ranked match.
    RatingUpdate { ratings: Vec<RatingEntry> },

    /// Error message.
    Error(ServerError),

    /// Pong response.
    Pong { timestamp: u64, server_time: Timestamp },

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether authentication succeeded.
    pub success: bool,
    /// Assigned player id.
    pub player_id: Option<PlayerId>,
    /// Display name.
    pub name: Option<String>,
    /// Whether the identity is a guest.
    pub guest: bool,
    /// Error message if failed.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// One rating line of a [`ServerMessage::RatingUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingEntry {
    /// Player id.
    pub id: PlayerId,
    /// Rating after the match.
    pub new_rating: i32,
}

impl From<&RatingChange> for RatingEntry {
    fn from(change: &RatingChange) -> Self {
        Self {
            id: change.id,
            new_rating: change.new_rating,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Cooldown hint for throttled connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ServerError {
    /// Error without a cooldown hint.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retry_after_ms: None,
        }
    }
}

impl From<&RoomError> for ServerError {
    fn from(err: &RoomError) -> Self {
        Self::new(ErrorCode::for_room_error(err), err.to_string())
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed.
    InvalidMessage,
    /// Message sent before authenticating.
    NotAuthenticated,
    /// Credentials rejected.
    AuthFailed,
    /// Too many connection attempts from this address.
    RateLimited,
    /// The identity already has a live connection.
    DuplicateSession,
    /// Edit stream or ownership violation. The connection is closed.
    ProtocolViolation,
    /// Pick/ban action rejected.
    TurnRejected,
    /// No text could be found for a category.
    MissingText,
    /// Already seated or queued.
    AlreadyInRoom,
    /// Guests cannot play ranked.
    GuestNotAllowed,
    /// The room refused the join.
    JoinRejected,
    /// Connection cap reached.
    ServerFull,
    /// Not in a room that accepts this message.
    NotInRoom,
    /// Unexpected server error.
    InternalError,
}

impl ErrorCode {
    /// Wire code for a room error.
    pub fn for_room_error(err: &RoomError) -> Self {
        match err {
            e if e.is_fatal() => ErrorCode::ProtocolViolation,
            RoomError::PickBan(_) | RoomError::NoPickBan => ErrorCode::TurnRejected,
            RoomError::RoomFull | RoomError::JoinClosed | RoomError::AlreadyJoined | RoomError::NotJoinable => {
                ErrorCode::JoinRejected
            }
            _ => ErrorCode::NotInRoom,
        }
    }
}

// =============================================================================
// ROOM SNAPSHOT
// =============================================================================

/// Participant as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    /// Player id.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Rating when the room formed.
    pub rating: i32,
    /// Avatar URL.
    pub avatar: String,
    /// Whether the channel is open.
    pub connected: bool,
    /// Edit events received this round.
    pub replay_length: usize,
    /// Round wins, ranked only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

impl ParticipantView {
    /// View of a seated participant.
    pub fn new(participant: &Participant, mode: RoomMode) -> Self {
        Self {
            id: participant.id,
            name: participant.name.clone(),
            rating: participant.rating,
            avatar: participant.avatar.clone(),
            connected: participant.connected,
            replay_length: participant.replay.len(),
            score: (mode == RoomMode::Ranked).then_some(participant.score),
        }
    }
}

/// Room state as broadcast to its participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Room id.
    pub id: RoomId,
    /// Casual or ranked.
    pub mode: RoomMode,
    /// Current phase.
    pub phase: RoomPhase,
    /// Seated participants.
    pub participants: Vec<ParticipantView>,
    /// Text of the current round.
    pub target_text: Option<TargetText>,
    /// Start of the current round.
    pub start_timestamp: Option<Timestamp>,
    /// Current round, ranked 1v1 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    /// Categories banned so far, ranked 1v1 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blacklisted_categories: Option<Vec<TextCategory>>,
    /// Pending pick/ban deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_deadline: Option<Timestamp>,
    /// Pick/ban phase, ranked 1v1 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_ban: Option<PickBanPhase>,
}

impl RoomSnapshot {
    /// Snapshot `room` as of `now`.
    pub fn capture(room: &Room, now: Timestamp) -> Self {
        let mode = room.mode();
        let series = room.series();
        let pick_ban = series.map(|s| s.pick_ban().phase());
        let decision_deadline = pick_ban.and_then(|phase| match phase {
            PickBanPhase::BlacklistTurn { deadline, .. } | PickBanPhase::SelectTurn { deadline, .. } => {
                Some(deadline)
            }
            PickBanPhase::AwaitingText { .. } | PickBanPhase::Complete { .. } => None,
        });

        Self {
            id: room.id(),
            mode,
            phase: room.phase(now),
            participants: room.participants().map(|p| ParticipantView::new(p, mode)).collect(),
            target_text: room.target().cloned(),
            start_timestamp: room.start(),
            round: series.map(|s| s.round()),
            blacklisted_categories: series.map(|s| s.pick_ban().blacklisted().to_vec()),
            decision_deadline,
            pick_ban,
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Shorthand for an error message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::participant::Profile;
    use crate::game::pickban::PickBanError;

    fn profile(n: u8, rating: i32) -> Profile {
        Profile {
            id: PlayerId::new([n; 16]),
            name: format!("p{n}"),
            rating,
            avatar: None,
        }
    }

    #[test]
    fn test_client_message_wire_names() {
        let json = r#"{"type":"category_ban","category":"quote hard"}"#;
        let msg = ClientMessage::from_json(json).unwrap();
        assert_eq!(msg, ClientMessage::CategoryBan { category: TextCategory::QuoteHard });

        let json = r#"{"type":"join","mode":"ranked"}"#;
        assert_eq!(ClientMessage::from_json(json).unwrap(), ClientMessage::Join { mode: RoomMode::Ranked });
    }

    #[test]
    fn test_edit_request_parses() {
        let json = r#"{
            "type": "edit",
            "participant_id": "01010101-0101-0101-0101-010101010101",
            "events": [
                {"type": "character_insert", "letter": "a", "timestamp": 10},
                {"type": "range_delete", "start": 0, "end": 1, "timestamp": 11},
                {"type": "caret_move", "start": 0, "end": 0, "timestamp": 12}
            ]
        }"#;
        let ClientMessage::Edit(edit) = ClientMessage::from_json(json).unwrap() else {
            panic!("Wrong message type");
        };
        assert_eq!(edit.participant_id, PlayerId::new([1; 16]));
        assert_eq!(edit.events.len(), 3);
        assert_eq!(edit.events[0], EditEvent::insert('a', 10));
    }

    #[test]
    fn test_auth_request_fields_optional() {
        let msg = ClientMessage::from_json(r#"{"type":"auth"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Auth(AuthRequest::default()));
    }

    #[test]
    fn test_invalid_message_rejected() {
        assert!(ClientMessage::from_json(r#"{"type":"teleport"}"#).is_err());
        assert!(ClientMessage::from_json("not json").is_err());
    }

    #[test]
    fn test_casual_snapshot_omits_ranked_fields() {
        let text = TargetText::from_text("ab cd", TextCategory::QuoteEasy, "test").unwrap();
        let mut room = Room::casual(RoomId::random(), GameConfig::default().casual_rules(), text, 0);
        room.join(&profile(1, 600), 0).unwrap();

        let snapshot = RoomSnapshot::capture(&room, 0);
        assert_eq!(snapshot.phase, RoomPhase::Countdown);
        assert_eq!(snapshot.participants[0].score, None);

        let json = ServerMessage::RoomSnapshot(snapshot).to_json().unwrap();
        assert!(json.contains(r#""type":"room_snapshot""#));
        assert!(!json.contains("blacklisted_categories"));
        assert!(!json.contains("decision_deadline"));
    }

    #[test]
    fn test_ranked_snapshot_has_pick_ban() {
        let (room, _) = Room::head_to_head(
            RoomId::random(),
            GameConfig::default().ranked_rules(),
            &profile(1, 600),
            &profile(2, 700),
            1_000,
        );

        let snapshot = RoomSnapshot::capture(&room, 1_000);
        assert_eq!(snapshot.round, Some(1));
        assert_eq!(snapshot.blacklisted_categories, Some(Vec::new()));
        assert_eq!(snapshot.decision_deadline, Some(21_000));
        assert_eq!(snapshot.target_text, None);
        assert!(snapshot.participants.iter().all(|p| p.score == Some(0)));

        let json = ServerMessage::RoomSnapshot(snapshot.clone()).to_json().unwrap();
        assert!(json.contains(r#""phase":"blacklist_turn""#));
        let parsed = ServerMessage::from_json(&json).unwrap();
        assert_eq!(parsed, ServerMessage::RoomSnapshot(snapshot));
    }

    #[test]
    fn test_rating_update_shape() {
        let msg = ServerMessage::RatingUpdate {
            ratings: vec![RatingEntry { id: PlayerId::new([1; 16]), new_rating: 616 }],
        };
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""new_rating":616"#));
    }

    #[test]
    fn test_error_codes() {
        let msg = ServerMessage::Error(ServerError {
            code: ErrorCode::RateLimited,
            message: "slow down".into(),
            retry_after_ms: Some(1_500),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("rate_limited"));
        assert!(json.contains("1500"));

        let json = ServerMessage::error(ErrorCode::AuthFailed, "Invalid token").to_json().unwrap();
        assert!(json.contains("auth_failed"));
        assert!(!json.contains("retry_after_ms"));
    }

    #[test]
    fn test_room_errors_map_to_codes() {
        assert_eq!(ErrorCode::for_room_error(&RoomError::NotStarted), ErrorCode::ProtocolViolation);
        assert_eq!(
            ErrorCode::for_room_error(&RoomError::PickBan(PickBanError::NotYourTurn)),
            ErrorCode::TurnRejected
        );
        assert_eq!(ErrorCode::for_room_error(&RoomError::RoomFull), ErrorCode::JoinRejected);
        assert_eq!(ErrorCode::for_room_error(&RoomError::Finished), ErrorCode::NotInRoom);
    }
}
