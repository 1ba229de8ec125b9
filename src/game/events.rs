//! Room Events
//!
//! Rooms never talk to connections. Every operation returns the events it
//! produced, in order, and the network layer turns them into messages,
//! timers and store writes.

use serde::{Serialize, Deserialize};

use crate::game::participant::PlayerId;
use crate::game::pickban::Deadline;
use crate::game::rating::RatingChange;
use crate::game::replay::EditEvent;
use crate::game::text::TextCategory;

/// Why a ranked round ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEnd {
    /// Both finished; decided on WPM.
    Finished,
    /// The opponent disconnected.
    Forfeit,
    /// Forced by the match duration limit.
    TimedOut,
}

/// Final line for one participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standing {
    /// Player identifier.
    pub id: PlayerId,
    /// 1-based placement.
    pub placement: u32,
    /// Ranked round wins (0 in casual rooms).
    pub score: u32,
    /// WPM in the deciding round.
    pub wpm: u32,
    /// Accuracy in the deciding round.
    pub accuracy: u32,
    /// Whether the participant finished the text.
    pub finished: bool,
}

/// Outcome of a whole match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Winner, if anyone placed.
    pub winner: Option<PlayerId>,
    /// Every participant, best first.
    pub standings: Vec<Standing>,
}

/// Something a room operation produced.
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// A participant was seated.
    ParticipantJoined(PlayerId),
    /// A participant's edits were accepted.
    ParticipantEdited {
        participant: PlayerId,
        events: Vec<EditEvent>,
    },
    /// A participant's channel closed.
    ParticipantLeft(PlayerId),
    /// Room state changed; participants need a fresh snapshot.
    StateChanged,
    /// Arm a decision timer.
    DeadlineScheduled(Deadline),
    /// Fetch a text from `category` and hand it to the room.
    TextRequested(TextCategory),
    /// The text provider had nothing; the pick is open again.
    TextUnavailable(TextCategory),
    /// A ranked round was decided.
    RoundDecided {
        round: u32,
        winner: PlayerId,
        reason: RoundEnd,
    },
    /// The match is over.
    MatchEnded(MatchSummary),
    /// Ratings to persist and announce.
    RatingsChanged(Vec<RatingChange>),
    /// Tear the room down.
    Closed,
}
