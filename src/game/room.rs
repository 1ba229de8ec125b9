//! Room State Machine
//!
//! One match instance: its participants, target text, start time and, for
//! ranked head-to-head rooms, the round series and pick/ban controller.
//!
//! ```text
//! FORMING ──► COUNTDOWN ──► ACTIVE ──► FINISHED
//!                ▲                │
//!                └── ROUND_OVER ◄─┘   (ranked, match not decided)
//! ```
//!
//! The phase is derived from the room's fields rather than stored. Rooms do
//! no I/O; every operation returns the [`RoomEvent`]s it produced.

use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::clock::Timestamp;
use crate::core::rng::DeterministicRng;
use crate::game::completion::{self, Entry};
use crate::game::events::{MatchSummary, RoomEvent, RoundEnd, Standing};
use crate::game::participant::{Participant, PlayerId, Profile};
use crate::game::pickban::{PickBanController, PickBanPhase, PickBanStep};
use crate::game::rating;
use crate::game::replay::{EditEvent, ReplayError};
use crate::game::text::{TargetText, TextCategory};

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique room identifier (UUID as bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoomId(pub [u8; 16]);

impl RoomId {
    /// Fresh random id.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// First four bytes as hex, for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        uuid::Uuid::parse_str(&s)
            .map(|u| Self(*u.as_bytes()))
            .map_err(serde::de::Error::custom)
    }
}

/// Room mode as seen by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    /// Open lobby, unrated.
    Casual,
    /// Matchmade and rated.
    Ranked,
}

/// Room phase, derived from the room's state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    /// No text yet (first ranked round in pick/ban).
    Forming,
    /// Text assigned, start time in the future.
    Countdown,
    /// Typing.
    Active,
    /// Between ranked rounds.
    RoundOver,
    /// Match decided.
    Finished,
}

// =============================================================================
// RULES & KINDS
// =============================================================================

/// Timing and size rules for one room.
#[derive(Clone, Debug, PartialEq)]
pub struct RoomRules {
    /// Seat limit.
    pub max_participants: usize,
    /// Text assignment to start, in ms.
    pub countdown_ms: i64,
    /// Joins are refused once the start is this close, in ms.
    pub min_join_lead_ms: i64,
    /// Latest a first keystroke may lag the start for WPM, in ms.
    pub start_leniency_ms: i64,
    /// Rounds are forced to end this long after the start, in ms.
    pub max_match_duration_ms: i64,
    /// Pick/ban decision window, in ms.
    pub decision_ms: i64,
    /// Rounds in a ranked series.
    pub best_of: u32,
    /// ELO K factor.
    pub k_factor: f64,
}

/// Best-of-N state of a head-to-head room.
#[derive(Clone, Debug)]
pub struct Series {
    best_of: u32,
    round: u32,
    pick_ban: PickBanController,
}

impl Series {
    /// Round wins needed to take the match.
    pub fn wins_needed(&self) -> u32 {
        (self.best_of + 1) / 2
    }

    /// Current round (1-based).
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Series length.
    pub fn best_of(&self) -> u32 {
        self.best_of
    }

    /// Pick/ban controller.
    pub fn pick_ban(&self) -> &PickBanController {
        &self.pick_ban
    }
}

/// Ranked room variants.
#[derive(Clone, Debug)]
pub enum RankedRoom {
    /// 1v1 best-of-N with pick/ban between rounds.
    HeadToHead(Series),
    /// Single round, several players, rank-adjacent rating updates.
    FreeForAll,
}

/// Room mode with its mode-specific state.
#[derive(Clone, Debug)]
pub enum RoomKind {
    /// Open lobby.
    Casual,
    /// Rated match.
    Ranked(RankedRoom),
}

/// Room errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    /// Sender is not a connected participant.
    #[error("player {0} is not in this room")]
    NotInRoom(PlayerId),
    /// Edits arrived before the text was assigned.
    #[error("the round has not started")]
    NotStarted,
    /// First keystroke predates the start.
    #[error("started before the countdown (first event {first}, start {start})")]
    StartedEarly {
        /// First event timestamp.
        first: Timestamp,
        /// Room start.
        start: Timestamp,
    },
    /// Replay append failed.
    #[error("invalid replay: {0}")]
    Replay(#[from] ReplayError),
    /// Room is at capacity.
    #[error("room is full")]
    RoomFull,
    /// Too close to the start, or already started.
    #[error("room is no longer accepting players")]
    JoinClosed,
    /// Player already seated.
    #[error("already in this room")]
    AlreadyJoined,
    /// Only casual rooms take joins.
    #[error("room cannot be joined")]
    NotJoinable,
    /// Room is finished.
    #[error("room is finished")]
    Finished,
    /// Pick/ban sent to a room without it.
    #[error("room has no category pick/ban")]
    NoPickBan,
    /// Pick/ban turn error.
    #[error(transparent)]
    PickBan(#[from] crate::game::pickban::PickBanError),
}

impl RoomError {
    /// Protocol violations, which disconnect the sender.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RoomError::NotInRoom(_)
                | RoomError::NotStarted
                | RoomError::StartedEarly { .. }
                | RoomError::Replay(_)
        )
    }
}

// =============================================================================
// ROOM
// =============================================================================

/// One match instance.
#[derive(Clone, Debug)]
pub struct Room {
    id: RoomId,
    kind: RoomKind,
    participants: BTreeMap<PlayerId, Participant>,
    target: Option<TargetText>,
    start: Option<Timestamp>,
    created_at: Timestamp,
    finished: bool,
    rules: RoomRules,
    rng: DeterministicRng,
}

impl Room {
    fn with_kind(id: RoomId, kind: RoomKind, rules: RoomRules, profiles: &[&Profile], now: Timestamp) -> Self {
        let ids: Vec<[u8; 16]> = profiles.iter().map(|p| p.id.0).collect();
        Self {
            id,
            kind,
            participants: profiles
                .iter()
                .map(|p| (p.id, Participant::from_profile(p)))
                .collect(),
            target: None,
            start: None,
            created_at: now,
            finished: false,
            rules,
            rng: DeterministicRng::for_room(&id.0, &ids),
        }
    }

    /// Create an empty casual room whose countdown starts now.
    pub fn casual(id: RoomId, rules: RoomRules, text: TargetText, now: Timestamp) -> Self {
        let mut room = Self::with_kind(id, RoomKind::Casual, rules, &[], now);
        room.start = Some(now + room.rules.countdown_ms);
        room.target = Some(text);
        room
    }

    /// Create a ranked 1v1 room and open the first pick/ban turn.
    ///
    /// The lower-rated player bans first; on equal ratings `first` does.
    pub fn head_to_head(
        id: RoomId,
        rules: RoomRules,
        first: &Profile,
        second: &Profile,
        now: Timestamp,
    ) -> (Self, Vec<RoomEvent>) {
        let (banner, other) = if second.rating < first.rating {
            (second, first)
        } else {
            (first, second)
        };
        let (pick_ban, deadline) = PickBanController::new(banner.id, other.id, rules.decision_ms, now);
        let series = Series {
            best_of: rules.best_of,
            round: 1,
            pick_ban,
        };
        let room = Self::with_kind(
            id,
            RoomKind::Ranked(RankedRoom::HeadToHead(series)),
            rules,
            &[first, second],
            now,
        );
        (room, vec![RoomEvent::StateChanged, RoomEvent::DeadlineScheduled(deadline)])
    }

    /// Create a ranked free-for-all room whose countdown starts now.
    pub fn free_for_all(
        id: RoomId,
        rules: RoomRules,
        profiles: &[&Profile],
        text: TargetText,
        now: Timestamp,
    ) -> Self {
        let mut room = Self::with_kind(id, RoomKind::Ranked(RankedRoom::FreeForAll), rules, profiles, now);
        room.start = Some(now + room.rules.countdown_ms);
        room.target = Some(text);
        room
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Room id.
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Mode-specific state.
    pub fn kind(&self) -> &RoomKind {
        &self.kind
    }

    /// Client-facing mode.
    pub fn mode(&self) -> RoomMode {
        match self.kind {
            RoomKind::Casual => RoomMode::Casual,
            RoomKind::Ranked(_) => RoomMode::Ranked,
        }
    }

    /// Head-to-head series, if this is one.
    pub fn series(&self) -> Option<&Series> {
        match &self.kind {
            RoomKind::Ranked(RankedRoom::HeadToHead(series)) => Some(series),
            _ => None,
        }
    }

    /// Current phase.
    pub fn phase(&self, now: Timestamp) -> RoomPhase {
        if self.finished {
            return RoomPhase::Finished;
        }
        match self.start {
            None if self.series().map_or(false, |s| s.round > 1) => RoomPhase::RoundOver,
            None => RoomPhase::Forming,
            Some(start) if now < start => RoomPhase::Countdown,
            Some(_) => RoomPhase::Active,
        }
    }

    /// Participants in id order.
    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Look up a participant.
    pub fn participant(&self, id: &PlayerId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// Ids of every participant.
    pub fn participant_ids(&self) -> Vec<PlayerId> {
        self.participants.keys().copied().collect()
    }

    /// Ids of participants whose channel is open.
    pub fn connected_ids(&self) -> Vec<PlayerId> {
        self.participants
            .values()
            .filter(|p| p.connected)
            .map(|p| p.id)
            .collect()
    }

    /// Current target text.
    pub fn target(&self) -> Option<&TargetText> {
        self.target.as_ref()
    }

    /// Current round start.
    pub fn start(&self) -> Option<Timestamp> {
        self.start
    }

    /// Creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Whether the match is over.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Room rules.
    pub fn rules(&self) -> &RoomRules {
        &self.rules
    }

    // -------------------------------------------------------------------------
    // Operations
    // -------------------------------------------------------------------------

    /// Seat a player in a casual room.
    pub fn join(&mut self, profile: &Profile, now: Timestamp) -> Result<Vec<RoomEvent>, RoomError> {
        if self.finished {
            return Err(RoomError::Finished);
        }
        if !matches!(self.kind, RoomKind::Casual) {
            return Err(RoomError::NotJoinable);
        }
        if self.participants.contains_key(&profile.id) {
            return Err(RoomError::AlreadyJoined);
        }
        if self.participants.len() >= self.rules.max_participants {
            return Err(RoomError::RoomFull);
        }
        match (self.phase(now), self.start) {
            (RoomPhase::Forming, _) => {}
            (RoomPhase::Countdown, Some(start)) if start - now > self.rules.min_join_lead_ms => {}
            _ => return Err(RoomError::JoinClosed),
        }

        self.participants.insert(profile.id, Participant::from_profile(profile));
        Ok(vec![RoomEvent::ParticipantJoined(profile.id)])
    }

    /// Append a participant's edits and re-evaluate completion.
    pub fn edit(
        &mut self,
        participant: PlayerId,
        events: Vec<EditEvent>,
        now: Timestamp,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        if self.finished {
            return Err(RoomError::Finished);
        }
        let start = self.start;
        let seat = self
            .participants
            .get_mut(&participant)
            .filter(|p| p.connected)
            .ok_or(RoomError::NotInRoom(participant))?;
        let start = start.ok_or(RoomError::NotStarted)?;
        let Some(first) = events.first() else {
            return Ok(Vec::new());
        };
        if seat.replay.is_empty() && first.timestamp() < start {
            return Err(RoomError::StartedEarly {
                first: first.timestamp(),
                start,
            });
        }
        seat.replay.append(&events)?;

        let mut out = vec![RoomEvent::ParticipantEdited { participant, events }];
        out.extend(self.evaluate(now, false));
        Ok(out)
    }

    /// Mark a participant disconnected and re-evaluate completion.
    ///
    /// The replay is kept for scoring. Unknown or already disconnected
    /// participants are ignored.
    pub fn disconnect(&mut self, participant: PlayerId, now: Timestamp) -> Vec<RoomEvent> {
        if self.finished {
            return Vec::new();
        }
        match self.participants.get_mut(&participant) {
            Some(seat) if seat.connected => seat.connected = false,
            _ => return Vec::new(),
        }

        let mut out = vec![RoomEvent::ParticipantLeft(participant)];
        out.extend(self.evaluate(now, false));
        out
    }

    /// Ban a category.
    pub fn ban(
        &mut self,
        actor: PlayerId,
        category: TextCategory,
        now: Timestamp,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        let series = self.series_for(actor)?;
        let deadline = series.pick_ban.ban(actor, category, now)?;
        Ok(vec![RoomEvent::StateChanged, RoomEvent::DeadlineScheduled(deadline)])
    }

    /// Pick the category for the next round.
    pub fn select(
        &mut self,
        actor: PlayerId,
        category: TextCategory,
        now: Timestamp,
    ) -> Result<Vec<RoomEvent>, RoomError> {
        let series = self.series_for(actor)?;
        let category = series.pick_ban.select(actor, category, now)?;
        Ok(vec![RoomEvent::StateChanged, RoomEvent::TextRequested(category)])
    }

    /// Hand over the text fetched for the picked category.
    ///
    /// A text starts the countdown. `None` reopens the pick with a fresh
    /// deadline. Ignored unless a text is awaited.
    pub fn assign_text(&mut self, text: Option<TargetText>, now: Timestamp) -> Vec<RoomEvent> {
        if self.finished {
            return Vec::new();
        }
        let RoomKind::Ranked(RankedRoom::HeadToHead(series)) = &mut self.kind else {
            return Vec::new();
        };
        let PickBanPhase::AwaitingText { category } = series.pick_ban.phase() else {
            return Vec::new();
        };

        match text {
            Some(text) => {
                series.pick_ban.text_assigned();
                self.target = Some(text);
                self.start = Some(now + self.rules.countdown_ms);
                vec![RoomEvent::StateChanged]
            }
            None => {
                let mut out = vec![RoomEvent::TextUnavailable(category), RoomEvent::StateChanged];
                if let Some(deadline) = series.pick_ban.text_missing(now) {
                    out.push(RoomEvent::DeadlineScheduled(deadline));
                }
                out
            }
        }
    }

    /// A decision deadline fired. Stale versions are no-ops.
    pub fn on_deadline(&mut self, version: u64, now: Timestamp) -> Vec<RoomEvent> {
        if self.finished {
            return Vec::new();
        }
        let RoomKind::Ranked(RankedRoom::HeadToHead(series)) = &mut self.kind else {
            return Vec::new();
        };
        match series.pick_ban.on_deadline(version, now, &mut self.rng) {
            Some(PickBanStep::Turn(deadline)) => {
                vec![RoomEvent::StateChanged, RoomEvent::DeadlineScheduled(deadline)]
            }
            Some(PickBanStep::Picked(category)) => {
                vec![RoomEvent::StateChanged, RoomEvent::TextRequested(category)]
            }
            None => Vec::new(),
        }
    }

    /// Force-evaluate a round that outlived the match duration limit.
    pub fn sweep(&mut self, now: Timestamp) -> Vec<RoomEvent> {
        if self.finished {
            return Vec::new();
        }
        match self.start {
            Some(start) if now > start + self.rules.max_match_duration_ms => self.evaluate(now, true),
            _ => Vec::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Completion
    // -------------------------------------------------------------------------

    /// Decide whether the round or match is over and apply the outcome.
    pub fn evaluate(&mut self, now: Timestamp, force: bool) -> Vec<RoomEvent> {
        if self.finished {
            return Vec::new();
        }
        match self.kind {
            RoomKind::Casual => self.evaluate_casual(now, force),
            RoomKind::Ranked(RankedRoom::FreeForAll) => self.evaluate_free_for_all(now, force),
            RoomKind::Ranked(RankedRoom::HeadToHead(_)) => self.evaluate_head_to_head(now, force),
        }
    }

    fn evaluate_casual(&mut self, now: Timestamp, force: bool) -> Vec<RoomEvent> {
        if !completion::casual_round_over(&self.entries(now), force) {
            return Vec::new();
        }
        let summary = self.summary(now, None);
        self.finished = true;
        vec![RoomEvent::MatchEnded(summary), RoomEvent::Closed]
    }

    fn evaluate_free_for_all(&mut self, now: Timestamp, force: bool) -> Vec<RoomEvent> {
        if !completion::free_for_all_over(&self.entries(now), force) {
            return Vec::new();
        }
        let summary = self.summary(now, None);
        let placements: Vec<(PlayerId, i32)> = summary
            .standings
            .iter()
            .filter_map(|s| self.participants.get(&s.id).map(|p| (p.id, p.rating)))
            .collect();
        let changes = rating::adjacent_pairs(&placements, self.rules.k_factor);
        self.finished = true;
        vec![
            RoomEvent::MatchEnded(summary),
            RoomEvent::RatingsChanged(changes),
            RoomEvent::Closed,
        ]
    }

    fn evaluate_head_to_head(&mut self, now: Timestamp, force: bool) -> Vec<RoomEvent> {
        let verdict = {
            let entries = self.entries(now);
            match entries.as_slice() {
                [a, b] => completion::decide_head_to_head(a, b, force),
                _ => None,
            }
        };
        let Some((winner, reason)) = verdict else {
            return Vec::new();
        };
        let Some(loser) = self.participants.keys().copied().find(|id| *id != winner) else {
            return Vec::new();
        };
        let RoomKind::Ranked(RankedRoom::HeadToHead(series)) = &mut self.kind else {
            return Vec::new();
        };
        let wins_needed = series.wins_needed();
        let Some(seat) = self.participants.get_mut(&winner) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        loop {
            seat.score += 1;
            out.push(RoomEvent::RoundDecided {
                round: series.round,
                winner,
                reason,
            });
            // A forfeit hands over every remaining round
            if reason != RoundEnd::Forfeit || seat.score >= wins_needed {
                break;
            }
            series.round += 1;
        }

        if seat.score < wins_needed {
            series.round += 1;
            let deadline = series.pick_ban.begin_round(series.round, now);
            for p in self.participants.values_mut() {
                p.replay.clear();
            }
            self.target = None;
            self.start = None;
            out.push(RoomEvent::StateChanged);
            out.push(RoomEvent::DeadlineScheduled(deadline));
            return out;
        }

        let summary = self.summary(now, Some(winner));
        let rating_of = |id: PlayerId| self.participants.get(&id).map_or(0, |p| p.rating);
        let changes = rating::head_to_head(
            (winner, rating_of(winner)),
            (loser, rating_of(loser)),
            self.rules.k_factor,
        );
        self.finished = true;
        out.push(RoomEvent::MatchEnded(summary));
        out.push(RoomEvent::RatingsChanged(changes.to_vec()));
        out.push(RoomEvent::Closed);
        out
    }

    fn entries(&self, now: Timestamp) -> Vec<Entry<'_>> {
        self.participants
            .values()
            .map(|p| {
                Entry::measure(p, self.target.as_ref(), self.start, self.rules.start_leniency_ms, now)
            })
            .collect()
    }

    /// Standings for the current round, best first. `winner` is moved to
    /// the top when given.
    fn summary(&self, now: Timestamp, winner: Option<PlayerId>) -> MatchSummary {
        let mut ranked = completion::placement_order(&self.entries(now));
        if let Some(winner) = winner {
            if let Some(pos) = ranked.iter().position(|e| e.id() == winner) {
                let entry = ranked.remove(pos);
                ranked.insert(0, entry);
            }
        }

        let standings: Vec<Standing> = ranked
            .iter()
            .enumerate()
            .map(|(i, e)| Standing {
                id: e.id(),
                placement: i as u32 + 1,
                score: e.participant.score,
                wpm: e.stats.wpm,
                accuracy: e.stats.accuracy,
                finished: e.stats.progress.is_finished,
            })
            .collect();

        MatchSummary {
            winner: winner.or_else(|| standings.first().map(|s| s.id)),
            standings,
        }
    }

    fn series_for(&mut self, actor: PlayerId) -> Result<&mut Series, RoomError> {
        if self.finished {
            return Err(RoomError::Finished);
        }
        if !self.participants.get(&actor).map_or(false, |p| p.connected) {
            return Err(RoomError::NotInRoom(actor));
        }
        match &mut self.kind {
            RoomKind::Ranked(RankedRoom::HeadToHead(series)) => Ok(series),
            _ => Err(RoomError::NoPickBan),
        }
    }
}
