//! Category Pick/Ban
//!
//! Between ranked rounds one participant bans a category and the other picks
//! the category the next text is drawn from. Bans accumulate over the match,
//! so round `n` is played after `n` bans (while more than one category is
//! left to ban from). Turns alternate every round.
//!
//! Every phase change bumps a version. Deadlines carry the version they were
//! scheduled under and are ignored once it has moved on.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::clock::Timestamp;
use crate::core::rng::DeterministicRng;
use crate::game::participant::PlayerId;
use crate::game::text::TextCategory;

/// A decision deadline, tagged with the controller version that armed it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    /// Controller version when scheduled.
    pub version: u64,
    /// When the automatic choice is made.
    pub at: Timestamp,
}

/// Pick/ban phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum PickBanPhase {
    /// Waiting for `actor` to ban a category.
    BlacklistTurn {
        actor: PlayerId,
        deadline: Timestamp,
    },
    /// Waiting for `actor` to pick a category.
    SelectTurn {
        actor: PlayerId,
        deadline: Timestamp,
    },
    /// Category chosen, text being fetched.
    AwaitingText {
        category: TextCategory,
    },
    /// Text assigned, round under way.
    Complete {
        category: TextCategory,
    },
}

/// Pick/ban errors. None of these end the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickBanError {
    /// Someone else holds the turn.
    #[error("it is not your turn")]
    NotYourTurn,
    /// Ban attempted during the pick turn, or the other way round.
    #[error("no {0} decision is pending")]
    WrongPhase(&'static str),
    /// Category was banned already.
    #[error("category {0} is blacklisted")]
    Blacklisted(TextCategory),
    /// The decision window closed; the server is choosing.
    #[error("the decision deadline has passed")]
    DeadlinePassed,
}

/// Result of a phase transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PickBanStep {
    /// A new turn started.
    Turn(Deadline),
    /// A category was picked; its text has to be fetched.
    Picked(TextCategory),
}

/// Ranked pick/ban sub-protocol for two participants.
#[derive(Clone, Debug)]
pub struct PickBanController {
    first_to_blacklist: PlayerId,
    second: PlayerId,
    round: u32,
    blacklisted: Vec<TextCategory>,
    phase: PickBanPhase,
    version: u64,
    decision_ms: i64,
}

impl PickBanController {
    /// Create the controller and open round 1.
    pub fn new(
        first_to_blacklist: PlayerId,
        second: PlayerId,
        decision_ms: i64,
        now: Timestamp,
    ) -> (Self, Deadline) {
        let mut controller = Self {
            first_to_blacklist,
            second,
            round: 0,
            blacklisted: Vec::new(),
            // Replaced by begin_round below
            phase: PickBanPhase::Complete { category: TextCategory::QuoteEasy },
            version: 0,
            decision_ms,
        };
        let deadline = controller.begin_round(1, now);
        (controller, deadline)
    }

    /// Open `round`. Skips the ban turn when at most one category is left.
    pub fn begin_round(&mut self, round: u32, now: Timestamp) -> Deadline {
        self.round = round;
        let (banner, picker) = self.turn_order();
        let deadline = now + self.decision_ms;
        self.phase = if self.remaining().len() > 1 {
            PickBanPhase::BlacklistTurn { actor: banner, deadline }
        } else {
            PickBanPhase::SelectTurn { actor: picker, deadline }
        };
        self.bump(deadline)
    }

    /// Ban `category` on behalf of `actor`.
    pub fn ban(
        &mut self,
        actor: PlayerId,
        category: TextCategory,
        now: Timestamp,
    ) -> Result<Deadline, PickBanError> {
        let PickBanPhase::BlacklistTurn { actor: expected, deadline } = self.phase else {
            return Err(PickBanError::WrongPhase("ban"));
        };
        if actor != expected {
            return Err(PickBanError::NotYourTurn);
        }
        if now > deadline {
            return Err(PickBanError::DeadlinePassed);
        }
        if self.blacklisted.contains(&category) {
            return Err(PickBanError::Blacklisted(category));
        }
        Ok(self.apply_ban(category, now))
    }

    /// Pick `category` on behalf of `actor`.
    pub fn select(
        &mut self,
        actor: PlayerId,
        category: TextCategory,
        now: Timestamp,
    ) -> Result<TextCategory, PickBanError> {
        let PickBanPhase::SelectTurn { actor: expected, deadline } = self.phase else {
            return Err(PickBanError::WrongPhase("pick"));
        };
        if actor != expected {
            return Err(PickBanError::NotYourTurn);
        }
        if now > deadline {
            return Err(PickBanError::DeadlinePassed);
        }
        if self.blacklisted.contains(&category) {
            return Err(PickBanError::Blacklisted(category));
        }
        Ok(self.apply_select(category))
    }

    /// Handle an expired deadline. Stale versions return `None`.
    pub fn on_deadline(
        &mut self,
        version: u64,
        now: Timestamp,
        rng: &mut DeterministicRng,
    ) -> Option<PickBanStep> {
        if version != self.version {
            return None;
        }
        let remaining = self.remaining();
        let category = *rng.choose(&remaining)?;
        match self.phase {
            PickBanPhase::BlacklistTurn { .. } => {
                Some(PickBanStep::Turn(self.apply_ban(category, now)))
            }
            PickBanPhase::SelectTurn { .. } => Some(PickBanStep::Picked(self.apply_select(category))),
            PickBanPhase::AwaitingText { .. } | PickBanPhase::Complete { .. } => None,
        }
    }

    /// The fetched text was assigned. Returns false if no text was awaited.
    pub fn text_assigned(&mut self) -> bool {
        let PickBanPhase::AwaitingText { category } = self.phase else {
            return false;
        };
        self.phase = PickBanPhase::Complete { category };
        self.version += 1;
        true
    }

    /// No text could be fetched; hand the pick back to the picker.
    pub fn text_missing(&mut self, now: Timestamp) -> Option<Deadline> {
        if !matches!(self.phase, PickBanPhase::AwaitingText { .. }) {
            return None;
        }
        let (_, picker) = self.turn_order();
        let deadline = now + self.decision_ms;
        self.phase = PickBanPhase::SelectTurn { actor: picker, deadline };
        Some(self.bump(deadline))
    }

    /// Current phase.
    pub fn phase(&self) -> PickBanPhase {
        self.phase
    }

    /// Current round (1-based).
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Participant who bans in odd rounds.
    pub fn first_to_blacklist(&self) -> PlayerId {
        self.first_to_blacklist
    }

    /// Categories banned so far, in ban order.
    pub fn blacklisted(&self) -> &[TextCategory] {
        &self.blacklisted
    }

    /// Categories still available.
    pub fn remaining(&self) -> Vec<TextCategory> {
        TextCategory::ALL
            .into_iter()
            .filter(|c| !self.blacklisted.contains(c))
            .collect()
    }

    /// Deadline of the pending decision, if any.
    pub fn decision_deadline(&self) -> Option<Timestamp> {
        match self.phase {
            PickBanPhase::BlacklistTurn { deadline, .. }
            | PickBanPhase::SelectTurn { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    /// Version of the current phase.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// (banner, picker) for the current round.
    fn turn_order(&self) -> (PlayerId, PlayerId) {
        if self.round % 2 == 1 {
            (self.first_to_blacklist, self.second)
        } else {
            (self.second, self.first_to_blacklist)
        }
    }

    fn apply_ban(&mut self, category: TextCategory, now: Timestamp) -> Deadline {
        self.blacklisted.push(category);
        let (_, picker) = self.turn_order();
        let deadline = now + self.decision_ms;
        self.phase = PickBanPhase::SelectTurn { actor: picker, deadline };
        self.bump(deadline)
    }

    fn apply_select(&mut self, category: TextCategory) -> TextCategory {
        self.phase = PickBanPhase::AwaitingText { category };
        self.version += 1;
        category
    }

    fn bump(&mut self, at: Timestamp) -> Deadline {
        self.version += 1;
        Deadline { version: self.version, at }
    }
}
