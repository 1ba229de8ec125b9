//! Match Logic Module
//!
//! Everything that decides a race. Deterministic given its inputs: time is
//! passed in, randomness comes from seeded room RNGs, and nothing here logs
//! or performs I/O.
//!
//! ## Module Structure
//!
//! - `participant`: Player ids, profiles, seated participants
//! - `replay`: Edit events, replays, text reconstruction
//! - `scoring`: Completed length, WPM, accuracy
//! - `text`: Target texts and categories
//! - `rating`: ELO updates
//! - `pickban`: Ranked category ban/pick between rounds
//! - `completion`: Round and match completion decisions
//! - `room`: Room state machine
//! - `events`: Events rooms emit for the network layer

pub mod participant;
pub mod replay;
pub mod scoring;
pub mod text;
pub mod rating;
pub mod pickban;
pub mod completion;
pub mod room;
pub mod events;

// Re-export key types
pub use participant::{Participant, PlayerId, Profile, DEFAULT_RATING};
pub use replay::{EditEvent, Replay, reconstruct};
pub use scoring::{Progress, RoundStats};
pub use text::{TargetText, TextCategory};
pub use rating::RatingChange;
pub use pickban::{Deadline, PickBanController, PickBanPhase};
pub use room::{Room, RoomError, RoomId, RoomKind, RoomMode, RoomPhase, RoomRules};
pub use events::{MatchSummary, RoomEvent, Standing};
