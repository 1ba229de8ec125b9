//! Core primitives.
//!
//! Deterministic building blocks shared by the game and network layers.

pub mod clock;
pub mod rng;

// Re-export core types
pub use clock::{MatchClock, Timestamp};
pub use rng::DeterministicRng;
