//! # Typerace Match Server
//!
//! Real-time orchestration for typing races: casual lobbies anyone can
//! drop into, and ranked matches with ELO, best-of-N series and category
//! pick/ban.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    TYPERACE SERVER                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Clock and seeded randomness               │
//! │  ├── clock.rs    - Millisecond match clock                   │
//! │  └── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │                                                              │
//! │  game/           - Race logic (no I/O)                       │
//! │  ├── replay.rs   - Edit events and text reconstruction       │
//! │  ├── scoring.rs  - WPM, accuracy, completed length           │
//! │  ├── rating.rs   - ELO updates                               │
//! │  ├── pickban.rs  - Ranked category ban/pick                  │
//! │  ├── completion.rs - Round and match decisions               │
//! │  └── room.rs     - Room state machine                        │
//! │                                                              │
//! │  external/       - Profile store and text corpus             │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── server.rs   - WebSocket server                          │
//! │  ├── protocol.rs - Message types                             │
//! │  ├── service.rs  - Message routing and room timers           │
//! │  └── matchmaking.rs - Ranked waiting pool                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Rooms are plain state machines: they take the current time as an
//! argument and return [`game::RoomEvent`]s. The network layer turns those
//! events into messages, timers and store writes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod external;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use config::GameConfig;
pub use core::clock::{MatchClock, Timestamp};
pub use core::rng::DeterministicRng;
pub use game::{PlayerId, Profile, Room, RoomEvent, RoomId, RoomMode};
pub use network::{GameServer, MatchService, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
