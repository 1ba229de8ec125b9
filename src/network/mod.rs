//! Network Layer
//!
//! WebSocket front end, admission, matchmaking and the room registry.
//! All race decisions happen in `game/`; this layer routes messages, owns
//! timers and talks to the external stores.

pub mod admission;
pub mod auth;
pub mod directory;
pub mod matchmaking;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod service;

pub use admission::{AdmissionError, Identity, SessionAdmission};
pub use auth::{AuthConfig, TokenClaims, AuthError, validate_token, guest_profile};
pub use directory::{ConnectionDirectory, Outbound};
pub use matchmaking::{MatchmakingQueue, WaitingTicket};
pub use protocol::{
    AuthRequest, ClientMessage, ServerMessage, ErrorCode, ServerError,
    ParticipantView, RoomSnapshot,
};
pub use registry::{RoomHandle, RoomRegistry};
pub use server::{GameServer, ServerConfig, GameServerError};
pub use service::{Flow, MatchService};
