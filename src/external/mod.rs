//! External Collaborators
//!
//! The profile store and the text corpus live outside the server. The match
//! service only sees them through these traits.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    EXTERNAL SERVICES                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  profiles.rs     - Profile lookup and rating persistence    │
//! │  texts.rs        - Target text selection per category       │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod profiles;
pub mod texts;

// Re-export key types
pub use profiles::{ProfileStore, InMemoryProfileStore, StoreError};
pub use texts::{TextProvider, BuiltinTextProvider, DICTIONARY_LENGTH};
