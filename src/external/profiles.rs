//! Profile Store
//!
//! Lookup of player profiles and best-effort rating persistence.

use std::collections::BTreeMap;
use std::path::Path;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::game::participant::{PlayerId, Profile};

/// Profile store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No profile with this id.
    #[error("profile {0} not found")]
    NotFound(PlayerId),
    /// The backing store could not be reached.
    #[error("profile store unavailable: {0}")]
    Unavailable(String),
    /// Seed file could not be read.
    #[error("failed to read profiles: {0}")]
    Io(#[from] std::io::Error),
    /// Seed file is not valid JSON.
    #[error("failed to parse profiles: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Persistent user records.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile, `None` if unknown.
    async fn get_profile(&self, id: PlayerId) -> Result<Option<Profile>, StoreError>;

    /// Store a new rating.
    async fn update_rating(&self, id: PlayerId, rating: i32) -> Result<(), StoreError>;
}

/// Profiles held in memory.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<BTreeMap<PlayerId, Profile>>,
}

impl InMemoryProfileStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with `profiles`.
    pub fn with_profiles(profiles: impl IntoIterator<Item = Profile>) -> Self {
        Self {
            profiles: RwLock::new(profiles.into_iter().map(|p| (p.id, p)).collect()),
        }
    }

    /// Load a JSON array of profiles.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let profiles: Vec<Profile> = serde_json::from_str(&raw)?;
        Ok(Self::with_profiles(profiles))
    }

    /// Add or replace a profile.
    pub async fn insert(&self, profile: Profile) {
        self.profiles.write().await.insert(profile.id, profile);
    }

    /// Number of profiles.
    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, id: PlayerId) -> Result<Option<Profile>, StoreError> {
        Ok(self.profiles.read().await.get(&id).cloned())
    }

    async fn update_rating(&self, id: PlayerId, rating: i32) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        profile.rating = rating;
        Ok(())
    }
}
