//! Room Registry
//!
//! Concurrent id to room store plus player membership. Each room sits
//! behind its own mutex, so operations on one room are serialized while
//! different rooms proceed independently. Rooms are inserted fully built
//! and removed exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::game::participant::PlayerId;
use crate::game::room::{Room, RoomId, RoomMode};

/// Shared handle to one room.
pub type RoomHandle = Arc<Mutex<Room>>;

#[derive(Debug)]
struct RoomEntry {
    mode: RoomMode,
    room: RoomHandle,
}

/// All live rooms.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: RwLock<BTreeMap<RoomId, RoomEntry>>,
    members: RwLock<BTreeMap<PlayerId, RoomId>>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a fully initialized room and seat its participants.
    pub async fn insert(&self, room: Room) -> RoomHandle {
        let id = room.id();
        let mode = room.mode();
        let members = room.participant_ids();
        let handle = Arc::new(Mutex::new(room));

        self.rooms.write().await.insert(
            id,
            RoomEntry {
                mode,
                room: handle.clone(),
            },
        );
        let mut index = self.members.write().await;
        for member in members {
            index.insert(member, id);
        }
        handle
    }

    /// Look up a room.
    pub async fn get(&self, id: &RoomId) -> Option<RoomHandle> {
        self.rooms.read().await.get(id).map(|e| e.room.clone())
    }

    /// Remove a room and its memberships. Only the first call returns it.
    pub async fn remove(&self, id: &RoomId) -> Option<RoomHandle> {
        let entry = self.rooms.write().await.remove(id)?;
        self.members.write().await.retain(|_, room| room != id);
        Some(entry.room)
    }

    /// Handles of every casual room, for join scanning.
    pub async fn casual_rooms(&self) -> Vec<RoomHandle> {
        self.rooms
            .read()
            .await
            .values()
            .filter(|e| e.mode == RoomMode::Casual)
            .map(|e| e.room.clone())
            .collect()
    }

    /// Handles of every room.
    pub async fn handles(&self) -> Vec<(RoomId, RoomHandle)> {
        self.rooms
            .read()
            .await
            .iter()
            .map(|(id, e)| (*id, e.room.clone()))
            .collect()
    }

    /// Record that `player` sits in `room`.
    pub async fn assign(&self, player: PlayerId, room: RoomId) {
        self.members.write().await.insert(player, room);
    }

    /// Forget `player`'s seat, if it is in `room`.
    pub async fn release(&self, player: PlayerId, room: RoomId) {
        let mut members = self.members.write().await;
        if members.get(&player) == Some(&room) {
            members.remove(&player);
        }
    }

    /// Room `player` sits in.
    pub async fn room_of(&self, player: &PlayerId) -> Option<RoomId> {
        self.members.read().await.get(player).copied()
    }

    /// Number of live rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether no room is live.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::participant::Profile;
    use crate::game::text::{TargetText, TextCategory};

    fn profile(n: u8) -> Profile {
        Profile {
            id: PlayerId::new([n; 16]),
            name: format!("p{n}"),
            rating: 600,
            avatar: None,
        }
    }

    fn casual() -> Room {
        let text = TargetText::from_text("ab", TextCategory::QuoteEasy, "test").unwrap();
        Room::casual(RoomId::random(), GameConfig::default().casual_rules(), text, 0)
    }

    #[tokio::test]
    async fn test_remove_exactly_once() {
        let registry = RoomRegistry::new();
        let mut room = casual();
        room.join(&profile(1), 0).unwrap();
        let id = room.id();
        registry.insert(room).await;

        assert_eq!(registry.room_of(&PlayerId::new([1; 16])).await, Some(id));
        assert!(registry.remove(&id).await.is_some());
        assert!(registry.remove(&id).await.is_none());
        assert!(registry.get(&id).await.is_none());
        assert_eq!(registry.room_of(&PlayerId::new([1; 16])).await, None);
    }

    #[tokio::test]
    async fn test_casual_rooms_filter() {
        let registry = RoomRegistry::new();
        registry.insert(casual()).await;

        let (ranked, _) = Room::head_to_head(
            RoomId::random(),
            GameConfig::default().ranked_rules(),
            &profile(1),
            &profile(2),
            0,
        );
        registry.insert(ranked).await;

        assert_eq!(registry.len().await, 2);
        assert_eq!(registry.casual_rooms().await.len(), 1);
        assert!(registry.room_of(&PlayerId::new([2; 16])).await.is_some());
    }

    #[tokio::test]
    async fn test_release_only_matching_room() {
        let registry = RoomRegistry::new();
        let player = PlayerId::new([3; 16]);
        let (a, b) = (RoomId::random(), RoomId::random());

        registry.assign(player, a).await;
        registry.release(player, b).await;
        assert_eq!(registry.room_of(&player).await, Some(a));
        registry.release(player, a).await;
        assert_eq!(registry.room_of(&player).await, None);
    }
}
