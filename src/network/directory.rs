//! Delivery Directory
//!
//! Resolves a player id to its connection's outbox at send time. Rooms and
//! queues only ever hold ids.

use std::collections::BTreeMap;
use tokio::sync::{mpsc, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tracing::warn;

use crate::game::participant::PlayerId;
use crate::network::protocol::ServerMessage;

/// Outbox capacity per connection.
pub const OUTBOX_CAPACITY: usize = 64;

/// What a connection's writer task is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Send a message.
    Message(ServerMessage),
    /// Close the socket after everything queued before it.
    Close,
}

/// Player id to outbox.
#[derive(Debug, Default)]
pub struct ConnectionDirectory {
    channels: RwLock<BTreeMap<PlayerId, mpsc::Sender<Outbound>>>,
}

impl ConnectionDirectory {
    /// Empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an outbox for `id`.
    pub async fn register(&self, id: PlayerId) -> mpsc::Receiver<Outbound> {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.channels.write().await.insert(id, tx);
        rx
    }

    /// Drop `id`'s outbox.
    pub async fn unregister(&self, id: PlayerId) {
        self.channels.write().await.remove(&id);
    }

    /// Queue a message for `id`. Returns false if it could not be queued.
    ///
    /// Never waits: a full outbox drops the message.
    pub async fn send(&self, id: PlayerId, message: ServerMessage) -> bool {
        self.push(id, Outbound::Message(message)).await
    }

    /// Queue `message` for every id in `ids`.
    pub async fn broadcast(&self, ids: &[PlayerId], message: &ServerMessage) {
        let channels = self.channels.read().await;
        for id in ids {
            if let Some(tx) = channels.get(id) {
                deliver(*id, tx, Outbound::Message(message.clone()));
            }
        }
    }

    /// Queue a match result for every id in `ids`.
    ///
    /// Results must not be lost: an outbox too full to take one is dropped,
    /// which closes that connection once its writer drains.
    pub async fn broadcast_final(&self, ids: &[PlayerId], message: &ServerMessage) {
        let mut channels = self.channels.write().await;
        for id in ids {
            let Some(tx) = channels.get(id) else {
                continue;
            };
            let full = matches!(tx.try_send(Outbound::Message(message.clone())), Err(TrySendError::Full(_)));
            if full {
                warn!(player = %id.short(), "Outbox full for a match result, closing connection");
                channels.remove(id);
            }
        }
    }

    /// Ask `id`'s writer to close the socket.
    pub async fn close(&self, id: PlayerId) -> bool {
        self.push(id, Outbound::Close).await
    }

    /// Whether `id` has an outbox.
    pub async fn contains(&self, id: PlayerId) -> bool {
        self.channels.read().await.contains_key(&id)
    }

    async fn push(&self, id: PlayerId, outbound: Outbound) -> bool {
        let channels = self.channels.read().await;
        match channels.get(&id) {
            Some(tx) => deliver(id, tx, outbound),
            None => false,
        }
    }
}

fn deliver(id: PlayerId, tx: &mpsc::Sender<Outbound>, outbound: Outbound) -> bool {
    match tx.try_send(outbound) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(player = %id.short(), "Outbox full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ErrorCode;

    #[tokio::test]
    async fn test_send_and_close() {
        let directory = ConnectionDirectory::new();
        let id = PlayerId::new([1; 16]);
        let mut rx = directory.register(id).await;

        assert!(directory.send(id, ServerMessage::error(ErrorCode::MissingText, "none")).await);
        assert!(directory.close(id).await);

        assert!(matches!(rx.recv().await, Some(Outbound::Message(ServerMessage::Error(_)))));
        assert_eq!(rx.recv().await, Some(Outbound::Close));
    }

    #[tokio::test]
    async fn test_unknown_and_unregistered() {
        let directory = ConnectionDirectory::new();
        let id = PlayerId::new([1; 16]);
        assert!(!directory.close(id).await);

        let _rx = directory.register(id).await;
        directory.unregister(id).await;
        assert!(!directory.contains(id).await);
        assert!(!directory.close(id).await);
    }

    #[tokio::test]
    async fn test_full_outbox_drops() {
        let directory = ConnectionDirectory::new();
        let id = PlayerId::new([1; 16]);
        let _rx = directory.register(id).await;

        for _ in 0..OUTBOX_CAPACITY {
            assert!(directory.close(id).await);
        }
        assert!(!directory.close(id).await);
    }

    #[tokio::test]
    async fn test_undeliverable_result_drops_outbox() {
        let directory = ConnectionDirectory::new();
        let (a, b) = (PlayerId::new([1; 16]), PlayerId::new([2; 16]));
        let mut full = directory.register(a).await;
        let mut open = directory.register(b).await;
        for _ in 0..OUTBOX_CAPACITY {
            directory.send(a, ServerMessage::Shutdown { reason: "fill".into() }).await;
        }

        let result = ServerMessage::RatingUpdate { ratings: Vec::new() };
        directory.broadcast_final(&[a, b], &result).await;

        assert!(!directory.contains(a).await);
        assert!(directory.contains(b).await);
        assert_eq!(open.recv().await, Some(Outbound::Message(result)));

        // The writer sees what was queued, then the end of the channel
        for _ in 0..OUTBOX_CAPACITY {
            assert!(full.recv().await.is_some());
        }
        assert_eq!(full.recv().await, None);
    }

    #[tokio::test]
    async fn test_broadcast_skips_missing() {
        let directory = ConnectionDirectory::new();
        let (a, b) = (PlayerId::new([1; 16]), PlayerId::new([2; 16]));
        let mut rx = directory.register(a).await;

        let msg = ServerMessage::Shutdown { reason: "bye".into() };
        directory.broadcast(&[a, b], &msg).await;
        assert_eq!(rx.recv().await, Some(Outbound::Message(msg)));
    }
}
