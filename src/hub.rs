// src/hub.rs
//! Live results fan-out.
//!
//! Process-local registry of subscriber channels per room. Each subscriber is
//! a bounded queue drained by its own connection task. A push fails when that
//! task is gone or has fallen [`SUBSCRIBER_QUEUE_DEPTH`] frames behind, and
//! failed subscribers are pruned after the pass. Dropping the sender ends the
//! connection task.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{
    mpsc::{self, error::TrySendError, Receiver, Sender},
    RwLock,
};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{ResultsMessage, Tally},
    poll::VoteLedger,
    rooms::RoomRegistry,
};

/// Frames a subscriber may have queued before it counts as stalled.
pub const SUBSCRIBER_QUEUE_DEPTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: Sender<String>,
}

/// A registered subscriber; `receiver` yields serialized frames to push.
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: Receiver<String>,
}

#[derive(Clone)]
pub struct BroadcastHub {
    rooms: RoomRegistry,
    ledger: VoteLedger,
    // room id -> live subscribers
    inner: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
}

impl BroadcastHub {
    pub fn new(rooms: RoomRegistry, ledger: VoteLedger) -> Self {
        Self {
            rooms,
            ledger,
            inner: Arc::default(),
        }
    }

    /// Registers a subscriber and queues the current tally as its first frame.
    ///
    /// Fails with [`AppError::RoomNotFound`] when the room is absent or expired.
    pub async fn subscribe(&self, room_id: &str) -> Result<Subscription, AppError> {
        if self.rooms.get(room_id).await?.is_none() {
            return Err(AppError::RoomNotFound);
        }

        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = SubscriberId::new();

        {
            let mut guard = self.inner.write().await;
            guard
                .entry(room_id.to_string())
                .or_default()
                .push(Subscriber {
                    id,
                    sender: sender.clone(),
                });
            debug!(
                room = %room_id,
                subscriber = ?id,
                total = guard.get(room_id).map_or(0, Vec::len),
                "Subscriber added"
            );
        }

        let results = self.ledger.tally(room_id).await?;
        let frame = encode(&ResultsMessage::InitialResults { results })?;
        // The receiver is still in hand and a broadcast can fill at most a
        // full queue, which the next broadcast prunes anyway.
        let _ = sender.try_send(frame);

        Ok(Subscription { id, receiver })
    }

    pub async fn unsubscribe(&self, room_id: &str, id: SubscriberId) {
        let mut guard = self.inner.write().await;
        let Some(subscribers) = guard.get_mut(room_id) else {
            return;
        };

        subscribers.retain(|s| s.id != id);
        debug!(room = %room_id, subscriber = ?id, remaining = subscribers.len(), "Subscriber removed");

        if subscribers.is_empty() {
            guard.remove(room_id);
        }
    }

    /// Pushes the full current tally to every subscriber of `room_id`.
    pub async fn broadcast(&self, room_id: &str) -> Result<(), AppError> {
        if self.subscriber_count(room_id).await == 0 {
            return Ok(());
        }

        let results: Tally = self.ledger.tally(room_id).await?;
        let frame = encode(&ResultsMessage::VoteUpdate { results })?;

        let dead: Vec<SubscriberId> = {
            let guard = self.inner.read().await;
            guard
                .get(room_id)
                .map(|subscribers| {
                    subscribers
                        .iter()
                        .filter(|s| match s.sender.try_send(frame.clone()) {
                            Ok(()) => false,
                            Err(TrySendError::Full(_)) => {
                                debug!(room = %room_id, subscriber = ?s.id, "Subscriber stalled");
                                true
                            }
                            Err(TrySendError::Closed(_)) => true,
                        })
                        .map(|s| s.id)
                        .collect()
                })
                .unwrap_or_default()
        };

        if !dead.is_empty() {
            warn!(room = %room_id, count = dead.len(), "Pruning disconnected subscribers");
            let mut guard = self.inner.write().await;
            if let Some(subscribers) = guard.get_mut(room_id) {
                subscribers.retain(|s| !dead.contains(&s.id));
                if subscribers.is_empty() {
                    guard.remove(room_id);
                }
            }
        }

        Ok(())
    }

    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        let guard = self.inner.read().await;
        guard.get(room_id).map_or(0, Vec::len)
    }

    /// Rooms with at least one live subscriber.
    pub async fn active_rooms(&self) -> usize {
        self.inner.read().await.len()
    }
}

fn encode(message: &ResultsMessage) -> Result<String, AppError> {
    serde_json::to_string(message).map_err(|e| AppError::Internal(format!("encoding frame: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory::MemoryStore, models::CreateRoom};

    struct Fixture {
        hub: BroadcastHub,
        ledger: VoteLedger,
        room_id: String,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rooms = RoomRegistry::new(store.clone());
        let ledger = VoteLedger::new(store, rooms.clone());
        let room_id = rooms
            .create(CreateRoom {
                title: "live".to_string(),
                options: vec!["red".to_string(), "blue".to_string()],
                password: None,
                ttl: 3600,
                tags: vec![],
                allow_multiple: false,
                is_private: false,
            })
            .await
            .unwrap()
            .uuid
            .to_string();
        Fixture {
            hub: BroadcastHub::new(rooms, ledger.clone()),
            ledger,
            room_id,
        }
    }

    fn decode(frame: &str) -> ResultsMessage {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_unknown_room_is_rejected() {
        let f = fixture().await;
        assert!(matches!(
            f.hub.subscribe("no-such-room").await,
            Err(AppError::RoomNotFound)
        ));
        assert_eq!(f.hub.active_rooms().await, 0);
    }

    #[tokio::test]
    async fn test_subscribe_pushes_initial_results() {
        let f = fixture().await;
        let mut sub = f.hub.subscribe(&f.room_id).await.unwrap();

        let frame = sub.receiver.recv().await.unwrap();
        let expected = Tally::from([("red".to_string(), 0), ("blue".to_string(), 0)]);
        assert_eq!(decode(&frame), ResultsMessage::InitialResults { results: expected });
        assert_eq!(f.hub.subscriber_count(&f.room_id).await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let f = fixture().await;
        let mut a = f.hub.subscribe(&f.room_id).await.unwrap();
        let mut b = f.hub.subscribe(&f.room_id).await.unwrap();
        a.receiver.recv().await.unwrap();
        b.receiver.recv().await.unwrap();

        f.ledger
            .cast_vote(&f.room_id, &["red".to_string()], "f1", "ip")
            .await
            .unwrap();
        f.hub.broadcast(&f.room_id).await.unwrap();

        for sub in [&mut a, &mut b] {
            let ResultsMessage::VoteUpdate { results } = decode(&sub.receiver.recv().await.unwrap()) else {
                panic!("expected a vote update");
            };
            assert_eq!(results["red"], 1);
            assert_eq!(results["blue"], 0);
        }
    }

    #[tokio::test]
    async fn test_broadcast_prunes_dead_subscribers() {
        let f = fixture().await;
        let dropped = f.hub.subscribe(&f.room_id).await.unwrap();
        let mut alive = f.hub.subscribe(&f.room_id).await.unwrap();
        alive.receiver.recv().await.unwrap();
        drop(dropped);

        assert_eq!(f.hub.subscriber_count(&f.room_id).await, 2);
        f.hub.broadcast(&f.room_id).await.unwrap();

        assert_eq!(f.hub.subscriber_count(&f.room_id).await, 1);
        assert!(matches!(
            decode(&alive.receiver.recv().await.unwrap()),
            ResultsMessage::VoteUpdate { .. }
        ));
    }

    #[tokio::test]
    async fn test_broadcast_prunes_stalled_subscriber() {
        let f = fixture().await;
        let mut stalled = f.hub.subscribe(&f.room_id).await.unwrap();
        let mut alive = f.hub.subscribe(&f.room_id).await.unwrap();

        // the initial frame occupies one slot of the stalled queue
        for _ in 0..SUBSCRIBER_QUEUE_DEPTH {
            f.hub.broadcast(&f.room_id).await.unwrap();
            alive.receiver.recv().await.unwrap();
        }
        assert_eq!(f.hub.subscriber_count(&f.room_id).await, 1);

        // the backlog is bounded and ends once the hub drops the sender
        let mut queued = 0;
        while stalled.receiver.recv().await.is_some() {
            queued += 1;
        }
        assert_eq!(queued, SUBSCRIBER_QUEUE_DEPTH);

        f.hub.broadcast(&f.room_id).await.unwrap();
        assert!(matches!(
            decode(&alive.receiver.recv().await.unwrap()),
            ResultsMessage::VoteUpdate { .. }
        ));
    }

    #[tokio::test]
    async fn test_last_unsubscribe_removes_room_entry() {
        let f = fixture().await;
        let a = f.hub.subscribe(&f.room_id).await.unwrap();
        let b = f.hub.subscribe(&f.room_id).await.unwrap();

        f.hub.unsubscribe(&f.room_id, a.id).await;
        assert_eq!(f.hub.subscriber_count(&f.room_id).await, 1);
        assert_eq!(f.hub.active_rooms().await, 1);

        f.hub.unsubscribe(&f.room_id, b.id).await;
        assert_eq!(f.hub.active_rooms().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_noop() {
        let f = fixture().await;
        f.hub.broadcast(&f.room_id).await.unwrap();
        f.hub.broadcast("unknown").await.unwrap();
        assert_eq!(f.hub.active_rooms().await, 0);
    }
}
