// src/poll.rs
//! Vote ledger: per-option tallies plus the "already voted" markers.
//!
//! `has_voted` followed by `cast_vote` is a check-then-act sequence with no
//! transaction around it. Two concurrent requests from the same identity can
//! both pass the check and both be counted. Per-option increments are also
//! independent, so a failure part way through a multi-select vote leaves a
//! partial tally behind.

use std::sync::Arc;

use tracing::debug;

use crate::{
    error::AppError,
    models::Tally,
    rooms::RoomRegistry,
    security::vote_identity,
    store::{keys, KeyedStore},
};

#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn KeyedStore>,
    rooms: RoomRegistry,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn KeyedStore>, rooms: RoomRegistry) -> Self {
        Self { store, rooms }
    }

    pub async fn has_voted(&self, room_id: &str, fingerprint: &str, ip: &str) -> Result<bool, AppError> {
        let identity = vote_identity(fingerprint, ip);
        Ok(self.store.exists(&keys::voted(room_id, &identity)).await?)
    }

    /// Records one vote across `options`.
    ///
    /// Callers are expected to have checked the options against the room and
    /// the identity against [`VoteLedger::has_voted`].
    pub async fn cast_vote(
        &self,
        room_id: &str,
        options: &[String],
        fingerprint: &str,
        ip: &str,
    ) -> Result<(), AppError> {
        let tally_key = keys::tally(room_id);
        for option in options {
            if self
                .store
                .hincr_existing(&tally_key, option, 1)
                .await?
                .is_none()
            {
                debug!(room = %room_id, option = %option, "Tally already expired, increment dropped");
            }
        }

        let identity = vote_identity(fingerprint, ip);
        let ttl = self.rooms.remaining_ttl(room_id).await?;
        if ttl > 0 {
            self.store
                .set_ex(&keys::voted(room_id, &identity), "1", ttl as u64)
                .await?;
        }

        self.rooms.increment_total_votes(room_id, 1).await
    }

    /// Current per-option counts; empty once the room has expired.
    pub async fn tally(&self, room_id: &str) -> Result<Tally, AppError> {
        Ok(self.store.hgetall(&keys::tally(room_id)).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::advance;

    use super::*;
    use crate::{memory::MemoryStore, models::CreateRoom};

    async fn setup(options: &[&str], allow_multiple: bool, ttl: u64) -> (Arc<MemoryStore>, VoteLedger, String) {
        let store = Arc::new(MemoryStore::new());
        let rooms = RoomRegistry::new(store.clone());
        let view = rooms
            .create(CreateRoom {
                title: "poll".to_string(),
                options: options.iter().map(|s| s.to_string()).collect(),
                password: None,
                ttl,
                tags: vec![],
                allow_multiple,
                is_private: false,
            })
            .await
            .unwrap();
        let ledger = VoteLedger::new(store.clone(), rooms);
        (store, ledger, view.uuid.to_string())
    }

    fn opts(options: &[&str]) -> Vec<String> {
        options.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fresh_room_tally_is_zero() {
        let (_, ledger, id) = setup(&["red", "blue", "green"], false, 3600).await;
        let tally = ledger.tally(&id).await.unwrap();
        assert_eq!(tally, Tally::from([
            ("red".to_string(), 0),
            ("blue".to_string(), 0),
            ("green".to_string(), 0),
        ]));
    }

    #[tokio::test]
    async fn test_single_vote_marks_identity() {
        let (_, ledger, id) = setup(&["red", "blue"], false, 3600).await;

        assert!(!ledger.has_voted(&id, "f1", "1.2.3.4").await.unwrap());
        ledger.cast_vote(&id, &opts(&["red"]), "f1", "1.2.3.4").await.unwrap();

        assert!(ledger.has_voted(&id, "f1", "1.2.3.4").await.unwrap());
        assert!(!ledger.has_voted(&id, "f1", "5.6.7.8").await.unwrap());

        let tally = ledger.tally(&id).await.unwrap();
        assert_eq!(tally["red"], 1);
        assert_eq!(tally["blue"], 0);
        assert_eq!(ledger.rooms.require(&id).await.unwrap().total_votes, 1);
    }

    #[tokio::test]
    async fn test_multi_select_counts_one_vote() {
        let (store, ledger, id) = setup(&["a", "b", "c"], true, 3600).await;

        ledger.cast_vote(&id, &opts(&["a", "c"]), "f1", "ip").await.unwrap();

        let tally = ledger.tally(&id).await.unwrap();
        assert_eq!((tally["a"], tally["b"], tally["c"]), (1, 0, 1));
        assert_eq!(ledger.rooms.require(&id).await.unwrap().total_votes, 1);
        assert_eq!(store.zrevrange_all(keys::ROOMS_POPULAR).await.unwrap(), vec![id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_expires_with_room() {
        let (store, ledger, id) = setup(&["a", "b"], false, 60).await;

        advance(Duration::from_secs(20)).await;
        ledger.cast_vote(&id, &opts(&["a"]), "f1", "ip").await.unwrap();

        let marker = keys::voted(&id, &vote_identity("f1", "ip"));
        assert_eq!(store.ttl(&marker).await.unwrap(), 40);

        advance(Duration::from_secs(41)).await;
        assert!(!ledger.has_voted(&id, "f1", "ip").await.unwrap());
        assert!(ledger.tally(&id).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_on_expired_room_leaves_nothing() {
        let (store, ledger, id) = setup(&["a", "b"], false, 5).await;

        advance(Duration::from_secs(6)).await;
        ledger.cast_vote(&id, &opts(&["a"]), "f1", "ip").await.unwrap();

        assert!(!store.exists(&keys::tally(&id)).await.unwrap());
        assert!(!ledger.has_voted(&id, "f1", "ip").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_then_act_is_not_atomic() {
        // Both requests pass the check before either writes its marker.
        let (_, ledger, id) = setup(&["a", "b"], false, 3600).await;

        let first = ledger.has_voted(&id, "f1", "ip").await.unwrap();
        let second = ledger.has_voted(&id, "f1", "ip").await.unwrap();
        assert!(!first && !second);

        ledger.cast_vote(&id, &opts(&["a"]), "f1", "ip").await.unwrap();
        ledger.cast_vote(&id, &opts(&["a"]), "f1", "ip").await.unwrap();

        assert_eq!(ledger.tally(&id).await.unwrap()["a"], 2);
    }
}
