// src/rooms.rs
//! Room registry: the expiring room record plus its two global indexes.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{CreateRoom, Room, RoomView},
    security::{hash_password, verify_password},
    store::{keys, KeyedStore, StoreError},
};

#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn KeyedStore>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    /// Creates a room, its zeroed tally, and its index entries.
    ///
    /// Everything that can fail validation (including hashing) happens before the
    /// first write, so a rejected request leaves nothing behind.
    pub async fn create(&self, request: CreateRoom) -> Result<RoomView, AppError> {
        request.validate()?;

        let password_hash = match request.password.as_deref() {
            Some(password) if !password.is_empty() => Some(hash_password(password)?),
            _ => None,
        };

        let uuid = Uuid::new_v4();
        let room_id = uuid.to_string();
        let created_at = Utc::now();
        let expires_at = i64::try_from(request.ttl)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .ok_or_else(|| AppError::Validation("TTL is too large".to_string()))?;

        let room = Room {
            uuid,
            title: request.title,
            options: request.options,
            created_at,
            expires_at,
            has_password: password_hash.is_some(),
            tags: request.tags,
            allow_multiple: request.allow_multiple,
            is_private: request.is_private,
            total_votes: 0,
            password_hash,
        };

        let record = encode(&room)?;
        self.store
            .set_ex(&keys::room(&room_id), &record, request.ttl)
            .await?;

        let seed: Vec<(String, i64)> = room.options.iter().map(|o| (o.clone(), 0)).collect();
        let tally_key = keys::tally(&room_id);
        self.store.hset_all(&tally_key, &seed).await?;
        self.store.expire(&tally_key, request.ttl).await?;

        let created_score = created_at.timestamp_micros() as f64 / 1_000_000.0;
        self.store
            .zadd(keys::ROOMS_LATEST, &room_id, created_score)
            .await?;
        self.store.zadd(keys::ROOMS_POPULAR, &room_id, 0.0).await?;

        for tag in &room.tags {
            self.store.sadd(&keys::tag(tag), &room_id).await?;
        }

        info!(room = %room_id, ttl = request.ttl, options = room.options.len(), "Room created");
        Ok(room.into())
    }

    /// Full record including the password hash; `None` once expired.
    pub async fn get(&self, room_id: &str) -> Result<Option<Room>, AppError> {
        let key = keys::room(room_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Decode { key, source }.into())
    }

    pub async fn require(&self, room_id: &str) -> Result<Room, AppError> {
        self.get(room_id).await?.ok_or(AppError::RoomNotFound)
    }

    pub async fn view(&self, room_id: &str) -> Result<RoomView, AppError> {
        self.require(room_id).await.map(RoomView::from)
    }

    /// Seconds until the room record expires; zero or negative means it is gone.
    pub async fn remaining_ttl(&self, room_id: &str) -> Result<i64, AppError> {
        Ok(self.store.ttl(&keys::room(room_id)).await?)
    }

    /// Bumps the room's vote counter and its popularity score.
    ///
    /// The record is rewritten with its own remaining TTL. If the room expires
    /// in between, the update is dropped silently.
    ///
    /// Not atomic: concurrent callers can overwrite each other's increment.
    pub async fn increment_total_votes(&self, room_id: &str, by: u64) -> Result<(), AppError> {
        let Some(mut room) = self.get(room_id).await? else {
            return Ok(());
        };
        room.total_votes += by;

        let ttl = self.remaining_ttl(room_id).await?;
        if ttl <= 0 {
            debug!(room = %room_id, "Room expired before total votes update");
            return Ok(());
        }

        self.store
            .set_ex(&keys::room(room_id), &encode(&room)?, ttl as u64)
            .await?;
        self.store
            .zadd(keys::ROOMS_POPULAR, room_id, room.total_votes as f64)
            .await?;

        Ok(())
    }

    /// Succeeds for rooms without a password or when `password` matches.
    pub async fn verify_password(&self, room_id: &str, password: &str) -> Result<(), AppError> {
        let room = self.require(room_id).await?;
        match room.password_hash {
            None => Ok(()),
            Some(hash) if verify_password(password, &hash)? => Ok(()),
            Some(_) => Err(AppError::WrongPassword),
        }
    }
}

fn encode(room: &Room) -> Result<String, AppError> {
    serde_json::to_string(room).map_err(|e| AppError::Internal(format!("encoding room: {e}")))
}
