// src/comments.rs
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{Comment, CreateComment},
    rooms::RoomRegistry,
    store::{keys, KeyedStore, StoreError},
};

const ANONYMOUS: &str = "Anonymous";

/// Append-only comment list per room, expiring with the room.
#[derive(Clone)]
pub struct CommentBoard {
    store: Arc<dyn KeyedStore>,
    rooms: RoomRegistry,
}

impl CommentBoard {
    pub fn new(store: Arc<dyn KeyedStore>, rooms: RoomRegistry) -> Self {
        Self { store, rooms }
    }

    pub async fn create(&self, room_id: &str, request: CreateComment) -> Result<Comment, AppError> {
        request.validate()?;
        let room = self.rooms.require(room_id).await?;

        let comment = Comment {
            id: Uuid::new_v4(),
            room_uuid: room.uuid,
            content: request.content,
            nickname: request
                .nickname
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| ANONYMOUS.to_string()),
            created_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&comment)
            .map_err(|e| AppError::Internal(format!("encoding comment: {e}")))?;

        let key = keys::comments(room_id);
        self.store.rpush(&key, &encoded).await?;

        let ttl = self.rooms.remaining_ttl(room_id).await?;
        if ttl > 0 {
            self.store.expire(&key, ttl as u64).await?;
        }

        Ok(comment)
    }

    /// Comments in the order they were written.
    pub async fn list(&self, room_id: &str) -> Result<Vec<Comment>, AppError> {
        self.rooms.require(room_id).await?;

        let key = keys::comments(room_id);
        self.store
            .lrange_all(&key)
            .await?
            .iter()
            .map(|raw| {
                serde_json::from_str::<Comment>(raw).map_err(|source| {
                    AppError::from(StoreError::Decode {
                        key: key.clone(),
                        source,
                    })
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::advance;

    use super::*;
    use crate::{memory::MemoryStore, models::CreateRoom};

    async fn board(ttl: u64) -> (Arc<MemoryStore>, CommentBoard, String) {
        let store = Arc::new(MemoryStore::new());
        let rooms = RoomRegistry::new(store.clone());
        let id = rooms
            .create(CreateRoom {
                title: "chatty".to_string(),
                options: vec!["a".to_string(), "b".to_string()],
                password: None,
                ttl,
                tags: vec![],
                allow_multiple: false,
                is_private: false,
            })
            .await
            .unwrap()
            .uuid
            .to_string();
        (store.clone(), CommentBoard::new(store, rooms), id)
    }

    fn comment(content: &str, nickname: Option<&str>) -> CreateComment {
        CreateComment {
            content: content.to_string(),
            nickname: nickname.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_comments_in_order() {
        let (_, board, id) = board(3600).await;
        board.create(&id, comment("first", Some("kim"))).await.unwrap();
        board.create(&id, comment("second", None)).await.unwrap();

        let comments = board.list(&id).await.unwrap();
        let contents: Vec<_> = comments.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(comments[0].nickname, "kim");
        assert_eq!(comments[1].nickname, ANONYMOUS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_comments_expire_with_room() {
        let (store, board, id) = board(60).await;
        advance(Duration::from_secs(15)).await;
        board.create(&id, comment("hello", None)).await.unwrap();

        assert_eq!(store.ttl(&keys::comments(&id)).await.unwrap(), 45);

        advance(Duration::from_secs(46)).await;
        assert!(!store.exists(&keys::comments(&id)).await.unwrap());
        assert!(matches!(board.list(&id).await, Err(AppError::RoomNotFound)));
    }

    #[tokio::test]
    async fn test_comment_on_missing_room() {
        let (store, board, _) = board(60).await;
        assert!(matches!(
            board.create("missing", comment("hi", None)).await,
            Err(AppError::RoomNotFound)
        ));
        assert!(!store.exists(&keys::comments("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_comment_is_rejected() {
        let (_, board, id) = board(60).await;
        assert!(matches!(
            board.create(&id, comment("", None)).await,
            Err(AppError::Validation(_))
        ));
    }
}
