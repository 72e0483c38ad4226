// models.rs
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::AppError;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_TAGS: usize = 5;
pub const MAX_TAG_CHARS: usize = 20;
pub const MAX_COMMENT_CHARS: usize = 500;
pub const MAX_NICKNAME_CHARS: usize = 30;
pub const DEFAULT_TTL_SECS: u64 = 3600;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Option label -> vote count.
pub type Tally = HashMap<String, i64>;

/// Durable room record, stored as JSON under `room:{uuid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub uuid: Uuid,
    pub title: String,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub has_password: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub total_votes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

/// Public view of a room; never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomView {
    pub uuid: Uuid,
    pub title: String,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub has_password: bool,
    pub tags: Vec<String>,
    pub allow_multiple: bool,
    pub is_private: bool,
    pub total_votes: u64,
}

impl From<Room> for RoomView {
    fn from(room: Room) -> Self {
        Self {
            uuid: room.uuid,
            title: room.title,
            options: room.options,
            created_at: room.created_at,
            expires_at: room.expires_at,
            has_password: room.has_password,
            tags: room.tags,
            allow_multiple: room.allow_multiple,
            is_private: room.is_private,
            total_votes: room.total_votes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomSummary {
    pub uuid: Uuid,
    pub title: String,
    pub tags: Vec<String>,
    pub total_votes: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub has_password: bool,
    pub allow_multiple: bool,
    pub is_private: bool,
}

impl From<Room> for RoomSummary {
    fn from(room: Room) -> Self {
        Self {
            uuid: room.uuid,
            title: room.title,
            tags: room.tags,
            total_votes: room.total_votes,
            created_at: room.created_at,
            expires_at: room.expires_at,
            has_password: room.has_password,
            allow_multiple: room.allow_multiple,
            is_private: room.is_private,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoom {
    pub title: String,
    pub options: Vec<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub is_private: bool,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECS
}

impl CreateRoom {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.options.len() < MIN_OPTIONS {
            return Err(AppError::Validation(format!(
                "At least {MIN_OPTIONS} options are required"
            )));
        }
        if self.tags.len() > MAX_TAGS {
            return Err(AppError::Validation(format!(
                "At most {MAX_TAGS} tags are allowed"
            )));
        }
        if self
            .tags
            .iter()
            .any(|tag| tag.chars().count() > MAX_TAG_CHARS)
        {
            return Err(AppError::Validation(format!(
                "Tags must be at most {MAX_TAG_CHARS} characters"
            )));
        }
        if self.ttl == 0 {
            return Err(AppError::Validation("TTL must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteRequest {
    pub options: Vec<String>,
    pub fingerprint: String,
}

impl VoteRequest {
    /// Checks the selection against the room it is cast in.
    pub fn validate_for(&self, room: &Room) -> Result<(), AppError> {
        if self.options.is_empty() {
            return Err(AppError::Validation(
                "At least one option must be selected".to_string(),
            ));
        }
        if let Some(unknown) = self.options.iter().find(|o| !room.options.contains(o)) {
            return Err(AppError::InvalidOption(unknown.clone()));
        }
        if !room.allow_multiple && self.options.len() > 1 {
            return Err(AppError::MultipleNotAllowed);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordVerifyRequest {
    pub password: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Latest,
    Popular,
}

/// Query string of `GET /rooms`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    #[serde(default, deserialize_with = "comma_separated")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sort: SortOrder,
    #[serde(default = "first_page")]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            search: None,
            tags: Vec::new(),
            sort: SortOrder::Latest,
            page: first_page(),
            page_size: default_page_size(),
        }
    }
}

impl ListQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.page < 1 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(AppError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }
}

fn first_page() -> usize {
    1
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn comma_separated<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomPage {
    pub rooms: Vec<RoomSummary>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_next: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub room_uuid: Uuid,
    pub title: String,
    pub results: Tally,
    pub expires_at: DateTime<Utc>,
}

/// Frames pushed to live subscribers. Both carry the full tally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultsMessage {
    InitialResults { results: Tally },
    VoteUpdate { results: Tally },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateComment {
    pub content: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

impl CreateComment {
    pub fn validate(&self) -> Result<(), AppError> {
        let chars = self.content.chars().count();
        if chars == 0 || chars > MAX_COMMENT_CHARS {
            return Err(AppError::Validation(format!(
                "Comment must be between 1 and {MAX_COMMENT_CHARS} characters"
            )));
        }
        if self
            .nickname
            .as_ref()
            .is_some_and(|n| n.chars().count() > MAX_NICKNAME_CHARS)
        {
            return Err(AppError::Validation(format!(
                "Nickname must be at most {MAX_NICKNAME_CHARS} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub room_uuid: Uuid,
    pub content: String,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}
