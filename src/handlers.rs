// handlers.rs
use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use axum::{
    extract::{ConnectInfo, FromRequest, FromRequestParts, Path, Query, State},
    http::request::Parts,
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    error::AppError,
    models::{
        Comment, CreateComment, CreateRoom, ListQuery, PasswordVerifyRequest, ResultsResponse,
        RoomPage, RoomView, VoteRequest,
    },
    state::AppState,
};

type AppResult<T> = Result<Json<T>, AppError>;

/// JSON body whose rejections render as [`AppError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Peer address of the request, used as half of the vote identity.
///
/// Falls back to the first `X-Forwarded-For` hop when no socket info is attached.
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(ClientIp(addr.ip().to_string()));
        }

        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        Ok(ClientIp(forwarded.unwrap_or("unknown").to_string()))
    }
}

pub async fn root() -> Json<Value> {
    Json(json!({ "Hello": "Live poll backend is alive!" }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// List rooms, filtered and paginated
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> AppResult<RoomPage> {
    Ok(Json(state.listing.list(&query).await?))
}

/// Create a new room
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<CreateRoom>,
) -> AppResult<RoomView> {
    Ok(Json(state.rooms.create(request).await?))
}

pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<RoomView> {
    Ok(Json(state.rooms.view(&room_id).await?))
}

/// Check a room password
pub async fn verify_password(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ApiJson(request): ApiJson<PasswordVerifyRequest>,
) -> AppResult<Value> {
    state
        .rooms
        .verify_password(&room_id, &request.password)
        .await?;
    Ok(Json(json!({ "verified": true })))
}

/// Vote in a room, then push fresh results to its subscribers
pub async fn vote(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ClientIp(ip): ClientIp,
    ApiJson(request): ApiJson<VoteRequest>,
) -> AppResult<Value> {
    let room = state.rooms.require(&room_id).await?;
    request.validate_for(&room)?;

    if state
        .ledger
        .has_voted(&room_id, &request.fingerprint, &ip)
        .await?
    {
        return Err(AppError::AlreadyVoted);
    }

    state
        .ledger
        .cast_vote(&room_id, &request.options, &request.fingerprint, &ip)
        .await?;
    info!(room = %room_id, options = request.options.len(), "Vote recorded");

    state.hub.broadcast(&room_id).await?;

    Ok(Json(json!({ "success": true, "message": "Vote recorded" })))
}

/// Current results of a room
pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<ResultsResponse> {
    let room = state.rooms.require(&room_id).await?;
    let results = state.ledger.tally(&room_id).await?;

    Ok(Json(ResultsResponse {
        room_uuid: room.uuid,
        title: room.title,
        results,
        expires_at: room.expires_at,
    }))
}

pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    ApiJson(request): ApiJson<CreateComment>,
) -> AppResult<Comment> {
    Ok(Json(state.comments.create(&room_id, request).await?))
}

pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> AppResult<Vec<Comment>> {
    Ok(Json(state.comments.list(&room_id).await?))
}
