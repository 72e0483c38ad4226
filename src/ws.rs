// src/ws.rs
//! Push-only live results socket.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::{error::AppError, state::AppState};

pub async fn room_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, room_id: String) {
    let mut subscription = match state.hub.subscribe(&room_id).await {
        Ok(subscription) => subscription,
        Err(e) => {
            if !matches!(e, AppError::RoomNotFound) {
                warn!(room = %room_id, error = %e, "Subscription failed");
            }
            let frame = CloseFrame {
                code: close_code::POLICY,
                reason: "Room not found".into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };
    debug!(room = %room_id, subscriber = ?subscription.id, "WebSocket connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            frame = subscription.receiver.recv() => {
                let Some(frame) = frame else { break };
                if sender.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }

            // Inbound traffic is drained and ignored
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    state.hub.unsubscribe(&room_id, subscription.id).await;
    debug!(room = %room_id, subscriber = ?subscription.id, "WebSocket disconnected");
}
