use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{Stream, StreamExt};
use live_poll::{
    config::{Config, StoreBackend},
    memory::MemoryStore,
    models::{CreateRoom, ResultsMessage},
    routes::create_routes,
    state::AppState,
};
use serde_json::json;
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

async fn spawn_server() -> (SocketAddr, Arc<AppState>) {
    let config = Config {
        port: 0,
        redis_url: String::new(),
        store_backend: StoreBackend::Memory,
        cors_origins: vec![],
    };
    let state = AppState::new(config, Arc::new(MemoryStore::new()));
    let app = create_routes(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, state)
}

async fn next_results<S>(stream: &mut S) -> ResultsMessage
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let msg = timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_subscriber_sees_initial_and_updated_results() {
    let (addr, state) = spawn_server().await;
    let room = state
        .rooms
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
        .unwrap();
    let room_id = room.uuid.to_string();

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws/rooms/{room_id}"))
        .await
        .unwrap();

    let ResultsMessage::InitialResults { results } = next_results(&mut socket).await else {
        panic!("expected initial results first");
    };
    assert_eq!(results["red"], 0);

    assert_eq!(post_vote(addr, &room_id).await, reqwest::StatusCode::OK);

    let ResultsMessage::VoteUpdate { results } = next_results(&mut socket).await else {
        panic!("expected a vote update");
    };
    assert_eq!(results["red"], 1);
    assert_eq!(results["blue"], 0);
}

#[tokio::test]
async fn test_unknown_room_closes_with_policy_code() {
    let (addr, state) = spawn_server().await;
    let (mut socket, _) = connect_async(format!("ws://{addr}/ws/rooms/missing"))
        .await
        .unwrap();

    let msg = timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Close(Some(frame)) = msg else {
        panic!("expected a close frame, got {msg:?}");
    };
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(state.hub.active_rooms().await, 0);
}

async fn post_vote(addr: SocketAddr, room_id: &str) -> reqwest::StatusCode {
    reqwest::Client::new()
        .post(format!("http://{addr}/rooms/{room_id}/vote"))
        .json(&json!({ "options": ["red"], "fingerprint": "f1" }))
        .send()
        .await
        .unwrap()
        .status()
}
