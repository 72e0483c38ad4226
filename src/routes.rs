// routes.rs
use std::{sync::Arc, time::Duration};

use axum::{
    routing::{get, post},
    Router,
};
use http::{header::CONTENT_TYPE, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::{handlers, state::AppState, ws};

pub fn create_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/rooms",
            get(handlers::list_rooms).post(handlers::create_room),
        )
        .route("/rooms/{room_id}", get(handlers::get_room))
        .route("/rooms/{room_id}/verify", post(handlers::verify_password))
        .route("/rooms/{room_id}/vote", post(handlers::vote))
        .route("/rooms/{room_id}/results", get(handlers::get_results))
        .route(
            "/rooms/{room_id}/comments",
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route("/ws/rooms/{room_id}", get(ws::room_socket))
        .layer(cors(&state.config.cors_origins))
        .with_state(state)
}

fn cors(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            HeaderValue::from_str(origin)
                .map_err(|_| warn!("Ignoring invalid CORS origin {origin}"))
                .ok()
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60))
}
