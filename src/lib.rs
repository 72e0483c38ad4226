//! Live poll backend.
//!
//! Users create rooms (polls) with a set of options and a time-to-live. Votes are
//! de-duplicated per browser fingerprint and IP, tallies are pushed to every
//! WebSocket subscriber of the room, and rooms can be listed by recency or
//! popularity with tag and title filters.
//!
//! # Storage
//!
//! The keyed store (Redis in production) is the only source of truth. A room is
//! never deleted explicitly: its record, tally, vote markers and comments all
//! share its TTL and vanish together. The `latest` / `popular` indexes and the
//! tag sets carry no TTL, so they may point at rooms that have already expired.
//! Listing skips those ids and prunes them from both indexes in the background.
//! Tag sets are never pruned.
//!
//! # Known weaknesses
//!
//! - Checking for a previous vote and recording a new one are separate steps, so
//!   two concurrent requests from one identity can both be counted.
//! - A room expiring between its tally increment and its total-votes update
//!   keeps the increment but loses the popularity update.
//! - A room's total-votes counter is read, bumped and written back, so two
//!   concurrent votes from different identities can lose one increment and
//!   its popularity update. The tally itself stays exact.
//! - Per-option increments of a multi-select vote are independent; a failure
//!   part way through leaves a partial vote. No compensation is attempted.
//! - Tag sets grow without bound as tagged rooms expire.
//!
//! # Live updates
//!
//! Subscribers are tracked per process. Dead connections are only noticed when
//! a push to them fails, i.e. on the next broadcast to their room.

use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use axum_server::Handle;
use tokio::signal::{self, ctrl_c};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub mod comments;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod listing;
pub mod memory;
pub mod models;
pub mod poll;
pub mod rooms;
pub mod routes;
pub mod security;
pub mod state;
pub mod store;
pub mod ws;

use config::Config;
use state::AppState;

pub async fn start_server() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;

    info!("Initializing state...");
    let store = db::create_store(&config).await?;
    let state = AppState::new(config, store);

    let address = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = routes::create_routes(state);

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(handle.clone()));

    info!("Server running on {address}");
    axum_server::bind(address)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
