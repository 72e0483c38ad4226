// src/db.rs
use std::sync::Arc;

use anyhow::{Context, Result};
use redis::{aio::ConnectionManager, Client};
use tracing::{info, warn};

use crate::{
    config::{Config, StoreBackend},
    memory::MemoryStore,
    store::{KeyedStore, RedisStore},
};

pub async fn create_store(config: &Config) -> Result<Arc<dyn KeyedStore>> {
    match config.store_backend {
        StoreBackend::Redis => {
            let client = Client::open(config.redis_url.as_str())
                .context("failed to parse REDIS_URL connection string")?;
            let connection = ConnectionManager::new(client)
                .await
                .context("failed to connect to Redis")?;

            info!("Connected to Redis");
            Ok(Arc::new(RedisStore::new(connection)))
        }
        StoreBackend::Memory => {
            warn!("Using the in-process store; data will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
