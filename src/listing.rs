// src/listing.rs
//! Room listing over the latest/popular indexes.
//!
//! Indexes only return identifiers, so the whole ordered list is materialized
//! and filtered in-process before paging. Cost grows with index size.

use std::{collections::HashSet, sync::Arc};

use tracing::{debug, warn};

use crate::{
    error::AppError,
    models::{ListQuery, RoomPage, RoomSummary, SortOrder},
    rooms::RoomRegistry,
    store::{keys, KeyedStore},
};

#[derive(Clone)]
pub struct Listing {
    store: Arc<dyn KeyedStore>,
    rooms: RoomRegistry,
}

impl Listing {
    pub fn new(store: Arc<dyn KeyedStore>, rooms: RoomRegistry) -> Self {
        Self { store, rooms }
    }

    pub async fn list(&self, query: &ListQuery) -> Result<RoomPage, AppError> {
        query.validate()?;

        let index = match query.sort {
            SortOrder::Popular => keys::ROOMS_POPULAR,
            SortOrder::Latest => keys::ROOMS_LATEST,
        };
        let mut ids = self.store.zrevrange_all(index).await?;

        if !query.tags.is_empty() {
            let allowed = self.tagged_with_all(&query.tags).await?;
            ids.retain(|id| allowed.contains(id));
        }

        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut matching = Vec::new();
        let mut stale = Vec::new();
        for id in ids {
            match self.rooms.get(&id).await? {
                Some(room) => {
                    if needle
                        .as_deref()
                        .map_or(true, |n| room.title.to_lowercase().contains(n))
                    {
                        matching.push(room);
                    }
                }
                None => stale.push(id),
            }
        }

        if !stale.is_empty() {
            self.spawn_prune(stale);
        }

        let total = matching.len();
        let offset = (query.page - 1).saturating_mul(query.page_size);
        let rooms: Vec<RoomSummary> = matching
            .into_iter()
            .skip(offset)
            .take(query.page_size)
            .map(RoomSummary::from)
            .collect();

        Ok(RoomPage {
            rooms,
            total,
            page: query.page,
            page_size: query.page_size,
            has_next: offset.saturating_add(query.page_size) < total,
        })
    }

    /// Ids present in every tag's set.
    async fn tagged_with_all(&self, tags: &[String]) -> Result<HashSet<String>, AppError> {
        let mut allowed: Option<HashSet<String>> = None;
        for tag in tags {
            let members = self.store.smembers(&keys::tag(tag)).await?;
            allowed = Some(match allowed {
                None => members,
                Some(acc) => acc.intersection(&members).cloned().collect(),
            });
            if allowed.as_ref().is_some_and(HashSet::is_empty) {
                break;
            }
        }
        Ok(allowed.unwrap_or_default())
    }

    /// Drops expired rooms from both indexes in the background.
    ///
    /// Tag sets are left alone: the tags of an expired room are no longer known.
    fn spawn_prune(&self, stale: Vec<String>) {
        let store = self.store.clone();
        tokio::spawn(async move {
            debug!(count = stale.len(), "Pruning expired rooms from indexes");
            if let Err(e) = prune_indexes(store.as_ref(), &stale).await {
                warn!(error = %e, "Failed to prune expired rooms from indexes");
            }
        });
    }
}

pub async fn prune_indexes(store: &dyn KeyedStore, stale: &[String]) -> Result<(), AppError> {
    for id in stale {
        store.zrem(keys::ROOMS_LATEST, id).await?;
        store.zrem(keys::ROOMS_POPULAR, id).await?;
    }
    Ok(())
}
