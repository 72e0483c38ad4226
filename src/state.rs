// src/state.rs
use std::sync::Arc;

use crate::{
    comments::CommentBoard, config::Config, hub::BroadcastHub, listing::Listing,
    poll::VoteLedger, rooms::RoomRegistry, store::KeyedStore,
};

pub struct AppState {
    pub config: Config,
    pub rooms: RoomRegistry,
    pub ledger: VoteLedger,
    pub listing: Listing,
    pub comments: CommentBoard,
    pub hub: BroadcastHub,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn KeyedStore>) -> Arc<Self> {
        let rooms = RoomRegistry::new(store.clone());
        let ledger = VoteLedger::new(store.clone(), rooms.clone());
        let listing = Listing::new(store.clone(), rooms.clone());
        let comments = CommentBoard::new(store, rooms.clone());
        let hub = BroadcastHub::new(rooms.clone(), ledger.clone());

        Arc::new(Self {
            config,
            rooms,
            ledger,
            listing,
            comments,
            hub,
        })
    }
}
