//! Room Registry: the process-wide league-to-room mapping.
//!
//! Creation and lookup are serialized per league by the map's entry locking;
//! retiring rooms remove themselves through a weak back-reference, guarded by
//! an instance id so a replacement room is never removed by its predecessor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use tracing::info;

use crate::config::Settings;
use crate::error::AppError;
use crate::messages::RoomStatus;
use crate::metrics::ROOM_CREATED;
use crate::room::{spawn_room, RoomArgs, RoomHandle};

pub struct RoomRegistry {
    rooms: DashMap<String, RoomHandle>,
    settings: Arc<Settings>,
    next_instance: AtomicU64,
}

impl RoomRegistry {
    pub fn new(settings: Arc<Settings>) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            settings,
            next_instance: AtomicU64::new(1),
        })
    }

    /// Return the room for this league, creating it if absent. The boolean
    /// reports whether a room was created by this call.
    pub fn get_or_create(self: &Arc<Self>, args: &RoomArgs) -> (RoomHandle, bool) {
        match self.rooms.entry(args.league_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let instance = self.next_instance.fetch_add(1, Ordering::Relaxed);
                let handle = spawn_room(
                    args.clone(),
                    self.settings.clone(),
                    Arc::downgrade(self),
                    instance,
                );
                entry.insert(handle.clone());
                counter!(ROOM_CREATED).increment(1);
                info!(league_id = %args.league_id, instance, "room created");
                (handle, true)
            }
        }
    }

    /// If an existing room for this league points at a different upstream
    /// URL, clean it up (idempotently) so the next `get_or_create` builds a
    /// replacement. Returns whether a swap happened.
    pub async fn swap_if_url_changed(self: &Arc<Self>, args: &RoomArgs) -> bool {
        let existing = self.rooms.get(&args.league_id).map(|r| r.clone());
        match existing {
            Some(room) if room.upstream_url() != args.upstream_url => {
                info!(
                    league_id = %args.league_id,
                    old_url = %room.upstream_url(),
                    new_url = %args.upstream_url,
                    "upstream URL changed, replacing room"
                );
                room.force_cleanup().await;
                // Cleanup removes the mapping itself; this only covers a room
                // whose actor had already died.
                self.rooms
                    .remove_if(&args.league_id, |_, h| h.instance() == room.instance());
                true
            }
            _ => false,
        }
    }

    /// Called by a room on retirement. The instance check keeps a stale actor
    /// from removing its replacement.
    pub(crate) fn remove_room(&self, league_id: &str, instance: u64) {
        let removed = self
            .rooms
            .remove_if(league_id, |_, handle| handle.instance() == instance);
        if removed.is_some() {
            info!(league_id, instance, "room removed from registry");
        }
    }

    pub fn get(&self, league_id: &str) -> Option<RoomHandle> {
        self.rooms.get(league_id).map(|r| r.clone())
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn league_ids(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot every room's status. Handles are collected first so no shard
    /// lock is held across an await; rooms that die mid-query are skipped.
    pub async fn statuses(&self) -> Vec<RoomStatus> {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut statuses = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(status) = handle.status().await {
                statuses.push(status);
            }
        }
        statuses
    }

    pub async fn total_clients(&self) -> usize {
        self.statuses().await.iter().map(|s| s.clients_count).sum()
    }

    /// Close all of a room's sessions, clean it up, and drop the mapping.
    pub async fn force_retire(&self, league_id: &str) -> Result<(), AppError> {
        let Some(room) = self.get(league_id) else {
            return Err(AppError::RoomNotFound(league_id.to_string()));
        };
        room.force_cleanup().await;
        self.rooms
            .remove_if(league_id, |_, h| h.instance() == room.instance());
        Ok(())
    }

    /// Process shutdown: every room closes its sessions (1001) and upstream.
    pub async fn shutdown_all(&self) {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|e| e.value().clone()).collect();
        info!(rooms = handles.len(), "shutting down all rooms");
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
