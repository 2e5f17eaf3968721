use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use huddle_config::{LifecycleSettings, WebinarSettings};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Identity;
use crate::bus::ConnectionBus;
use crate::error::SignalError;
use crate::events::EventPayload;
use crate::media::MediaRouterFactory;
use crate::policy::ClientPolicies;
use crate::room::{Room, RoomSummary};

/// Global room map. Rooms are keyed by their internal channel id with a
/// user-facing room id index on the side, so the broadcast scope can be
/// remapped without renaming the room.
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Room>>,
    room_index: DashMap<String, String>,
    media_factory: Arc<dyn MediaRouterFactory>,
    bus: Arc<ConnectionBus>,
    policies: Arc<ClientPolicies>,
    lifecycle: LifecycleSettings,
    webinar: WebinarSettings,
    draining: AtomicBool,
}

impl RoomRegistry {
    pub fn new(
        media_factory: Arc<dyn MediaRouterFactory>,
        bus: Arc<ConnectionBus>,
        policies: Arc<ClientPolicies>,
        lifecycle: LifecycleSettings,
        webinar: WebinarSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            room_index: DashMap::new(),
            media_factory,
            bus,
            policies,
            lifecycle,
            webinar,
            draining: AtomicBool::new(false),
        })
    }

    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        let channel_id = self.room_index.get(room_id)?;
        self.rooms.get(channel_id.value()).map(|r| r.clone())
    }

    /// Resolves a room for a join, creating it when this identity is allowed
    /// to found one.
    pub async fn get_or_create(
        &self,
        room_id: &str,
        identity: &Identity,
    ) -> Result<Arc<Room>, SignalError> {
        if self.is_draining() {
            return Err(SignalError::ServerDraining);
        }
        if let Some(room) = self.get(room_id) {
            return Ok(room);
        }

        let policy = self.policies.get(&identity.client_policy_key);
        let may_create = identity.is_host
            || identity.is_forced_host
            || identity.allow_room_creation
            || policy.allow_non_host_room_creation;
        if !may_create {
            return Err(SignalError::RoomNotFound);
        }

        let media = self
            .media_factory
            .create_router()
            .await
            .map_err(|e| {
                warn!(%room_id, %e, "media router creation failed");
                SignalError::MediaRouter(e.to_string())
            })?;

        let channel_id = Uuid::new_v4().to_string();
        let room = Room::new(
            room_id.to_string(),
            channel_id.clone(),
            media,
            Arc::clone(&self.bus),
            Arc::clone(&self.policies),
            self.lifecycle.clone(),
            self.webinar.default_max_attendees,
        );

        // Another connection may have raced us here; first insert wins.
        match self.room_index.entry(room_id.to_string()) {
            dashmap::Entry::Occupied(existing) => {
                let channel = existing.get().clone();
                Ok(self
                    .rooms
                    .get(&channel)
                    .map(|r| r.clone())
                    .unwrap_or(room))
            }
            dashmap::Entry::Vacant(slot) => {
                slot.insert(channel_id.clone());
                self.rooms.insert(channel_id, Arc::clone(&room));
                Ok(room)
            }
        }
    }

    pub async fn destroy(&self, room: &Arc<Room>) {
        room.close().await;
        self.room_index.remove(room.room_id());
        self.rooms.remove(room.channel_id());
        info!(room_id = %room.room_id(), "room destroyed");
    }

    /// One reaper sweep: destroy every room that has been empty past the TTL.
    pub async fn reap_empty(&self) {
        let ttl = Duration::from_millis(self.lifecycle.empty_room_ttl_ms);
        let candidates: Vec<Arc<Room>> =
            self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for room in candidates {
            if room.ripe_for_reap(ttl).await {
                self.destroy(&room).await;
            }
        }
    }

    /// Room list for `getRooms`. Non-host tokens only see rooms that are
    /// publicly reachable (webinar enabled with public access).
    pub async fn list(&self, identity: &Identity) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> =
            self.rooms.iter().map(|entry| entry.value().clone()).collect();
        let mut out = Vec::with_capacity(rooms.len());
        for room in rooms {
            let summary = room.summary().await;
            if identity.is_host
                || identity.is_forced_host
                || (summary.is_webinar_enabled && summary.webinar_public_access)
            {
                out.push(summary);
            }
        }
        out.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        out
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
        if draining {
            info!("server draining: refusing new joins");
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Impending shutdown: tell every channel so clients reconnect elsewhere.
    pub async fn notify_restarting(&self) {
        let rooms: Vec<Arc<Room>> =
            self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for room in rooms {
            room.broadcast_all(EventPayload::ServerRestarting).await;
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
