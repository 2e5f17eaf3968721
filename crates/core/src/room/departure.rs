use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::SignalError;
use crate::events::EventPayload;
use crate::room::Room;
use crate::room::state::{DepartedHost, RoomState};

impl Room {
    /// Socket dropped while joined: the participant enters the disconnect
    /// grace window. Media stays up; full teardown runs only on expiry.
    pub async fn connection_lost(self: &Arc<Self>, connection_id: &str) {
        let mut st = self.state.lock().await;
        let Some(p) = st.participants.get_mut(connection_id) else {
            return;
        };
        if !p.connected {
            return;
        }
        p.connected = false;
        let session_id = p.session_id.clone();
        let was_host = p.is_host();
        let user_key = p.user_key.clone();
        debug!(
            room_id = %self.room_id(),
            connection_id,
            %session_id,
            "connection lost, grace window armed"
        );

        if was_host {
            self.host_departed(&mut st, &user_key);
        }
        self.refresh_feed(&mut st);

        let grace = Duration::from_millis(self.lifecycle.disconnect_grace_ms);
        let weak = self.downgrade();
        let sid = session_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(room) = weak.upgrade() {
                room.grace_expired(&sid).await;
            }
        });
        let mut timers = self.timers.lock().unwrap();
        if let Some(old) = timers.grace.insert(session_id, handle) {
            old.abort();
        }
    }

    /// Grace expired without a reconnect: run the full teardown.
    pub(crate) async fn grace_expired(self: &Arc<Self>, session_id: &str) {
        // Detach this timer's handle without aborting: the teardown below
        // runs on the timer task itself.
        {
            let mut timers = self.timers.lock().unwrap();
            timers.grace.remove(session_id);
        }

        let mut st = self.state.lock().await;
        let Some(connection_id) = st.sessions.get(session_id).cloned() else {
            return;
        };
        let still_disconnected = st
            .participants
            .get(&connection_id)
            .is_some_and(|p| !p.connected);
        if !still_disconnected {
            return;
        }
        info!(room_id = %self.room_id(), session_id, "disconnect grace expired");
        self.remove_participant(&mut st, &connection_id).await;
    }

    /// Explicit `leaveRoom`: same cascade as grace expiry, immediately.
    pub async fn leave(self: &Arc<Self>, connection_id: &str) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        if !st.participants.contains_key(connection_id) {
            return Err(SignalError::NotInRoom);
        }
        self.remove_participant(&mut st, connection_id).await;
        Ok(())
    }

    /// Host-only: remove every connection of a user and tell it why.
    pub async fn kick_user(
        self: &Arc<Self>,
        connection_id: &str,
        user_id: &str,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        let targets = st.connections_of_user_id(user_id);
        if targets.is_empty() {
            return Err(SignalError::BadRequest("user not found".to_string()));
        }
        info!(room_id = %self.room_id(), user_id, "user kicked");
        for target in targets {
            self.unicast(&target, EventPayload::Kicked);
            self.remove_participant(&mut st, &target).await;
        }
        Ok(())
    }

    /// Host-only: send a user elsewhere, then remove it like a leave.
    pub async fn redirect_user(
        self: &Arc<Self>,
        connection_id: &str,
        user_id: &str,
        url: String,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        let targets = st.connections_of_user_id(user_id);
        if targets.is_empty() {
            return Err(SignalError::BadRequest("user not found".to_string()));
        }
        for target in targets {
            self.unicast(&target, EventPayload::Redirect { url: url.clone() });
            self.remove_participant(&mut st, &target).await;
        }
        Ok(())
    }

    /// Full participant teardown: producers close (with broadcasts) before
    /// `userLeft`, transports released, indexes kept consistent in one pass.
    pub(crate) async fn remove_participant(self: &Arc<Self>, st: &mut RoomState, connection_id: &str) {
        let Some(participant) = st.participants.remove(connection_id) else {
            return;
        };
        st.sessions.remove(&participant.session_id);
        self.cancel_grace_timer(&participant.session_id);

        // Producer removal is atomic with owner removal.
        let producer_ids: Vec<String> = participant.producers.keys().cloned().collect();
        for producer_id in producer_ids {
            let _ = self.media().close_producer(&producer_id).await;
            if st.producer_index.remove(&producer_id).is_some() {
                if st.screen_share_producer_id.as_deref() == Some(producer_id.as_str()) {
                    st.screen_share_producer_id = None;
                }
                self.emit(
                    st,
                    EventPayload::ProducerClosed {
                        producer_id,
                        connection_id: participant.connection_id.clone(),
                        user_id: participant.user_id.clone(),
                    },
                    None,
                );
            }
        }

        if let Some(transport_id) = &participant.producer_transport_id {
            self.media().close_transport(transport_id).await;
        }
        if let Some(transport_id) = &participant.consumer_transport_id {
            self.media().close_transport(transport_id).await;
        }

        st.apps.forget_connection(connection_id);

        self.emit(
            st,
            EventPayload::UserLeft {
                user_id: participant.user_id.clone(),
                connection_id: participant.connection_id.clone(),
            },
            None,
        );

        if participant.is_observer() {
            let count = st.attendee_count();
            self.emit(
                st,
                EventPayload::WebinarAttendeeCountChanged {
                    attendee_count: count,
                },
                None,
            );
        } else if participant.is_host() {
            self.host_departed(st, &participant.user_key);
        }

        self.refresh_feed(st);

        if st.resident_count() == 0 && st.empty_since.is_none() {
            st.empty_since = Some(Instant::now());
            debug!(room_id = %self.room_id(), "room is empty, TTL clock started");
        }
        st.touch();
    }

    /// The host is gone. Prefer another live connection of the same user
    /// (silent), otherwise arm the reassignment deadline.
    pub(crate) fn host_departed(self: &Arc<Self>, st: &mut RoomState, user_key: &str) {
        if st.host_user_key.as_deref() != Some(user_key) {
            return;
        }

        let sibling = st
            .participants
            .values()
            .find(|p| p.user_key == user_key && p.connected)
            .map(|p| p.connection_id.clone());
        if let Some(conn) = sibling {
            Room::grant_host(st, &conn);
            return;
        }

        st.host_user_key = None;
        let deadline =
            Instant::now() + Duration::from_millis(self.lifecycle.admin_cleanup_timeout_ms);
        st.departed_host = Some(DepartedHost {
            user_key: user_key.to_string(),
            deadline,
        });
        info!(room_id = %self.room_id(), "host departed, reassignment deadline armed");

        let timeout = Duration::from_millis(self.lifecycle.admin_cleanup_timeout_ms);
        let weak = self.downgrade();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(room) = weak.upgrade() {
                room.elect_host().await;
            }
        });
        let mut timers = self.timers.lock().unwrap();
        if let Some(old) = timers.host_reassign.replace(handle) {
            old.abort();
        }
    }

    /// Deadline expired: promote the earliest-admitted eligible participant.
    pub(crate) async fn elect_host(self: &Arc<Self>) {
        let mut st = self.state.lock().await;
        if st.host_user_key.is_some() {
            return;
        }
        st.departed_host = None;

        let candidate = st
            .next_host_candidate()
            .map(|p| (p.connection_id.clone(), p.user_id.clone()));
        match candidate {
            Some((connection_id, user_id)) => {
                Room::grant_host(&mut st, &connection_id);
                info!(room_id = %self.room_id(), %user_id, "host reassigned");
                self.emit(
                    &st,
                    EventPayload::HostChanged {
                        host_user_id: Some(user_id),
                    },
                    None,
                );
                self.refresh_feed(&mut st);
            }
            None => {
                // Room stays host-less; admin operations fail NO_HOST.
                info!(room_id = %self.room_id(), "no eligible host candidate");
            }
        }
    }

    /// Marks the room closed and notifies everyone; the registry drops the
    /// room (and with it the media router) afterwards.
    pub(crate) async fn close(self: &Arc<Self>) {
        let mut st = self.state.lock().await;
        if st.closed {
            return;
        }
        st.closed = true;
        self.emit(&st, EventPayload::RoomClosed, None);
        st.participants.clear();
        st.sessions.clear();
        st.pending_joins.clear();
        st.producer_index.clear();

        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.host_reassign.take() {
            handle.abort();
        }
        for (_, handle) in timers.grace.drain() {
            handle.abort();
        }
        info!(room_id = %self.room_id(), "room closed");
    }

    /// True when the room has been empty longer than the TTL.
    pub async fn ripe_for_reap(&self, ttl: Duration) -> bool {
        let st = self.state.lock().await;
        st.empty_since.is_some_and(|since| since.elapsed() >= ttl)
    }

    pub(crate) fn cancel_grace_timer(&self, session_id: &str) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.grace.remove(session_id) {
            handle.abort();
        }
    }

    pub(crate) fn cancel_grace_timer_for_connection(&self, st: &RoomState, connection_id: &str) {
        if let Some(p) = st.participants.get(connection_id) {
            self.cancel_grace_timer(&p.session_id);
        }
    }

    pub(crate) fn cancel_host_reassign_timer(&self) {
        let mut timers = self.timers.lock().unwrap();
        if let Some(handle) = timers.host_reassign.take() {
            handle.abort();
        }
    }
}
