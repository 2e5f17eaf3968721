use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::auth::{Identity, JoinMode};
use crate::error::SignalError;
use crate::events::{DisplayNameEntry, EventPayload, PendingUserEntry, ProducerDescriptor};
use crate::room::Room;
use crate::room::participant::{Participant, Role};
use crate::room::state::{PendingJoin, RoomState};

/// Client-supplied join parameters (the token supplies the rest).
#[derive(Debug, Clone, Default)]
pub struct JoinRequest {
    pub display_name: Option<String>,
    pub ghost: bool,
    pub webinar_invite_code: Option<String>,
    pub meeting_invite_code: Option<String>,
}

pub enum JoinOutcome {
    Joined(Box<JoinedRoom>),
    Waiting,
}

/// The admission snapshot acked to a joining client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedRoom {
    pub status: &'static str,
    pub room_id: String,
    pub connection_id: String,
    pub rtp_capabilities: serde_json::Value,
    pub existing_producers: Vec<ProducerDescriptor>,
    pub host_user_id: Option<String>,
    pub is_locked: bool,
    pub meeting_requires_invite_code: bool,
    pub is_tts_disabled: bool,
    pub webinar_role: String,
    pub webinar_max_attendees: u32,
    pub webinar_attendee_count: u32,
    pub webinar_requires_invite_code: bool,
    pub webinar_locked: bool,
    pub is_webinar_enabled: bool,
}

impl Room {
    /// Runs the admission protocol for one connection.
    ///
    /// Check order is part of the contract: lock → guests → webinar gate →
    /// meeting invite code → waiting room → admit.
    pub async fn join(
        self: &Arc<Self>,
        identity: &Identity,
        connection_id: &str,
        request: JoinRequest,
    ) -> Result<JoinOutcome, SignalError> {
        let policy = self.policies.get(&identity.client_policy_key);
        let asserts_host = identity.is_host && policy.allow_host_join;

        let mut st = self.state.lock().await;
        if st.closed {
            return Err(SignalError::RoomNotFound);
        }

        // Reconnect inside the disconnect-grace window reattaches the old
        // participant to the new connection, silently.
        if let Some(old_conn) = st.sessions.get(&identity.session_id).cloned() {
            let in_grace = st
                .participants
                .get(&old_conn)
                .is_some_and(|p| !p.connected);
            if in_grace {
                return Ok(JoinOutcome::Joined(Box::new(self.reattach(
                    &mut st,
                    &old_conn,
                    connection_id,
                ))));
            }
        }

        if st.is_locked && !asserts_host && !identity.is_forced_host {
            return Err(SignalError::RoomLocked);
        }
        if st.no_guests && identity.email.as_deref().is_none_or(|e| e.is_empty()) {
            return Err(SignalError::NoGuests);
        }

        let role = if identity.join_mode == JoinMode::WebinarAttendee {
            if !st.webinar.enabled {
                return Err(SignalError::WebinarDisabled);
            }
            if st.webinar.locked {
                return Err(SignalError::WebinarLocked);
            }
            if st.webinar.requires_invite_code {
                match request.webinar_invite_code.as_deref() {
                    None | Some("") => return Err(SignalError::WebinarInviteCodeRequired),
                    Some(code) if Some(code) != st.webinar.invite_code.as_deref() => {
                        return Err(SignalError::WebinarInviteCodeInvalid);
                    }
                    Some(_) => {}
                }
            }
            if st.attendee_count() + 1 > st.webinar.max_attendees {
                return Err(SignalError::WebinarFull);
            }
            Role::Attendee
        } else {
            if let Some(code) = st.meeting_invite_code.as_deref() {
                match request.meeting_invite_code.as_deref() {
                    None | Some("") => return Err(SignalError::MeetingInviteCodeRequired),
                    Some(given) if given != code => {
                        return Err(SignalError::MeetingInviteCodeInvalid);
                    }
                    Some(_) => {}
                }
            }

            // A host approval and an already-admitted sibling connection of
            // the same user both bypass the queue.
            if policy.use_waiting_room
                && !asserts_host
                && !identity.is_forced_host
                && !st.participants.is_empty()
                && !st.approved_joins.contains(&identity.user_key)
                && !st.user_key_admitted(&identity.user_key)
            {
                return Ok(self.enqueue_pending(&mut st, identity, connection_id, &request));
            }

            st.default_role()
        };

        self.admit(&mut st, identity, connection_id, request, role, asserts_host)
            .map(|joined| JoinOutcome::Joined(Box::new(joined)))
    }

    fn enqueue_pending(
        &self,
        st: &mut RoomState,
        identity: &Identity,
        connection_id: &str,
        request: &JoinRequest,
    ) -> JoinOutcome {
        let display_name = request
            .display_name
            .clone()
            .or_else(|| identity.display_name.clone())
            .unwrap_or_else(|| "Guest".to_string());

        // A user key is pending at most once; a retry refreshes the
        // connection the approval will be delivered to.
        if let Some(pos) = st.pending_position(&identity.user_key) {
            st.pending_joins[pos].connection_id = connection_id.to_string();
            st.pending_joins[pos].display_name = display_name.clone();
        } else {
            st.pending_joins.push(PendingJoin {
                user_key: identity.user_key.clone(),
                user_id: identity.user_id.clone(),
                connection_id: connection_id.to_string(),
                display_name: display_name.clone(),
                arrived_at: Instant::now(),
            });
        }
        st.touch();

        debug!(room_id = %self.room_id(), user_id = %identity.user_id, "join queued in waiting room");
        self.unicast(
            connection_id,
            EventPayload::WaitingRoomStatus {
                status: "waiting".to_string(),
            },
        );
        let entry = PendingUserEntry {
            user_id: identity.user_id.clone(),
            display_name,
        };
        for host_conn in st.host_connection_ids() {
            self.unicast(&host_conn, EventPayload::UserRequestedJoin(entry.clone()));
        }
        JoinOutcome::Waiting
    }

    fn admit(
        self: &Arc<Self>,
        st: &mut RoomState,
        identity: &Identity,
        connection_id: &str,
        request: JoinRequest,
        mut role: Role,
        asserts_host: bool,
    ) -> Result<JoinedRoom, SignalError> {
        let mut silently_restored_host = false;

        if role != Role::Attendee {
            let departed_matches = st
                .departed_host
                .as_ref()
                .is_some_and(|d| d.user_key == identity.user_key);
            if departed_matches {
                // The departed host came back within the window.
                role = Role::Host;
                silently_restored_host = true;
                st.departed_host = None;
                self.cancel_host_reassign_timer();
            } else if st.host_user_key.is_none() {
                if asserts_host || identity.is_forced_host {
                    role = Role::Host;
                } else if st.participants.is_empty() {
                    // First joiner of any kind may found the room, if allowed.
                    let policy = self.policies.get(&identity.client_policy_key);
                    if identity.allow_room_creation || policy.allow_non_host_room_creation {
                        role = Role::Host;
                    } else {
                        return Err(SignalError::RoomNotFound);
                    }
                }
            }
        }

        let display_name = request
            .display_name
            .or_else(|| identity.display_name.clone())
            .unwrap_or_else(|| "Guest".to_string());

        let seq = st.next_admission_seq();
        let participant = Participant {
            connection_id: connection_id.to_string(),
            user_key: identity.user_key.clone(),
            user_id: identity.user_id.clone(),
            session_id: identity.session_id.clone(),
            display_name: display_name.clone(),
            role,
            is_ghost: request.ghost,
            client_policy_key: identity.client_policy_key.clone(),
            producer_transport_id: None,
            consumer_transport_id: None,
            producers: Default::default(),
            consumers: Default::default(),
            is_muted: false,
            is_camera_off: false,
            is_hand_raised: false,
            admitted_seq: seq,
            connected: true,
        };
        st.participants.insert(connection_id.to_string(), participant);
        st.sessions
            .insert(identity.session_id.clone(), connection_id.to_string());
        // A user key never sits in the waiting room once admitted, and its
        // approval is consumed by the admission.
        st.pending_joins.retain(|p| p.user_key != identity.user_key);
        st.approved_joins.remove(&identity.user_key);
        st.empty_since = None;
        st.touch();

        if role == Role::Host {
            Room::grant_host(st, connection_id);
            if !silently_restored_host {
                self.emit(
                    st,
                    EventPayload::HostAssigned {
                        host_user_id: identity.user_id.clone(),
                    },
                    Some(connection_id),
                );
            }
        }

        info!(
            room_id = %self.room_id(),
            user_id = %identity.user_id,
            connection_id,
            role = role.as_str(),
            ghost = request.ghost,
            "participant admitted"
        );

        self.emit(
            st,
            EventPayload::UserJoined {
                user_id: identity.user_id.clone(),
                connection_id: connection_id.to_string(),
                display_name,
                role: role.as_str().to_string(),
                is_ghost: request.ghost,
            },
            Some(connection_id),
        );

        if role == Role::Attendee {
            let count = st.attendee_count();
            self.emit(
                st,
                EventPayload::WebinarAttendeeCountChanged {
                    attendee_count: count,
                },
                None,
            );
        }

        self.send_snapshots(st, connection_id, role);

        Ok(self.joined_snapshot(st, connection_id, role))
    }

    /// Unicast catch-up snapshots; the broadcast bus never backfills.
    fn send_snapshots(&self, st: &RoomState, connection_id: &str, role: Role) {
        let names: Vec<DisplayNameEntry> = st
            .participants
            .values()
            .filter(|p| p.connection_id != connection_id)
            .map(|p| DisplayNameEntry {
                connection_id: p.connection_id.clone(),
                user_id: p.user_id.clone(),
                display_name: p.display_name.clone(),
            })
            .collect();
        self.unicast(connection_id, EventPayload::DisplayNameSnapshot { names });

        let raised: Vec<String> = st
            .participants
            .values()
            .filter(|p| p.is_hand_raised)
            .map(|p| p.connection_id.clone())
            .collect();
        self.unicast(connection_id, EventPayload::HandRaisedSnapshot { raised });

        if role == Role::Host {
            let pending: Vec<PendingUserEntry> = st
                .pending_joins
                .iter()
                .map(|p| PendingUserEntry {
                    user_id: p.user_id.clone(),
                    display_name: p.display_name.clone(),
                })
                .collect();
            self.unicast(connection_id, EventPayload::PendingUsersSnapshot { pending });
        }
    }

    fn joined_snapshot(&self, st: &mut RoomState, connection_id: &str, role: Role) -> JoinedRoom {
        let existing_producers = if role == Role::Attendee {
            // Observers receive only the selected feed.
            if st.webinar.feed_speaker.is_none() {
                st.webinar.feed_speaker = st.select_feed_speaker();
            }
            st.webinar
                .feed_speaker
                .clone()
                .map(|conn| st.producers_of(&conn))
                .unwrap_or_default()
        } else {
            st.producers_excluding(connection_id)
        };

        JoinedRoom {
            status: "joined",
            room_id: st.room_id.clone(),
            connection_id: connection_id.to_string(),
            rtp_capabilities: self.media().rtp_capabilities(),
            existing_producers,
            host_user_id: st.host_user_id(),
            is_locked: st.is_locked,
            meeting_requires_invite_code: st.meeting_invite_code.is_some(),
            is_tts_disabled: st.is_tts_disabled,
            webinar_role: role.as_str().to_string(),
            webinar_max_attendees: st.webinar.max_attendees,
            webinar_attendee_count: st.attendee_count(),
            webinar_requires_invite_code: st.webinar.requires_invite_code,
            webinar_locked: st.webinar.locked,
            is_webinar_enabled: st.webinar.enabled,
        }
    }

    /// Moves a grace-disconnected participant onto its new connection.
    /// Producers, consumers and transports survive untouched.
    fn reattach(
        self: &Arc<Self>,
        st: &mut RoomState,
        old_connection_id: &str,
        new_connection_id: &str,
    ) -> JoinedRoom {
        self.cancel_grace_timer_for_connection(st, old_connection_id);

        let mut participant = st
            .participants
            .remove(old_connection_id)
            .expect("reattach checked participant presence");
        participant.connection_id = new_connection_id.to_string();
        participant.connected = true;
        let session_id = participant.session_id.clone();
        let user_key = participant.user_key.clone();
        let user_id = participant.user_id.clone();

        st.participants
            .insert(new_connection_id.to_string(), participant);
        st.sessions.insert(session_id, new_connection_id.to_string());

        for entry in st.producer_index.values_mut() {
            if entry.owner_connection_id == old_connection_id {
                entry.owner_connection_id = new_connection_id.to_string();
            }
        }
        if st.webinar.feed_speaker.as_deref() == Some(old_connection_id) {
            st.webinar.feed_speaker = Some(new_connection_id.to_string());
        }
        st.apps.forget_connection(old_connection_id);

        // A departed host that reattaches within the window is restored
        // without any broadcast; if the chair changed hands in the meantime
        // the returning session comes back as a participant.
        let departed_matches = st
            .departed_host
            .as_ref()
            .is_some_and(|d| d.user_key == user_key);
        let still_host = st.host_user_key.as_deref() == Some(user_key.as_str());
        if departed_matches || still_host {
            Room::grant_host(st, new_connection_id);
            self.cancel_host_reassign_timer();
        } else if let Some(p) = st.participants.get_mut(new_connection_id) {
            if p.role == Role::Host {
                p.role = Role::Participant;
            }
        }
        let role = st
            .participants
            .get(new_connection_id)
            .map(|p| p.role)
            .unwrap_or(Role::Participant);
        st.touch();

        info!(
            room_id = %self.room_id(),
            %user_id,
            old_connection_id,
            new_connection_id,
            "session reattached within grace"
        );

        self.send_snapshots(st, new_connection_id, role);
        self.joined_snapshot(st, new_connection_id, role)
    }

    // --- Waiting-room resolution (host-only) ---

    /// Approves a pending user. A stale user id (already admitted via a new
    /// session, or gone) is a silent no-op.
    pub async fn admit_user(&self, connection_id: &str, user_id: &str) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;

        let Some(pos) = st.pending_joins.iter().position(|p| p.user_id == user_id) else {
            return Ok(());
        };
        let pending = st.pending_joins.remove(pos);
        st.approved_joins.insert(pending.user_key.clone());
        st.touch();
        info!(room_id = %self.room_id(), user_id, "pending user approved");
        self.unicast(
            &pending.connection_id,
            EventPayload::JoinApproved {
                room_id: st.room_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn reject_user(&self, connection_id: &str, user_id: &str) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;

        let Some(pos) = st.pending_joins.iter().position(|p| p.user_id == user_id) else {
            return Ok(());
        };
        let pending = st.pending_joins.remove(pos);
        st.touch();
        info!(room_id = %self.room_id(), user_id, "pending user rejected");
        self.unicast(&pending.connection_id, EventPayload::JoinRejected);
        Ok(())
    }

    /// A queued connection dropped before the host resolved it.
    pub async fn pending_disconnected(&self, connection_id: &str) {
        let mut st = self.state.lock().await;
        let Some(pos) = st
            .pending_joins
            .iter()
            .position(|p| p.connection_id == connection_id)
        else {
            return;
        };
        let pending = st.pending_joins.remove(pos);
        st.touch();
        for host_conn in st.host_connection_ids() {
            self.unicast(
                &host_conn,
                EventPayload::PendingUserLeft {
                    user_id: pending.user_id.clone(),
                },
            );
        }
    }
}
