use std::collections::HashMap;
use std::sync::{Arc, Weak};

use huddle_config::LifecycleSettings;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::bus::ConnectionBus;
use crate::error::SignalError;
use crate::events::{EventFrame, EventPayload, ProducerDescriptor};
use crate::media::MediaRouter;
use crate::policy::ClientPolicies;
use crate::room::participant::Role;
use crate::room::state::RoomState;

pub mod admission;
pub mod apps;
pub mod apps_ops;
pub mod departure;
pub mod media_ops;
pub mod participant;
pub mod registry;
pub mod state;
pub mod webinar;

/// Abortable timers owned by a room. Cancellation on state transitions is
/// explicit: whoever changes the state takes the handle and aborts it.
#[derive(Default)]
struct RoomTimers {
    host_reassign: Option<JoinHandle<()>>,
    grace: HashMap<String, JoinHandle<()>>,
}

/// One conference room: the single-writer domain for everything that
/// happens inside it. All mutation goes through `state`'s mutex; broadcast
/// emission happens while the lock is held, which serializes the event
/// order every member observes.
pub struct Room {
    room_id: String,
    channel_id: String,
    state: Mutex<RoomState>,
    media: Arc<dyn MediaRouter>,
    bus: Arc<ConnectionBus>,
    policies: Arc<ClientPolicies>,
    lifecycle: LifecycleSettings,
    timers: std::sync::Mutex<RoomTimers>,
}

impl Room {
    pub fn new(
        room_id: String,
        channel_id: String,
        media: Arc<dyn MediaRouter>,
        bus: Arc<ConnectionBus>,
        policies: Arc<ClientPolicies>,
        lifecycle: LifecycleSettings,
        default_max_attendees: u32,
    ) -> Arc<Self> {
        info!(%room_id, %channel_id, "room created");
        Arc::new(Self {
            state: Mutex::new(RoomState::new(
                room_id.clone(),
                channel_id.clone(),
                default_max_attendees,
            )),
            room_id,
            channel_id,
            media,
            bus,
            policies,
            lifecycle,
            timers: std::sync::Mutex::new(RoomTimers::default()),
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub(crate) fn media(&self) -> &dyn MediaRouter {
        self.media.as_ref()
    }

    pub(crate) fn downgrade(self: &Arc<Self>) -> Weak<Self> {
        Arc::downgrade(self)
    }

    /// Emits one event to every connected member of the room.
    pub async fn broadcast_all(&self, payload: EventPayload) {
        let st = self.state.lock().await;
        self.emit(&st, payload, None);
    }

    /// Emits a room-scoped event to every connected member except `except`.
    pub(crate) fn emit(&self, st: &RoomState, payload: EventPayload, except: Option<&str>) {
        self.bus.send_many(
            &st.member_connection_ids(except),
            EventFrame::room(&self.room_id, payload),
        );
    }

    /// Emits to webinar observers only.
    pub(crate) fn emit_to_observers(&self, st: &RoomState, payload: EventPayload) {
        self.bus
            .send_many(&st.observer_connection_ids(), EventFrame::room(&self.room_id, payload));
    }

    pub(crate) fn unicast(&self, connection_id: &str, payload: EventPayload) {
        self.bus
            .send_to(connection_id, EventFrame::room(&self.room_id, payload));
    }

    /// Resolves the caller for a host-only operation.
    ///
    /// A host-less room (reassignment window or failed election) surfaces
    /// NO_HOST; a non-host caller in a hosted room surfaces FORBIDDEN.
    pub(crate) fn require_host<'a>(
        st: &'a RoomState,
        connection_id: &str,
    ) -> Result<&'a participant::Participant, SignalError> {
        let caller = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if st.host_user_key.is_none() {
            return Err(SignalError::NoHost);
        }
        if !caller.is_host() {
            return Err(SignalError::Forbidden("host required".to_string()));
        }
        Ok(caller)
    }

    // --- Flag toggles (host-only, idempotent: repeating the current value
    // broadcasts nothing) ---

    pub async fn lock_room(&self, connection_id: &str, flag: bool) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if st.is_locked == flag {
            return Ok(());
        }
        st.is_locked = flag;
        st.touch();
        debug!(room_id = %self.room_id, flag, "room lock changed");
        self.emit(&st, EventPayload::RoomLockChanged { locked: flag }, None);
        Ok(())
    }

    pub async fn set_no_guests(&self, connection_id: &str, flag: bool) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if st.no_guests == flag {
            return Ok(());
        }
        st.no_guests = flag;
        st.touch();
        self.emit(&st, EventPayload::NoGuestsChanged { no_guests: flag }, None);
        Ok(())
    }

    pub async fn lock_chat(&self, connection_id: &str, flag: bool) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if st.is_chat_locked == flag {
            return Ok(());
        }
        st.is_chat_locked = flag;
        st.touch();
        self.emit(&st, EventPayload::ChatLockChanged { locked: flag }, None);
        Ok(())
    }

    pub async fn set_tts_disabled(
        &self,
        connection_id: &str,
        flag: bool,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if st.is_tts_disabled == flag {
            return Ok(());
        }
        st.is_tts_disabled = flag;
        st.touch();
        self.emit(&st, EventPayload::TtsDisabledChanged { disabled: flag }, None);
        Ok(())
    }

    pub async fn set_video_quality(
        &self,
        connection_id: &str,
        quality: String,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if st.video_quality == quality {
            return Ok(());
        }
        st.video_quality = quality.clone();
        st.touch();
        self.emit(&st, EventPayload::VideoQualityChanged { quality }, None);
        Ok(())
    }

    // --- Chat, reactions, hands, display names ---

    pub async fn send_chat(
        &self,
        connection_id: &str,
        content: String,
    ) -> Result<crate::events::ChatMessage, SignalError> {
        if content.is_empty() {
            return Err(SignalError::BadRequest("empty message".to_string()));
        }
        if content.chars().count() > 1000 {
            return Err(SignalError::BadRequest("message too long".to_string()));
        }

        let mut st = self.state.lock().await;
        let sender = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if sender.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        if st.is_chat_locked && !sender.is_host() {
            return Err(SignalError::Forbidden("chat is locked".to_string()));
        }

        let message = crate::events::ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: sender.user_id.clone(),
            connection_id: sender.connection_id.clone(),
            display_name: sender.display_name.clone(),
            content,
            sent_at: chrono::Utc::now(),
        };
        st.touch();
        self.emit(
            &st,
            EventPayload::ChatMessage(message.clone()),
            Some(connection_id),
        );
        Ok(message)
    }

    pub async fn send_reaction(
        &self,
        connection_id: &str,
        emoji: String,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        let sender = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if sender.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        let payload = EventPayload::Reaction {
            connection_id: sender.connection_id.clone(),
            user_id: sender.user_id.clone(),
            emoji,
        };
        st.touch();
        self.emit(&st, payload, Some(connection_id));
        Ok(())
    }

    pub async fn set_hand_raised(
        &self,
        connection_id: &str,
        raised: bool,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        let p = st
            .participants
            .get_mut(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if p.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        p.is_hand_raised = raised;
        let payload = EventPayload::HandRaised {
            connection_id: p.connection_id.clone(),
            user_id: p.user_id.clone(),
            raised,
        };
        st.touch();
        self.emit(&st, payload, Some(connection_id));
        Ok(())
    }

    pub async fn update_display_name(
        &self,
        connection_id: &str,
        display_name: String,
    ) -> Result<(), SignalError> {
        if display_name.is_empty() || display_name.chars().count() > 128 {
            return Err(SignalError::BadRequest("invalid display name".to_string()));
        }

        let mut st = self.state.lock().await;
        let caller = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if caller.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        let policy = self.policies.get(&caller.client_policy_key);
        if !policy.allow_display_name_update && !caller.is_host() {
            return Err(SignalError::DisplayNameDisabled);
        }

        // The new name applies to every connection of the same user.
        let user_key = caller.user_key.clone();
        let user_id = caller.user_id.clone();
        for conn in st.connections_of_user(&user_key) {
            if let Some(p) = st.participants.get_mut(&conn) {
                p.display_name = display_name.clone();
            }
        }
        st.touch();
        self.emit(
            &st,
            EventPayload::DisplayNameUpdated {
                user_id,
                display_name,
            },
            None,
        );
        Ok(())
    }

    // --- Meeting config ---

    pub async fn meeting_config(
        &self,
        connection_id: &str,
    ) -> Result<serde_json::Value, SignalError> {
        let st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        Ok(serde_json::json!({
            "requiresInviteCode": st.meeting_invite_code.is_some(),
            "inviteCode": st.meeting_invite_code,
        }))
    }

    pub async fn update_meeting_config(
        &self,
        connection_id: &str,
        invite_code: Option<String>,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        st.meeting_invite_code = invite_code.filter(|c| !c.is_empty());
        let requires = st.meeting_invite_code.is_some();
        st.touch();
        self.emit(
            &st,
            EventPayload::MeetingConfigChanged {
                requires_invite_code: requires,
            },
            None,
        );
        Ok(())
    }

    // --- Webinar config ---

    pub async fn webinar_config(
        &self,
        connection_id: &str,
    ) -> Result<serde_json::Value, SignalError> {
        let st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        let mut value =
            serde_json::to_value(st.webinar.snapshot(st.attendee_count())).unwrap_or_default();
        if let Some(obj) = value.as_object_mut() {
            obj.insert(
                "inviteCode".to_string(),
                serde_json::to_value(&st.webinar.invite_code).unwrap_or_default(),
            );
        }
        Ok(value)
    }

    pub async fn update_webinar_config(
        &self,
        connection_id: &str,
        update: webinar::WebinarUpdate,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        st.webinar.apply(update);
        st.touch();
        let snapshot = st.webinar.snapshot(st.attendee_count());
        self.emit(&st, EventPayload::WebinarConfigChanged(snapshot), None);
        self.refresh_feed(&mut st);
        Ok(())
    }

    pub async fn webinar_generate_link(
        &self,
        connection_id: &str,
    ) -> Result<serde_json::Value, SignalError> {
        let st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if !st.webinar.enabled {
            return Err(SignalError::WebinarDisabled);
        }
        Ok(serde_json::json!({
            "link": st.webinar.link(),
            "linkSlug": st.webinar.link_slug,
            "linkVersion": st.webinar.link_version,
        }))
    }

    pub async fn webinar_rotate_link(
        &self,
        connection_id: &str,
    ) -> Result<serde_json::Value, SignalError> {
        let mut st = self.state.lock().await;
        Self::require_host(&st, connection_id)?;
        if !st.webinar.enabled {
            return Err(SignalError::WebinarDisabled);
        }
        let version = st.webinar.rotate_link();
        st.touch();
        info!(room_id = %self.room_id, version, "webinar link rotated");
        let snapshot = st.webinar.snapshot(st.attendee_count());
        self.emit(&st, EventPayload::WebinarConfigChanged(snapshot), None);
        Ok(serde_json::json!({
            "link": st.webinar.link(),
            "linkSlug": st.webinar.link_slug,
            "linkVersion": version,
        }))
    }

    // --- Queries ---

    pub async fn get_producers(
        &self,
        connection_id: &str,
    ) -> Result<Vec<ProducerDescriptor>, SignalError> {
        let st = self.state.lock().await;
        if !st.participants.contains_key(connection_id) {
            return Err(SignalError::NotInRoom);
        }
        Ok(st.producers_excluding(connection_id))
    }

    pub async fn summary(&self) -> RoomSummary {
        let st = self.state.lock().await;
        RoomSummary {
            room_id: st.room_id.clone(),
            participant_count: st.participants.len() as u32,
            is_locked: st.is_locked,
            is_webinar_enabled: st.webinar.enabled,
            webinar_public_access: st.webinar.public_access,
        }
    }

    /// Recomputes the observer feed; emits `webinar:feedChanged` when the
    /// selected speaker differs from the current one.
    pub(crate) fn refresh_feed(&self, st: &mut RoomState) {
        if !st.webinar.enabled {
            return;
        }
        let selected = st.select_feed_speaker();
        if selected == st.webinar.feed_speaker {
            return;
        }
        st.webinar.feed_speaker = selected.clone();
        let producers = selected
            .as_deref()
            .map(|conn| st.producers_of(conn))
            .unwrap_or_default();
        let speaker_user_id = selected
            .as_deref()
            .and_then(|conn| st.participants.get(conn))
            .map(|p| p.user_id.clone());
        self.emit_to_observers(
            st,
            EventPayload::WebinarFeedChanged {
                speaker_user_id,
                producers,
            },
        );
    }

    /// Assigns host role to a connection, demoting any other holder so the
    /// room never carries two hosts.
    pub(crate) fn grant_host(st: &mut RoomState, connection_id: &str) {
        for p in st.participants.values_mut() {
            if p.role == Role::Host && p.connection_id != connection_id {
                p.role = Role::Participant;
            }
        }
        let user_key = match st.participants.get_mut(connection_id) {
            Some(p) => {
                p.role = Role::Host;
                p.user_key.clone()
            }
            None => return,
        };
        st.host_user_key = Some(user_key);
        st.departed_host = None;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub room_id: String,
    pub participant_count: u32,
    pub is_locked: bool,
    pub is_webinar_enabled: bool,
    pub webinar_public_access: bool,
}
