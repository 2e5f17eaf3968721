use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::media::{MediaKind, ProducerType};
use crate::room::webinar::WebinarSnapshot;

/// One broadcastable producer: everything a peer needs to decide whether and
/// how to consume it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerDescriptor {
    pub producer_id: String,
    pub connection_id: String,
    pub user_id: String,
    pub kind: MediaKind,
    #[serde(rename = "type")]
    pub producer_type: ProducerType,
    pub paused: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub user_id: String,
    pub connection_id: String,
    pub display_name: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameEntry {
    pub connection_id: String,
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUserEntry {
    pub user_id: String,
    pub display_name: String,
}

/// Server→client notification payloads. Serialized as
/// `{"type": "<name>", "data": {...}}`; the room envelope adds `roomId`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum EventPayload {
    UserJoined {
        user_id: String,
        connection_id: String,
        display_name: String,
        role: String,
        is_ghost: bool,
    },
    UserLeft {
        user_id: String,
        connection_id: String,
    },
    NewProducer(ProducerDescriptor),
    ProducerClosed {
        producer_id: String,
        connection_id: String,
        user_id: String,
    },
    ParticipantMuted {
        connection_id: String,
        user_id: String,
        paused: bool,
    },
    ParticipantCameraOff {
        connection_id: String,
        user_id: String,
        paused: bool,
    },
    HandRaised {
        connection_id: String,
        user_id: String,
        raised: bool,
    },
    ChatMessage(ChatMessage),
    Reaction {
        connection_id: String,
        user_id: String,
        emoji: String,
    },
    DisplayNameUpdated {
        user_id: String,
        display_name: String,
    },
    HostAssigned {
        host_user_id: String,
    },
    HostChanged {
        host_user_id: Option<String>,
    },
    RoomLockChanged {
        locked: bool,
    },
    NoGuestsChanged {
        no_guests: bool,
    },
    ChatLockChanged {
        locked: bool,
    },
    TtsDisabledChanged {
        disabled: bool,
    },
    VideoQualityChanged {
        quality: String,
    },
    #[serde(rename = "meeting:configChanged")]
    MeetingConfigChanged {
        requires_invite_code: bool,
    },
    #[serde(rename = "webinar:configChanged")]
    WebinarConfigChanged(WebinarSnapshot),
    #[serde(rename = "webinar:attendeeCountChanged")]
    WebinarAttendeeCountChanged {
        attendee_count: u32,
    },
    #[serde(rename = "webinar:feedChanged")]
    WebinarFeedChanged {
        speaker_user_id: Option<String>,
        producers: Vec<ProducerDescriptor>,
    },
    #[serde(rename = "apps:state")]
    AppsState {
        active_app_id: Option<String>,
        locked: bool,
    },
    #[serde(rename = "apps:yjs:update")]
    AppsYjsUpdate {
        app_id: String,
        update: String,
        origin: String,
    },
    #[serde(rename = "apps:awareness")]
    AppsAwareness {
        app_id: String,
        update: String,
        origin: String,
    },
    Kicked,
    Redirect {
        url: String,
    },
    RoomClosed,
    ServerRestarting,
    JoinApproved {
        room_id: String,
    },
    JoinRejected,
    UserRequestedJoin(PendingUserEntry),
    PendingUserLeft {
        user_id: String,
    },
    DisplayNameSnapshot {
        names: Vec<DisplayNameEntry>,
    },
    HandRaisedSnapshot {
        raised: Vec<String>,
    },
    PendingUsersSnapshot {
        pending: Vec<PendingUserEntry>,
    },
    WaitingRoomStatus {
        status: String,
    },
}

/// A payload stamped with its room scope. `room_id` is absent on
/// connection-level events (e.g. `pong`, pre-admission waiting updates).
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub room_id: Option<String>,
    pub payload: EventPayload,
}

impl EventFrame {
    pub fn room(room_id: &str, payload: EventPayload) -> Self {
        Self {
            room_id: Some(room_id.to_string()),
            payload,
        }
    }

    pub fn connection(payload: EventPayload) -> Self {
        Self {
            room_id: None,
            payload,
        }
    }

    /// Wire form: the tagged payload with `roomId` injected beside `type`
    /// and `data`.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.payload).unwrap_or_default();
        if let (Some(room_id), Some(obj)) = (&self.room_id, value.as_object_mut()) {
            obj.insert(
                "roomId".to_string(),
                serde_json::Value::String(room_id.clone()),
            );
        }
        value
    }
}
