use std::collections::{HashMap, HashSet};
use std::time::Instant;

use crate::events::ProducerDescriptor;
use crate::media::{MediaKind, ProducerType};
use crate::room::apps::SharedApps;
use crate::room::participant::{Participant, Role};
use crate::room::webinar::WebinarOverlay;

#[derive(Debug, Clone)]
pub struct ProducerRef {
    pub owner_connection_id: String,
    pub kind: MediaKind,
    pub producer_type: ProducerType,
    pub paused: bool,
}

#[derive(Debug, Clone)]
pub struct PendingJoin {
    pub user_key: String,
    pub user_id: String,
    pub connection_id: String,
    pub display_name: String,
    pub arrived_at: Instant,
}

/// A departed host we may silently restore within the reassignment window.
#[derive(Debug, Clone)]
pub struct DepartedHost {
    pub user_key: String,
    pub deadline: Instant,
}

/// Authoritative per-room state. Single-writer: only reachable through the
/// owning [`super::Room`]'s mutex.
pub struct RoomState {
    pub room_id: String,
    pub channel_id: String,

    pub participants: HashMap<String, Participant>,
    /// sessionId → connectionId, for reconnect reattachment.
    pub sessions: HashMap<String, String>,

    pub host_user_key: Option<String>,
    pub departed_host: Option<DepartedHost>,

    pub producer_index: HashMap<String, ProducerRef>,
    pub screen_share_producer_id: Option<String>,

    /// Waiting room, in arrival order.
    pub pending_joins: Vec<PendingJoin>,
    /// Users the host has approved whose re-join has not landed yet.
    pub approved_joins: HashSet<String>,

    pub is_locked: bool,
    pub no_guests: bool,
    pub is_chat_locked: bool,
    pub is_tts_disabled: bool,
    pub video_quality: String,
    pub meeting_invite_code: Option<String>,

    pub webinar: WebinarOverlay,
    pub apps: SharedApps,

    pub created_at: Instant,
    pub last_activity_at: Instant,
    pub empty_since: Option<Instant>,
    pub closed: bool,

    next_seq: u64,
}

impl RoomState {
    pub fn new(room_id: String, channel_id: String, default_max_attendees: u32) -> Self {
        let now = Instant::now();
        Self {
            room_id,
            channel_id,
            participants: HashMap::new(),
            sessions: HashMap::new(),
            host_user_key: None,
            departed_host: None,
            producer_index: HashMap::new(),
            screen_share_producer_id: None,
            pending_joins: Vec::new(),
            approved_joins: HashSet::new(),
            is_locked: false,
            no_guests: false,
            is_chat_locked: false,
            is_tts_disabled: false,
            video_quality: "auto".to_string(),
            meeting_invite_code: None,
            webinar: WebinarOverlay::new(default_max_attendees),
            apps: SharedApps::default(),
            created_at: now,
            last_activity_at: now,
            empty_since: None,
            closed: false,
            next_seq: 0,
        }
    }

    pub fn next_admission_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    pub fn touch(&mut self) {
        self.last_activity_at = Instant::now();
    }

    pub fn attendee_count(&self) -> u32 {
        self.participants
            .values()
            .filter(|p| p.is_observer())
            .count() as u32
    }

    pub fn host_connection_ids(&self) -> Vec<String> {
        self.participants
            .values()
            .filter(|p| p.is_host())
            .map(|p| p.connection_id.clone())
            .collect()
    }

    pub fn host_user_id(&self) -> Option<String> {
        let host_key = self.host_user_key.as_deref()?;
        self.participants
            .values()
            .find(|p| p.user_key == host_key && p.is_host())
            .map(|p| p.user_id.clone())
    }

    /// Connection ids of every connected member, minus an optional exclusion.
    pub fn member_connection_ids(&self, except: Option<&str>) -> Vec<String> {
        self.participants
            .values()
            .filter(|p| p.connected && Some(p.connection_id.as_str()) != except)
            .map(|p| p.connection_id.clone())
            .collect()
    }

    pub fn observer_connection_ids(&self) -> Vec<String> {
        self.participants
            .values()
            .filter(|p| p.connected && p.is_observer())
            .map(|p| p.connection_id.clone())
            .collect()
    }

    pub fn connections_of_user(&self, user_key: &str) -> Vec<String> {
        self.participants
            .values()
            .filter(|p| p.user_key == user_key)
            .map(|p| p.connection_id.clone())
            .collect()
    }

    pub fn connections_of_user_id(&self, user_id: &str) -> Vec<String> {
        self.participants
            .values()
            .filter(|p| p.user_id == user_id)
            .map(|p| p.connection_id.clone())
            .collect()
    }

    pub fn user_key_admitted(&self, user_key: &str) -> bool {
        self.participants.values().any(|p| p.user_key == user_key)
    }

    /// Non-observer, non-ghost member count; drives the empty-room clock.
    pub fn resident_count(&self) -> usize {
        self.participants.values().filter(|p| !p.is_observer()).count()
    }

    /// Host election order: earliest admitted connected participant,
    /// skipping observers and ghosts, connection id as tie-break.
    pub fn next_host_candidate(&self) -> Option<&Participant> {
        self.participants
            .values()
            .filter(|p| p.connected && !p.is_observer() && !p.is_ghost)
            .min_by(|a, b| {
                a.admitted_seq
                    .cmp(&b.admitted_seq)
                    .then_with(|| a.connection_id.cmp(&b.connection_id))
            })
    }

    pub fn describe_producer(&self, producer_id: &str) -> Option<ProducerDescriptor> {
        let entry = self.producer_index.get(producer_id)?;
        let owner = self.participants.get(&entry.owner_connection_id)?;
        Some(ProducerDescriptor {
            producer_id: producer_id.to_string(),
            connection_id: owner.connection_id.clone(),
            user_id: owner.user_id.clone(),
            kind: entry.kind,
            producer_type: entry.producer_type,
            paused: entry.paused,
        })
    }

    /// Every producer in the room, excluding one connection's own.
    pub fn producers_excluding(&self, except: &str) -> Vec<ProducerDescriptor> {
        let mut out: Vec<ProducerDescriptor> = self
            .producer_index
            .keys()
            .filter_map(|id| self.describe_producer(id))
            .filter(|d| d.connection_id != except)
            .collect();
        out.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        out
    }

    /// Producers owned by one connection.
    pub fn producers_of(&self, connection_id: &str) -> Vec<ProducerDescriptor> {
        let mut out: Vec<ProducerDescriptor> = self
            .producer_index
            .iter()
            .filter(|(_, r)| r.owner_connection_id == connection_id)
            .filter_map(|(id, _)| self.describe_producer(id))
            .collect();
        out.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        out
    }

    pub fn pending_position(&self, user_key: &str) -> Option<usize> {
        self.pending_joins.iter().position(|p| p.user_key == user_key)
    }

    /// Picks the feed source for webinar observers: the pinned host, or the
    /// earliest-admitted member that owns a producer. Falls back across
    /// modes when no score source exists.
    pub fn select_feed_speaker(&self) -> Option<String> {
        use crate::room::webinar::FeedMode;
        match self.webinar.feed_mode {
            FeedMode::HostPinned => self
                .participants
                .values()
                .find(|p| p.is_host() && p.connected)
                .map(|p| p.connection_id.clone()),
            FeedMode::ActiveSpeaker => self
                .participants
                .values()
                .filter(|p| p.connected && !p.is_observer() && !p.producers.is_empty())
                .min_by(|a, b| {
                    a.admitted_seq
                        .cmp(&b.admitted_seq)
                        .then_with(|| a.connection_id.cmp(&b.connection_id))
                })
                .map(|p| p.connection_id.clone()),
        }
    }

    /// Role to assign a non-host, non-observer joiner.
    pub fn default_role(&self) -> Role {
        Role::Participant
    }
}
