use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::media::{MediaKind, ProducerType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only webinar attendee.
    Attendee,
    Participant,
    Host,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Attendee => "attendee",
            Role::Participant => "participant",
            Role::Host => "host",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProducerInfo {
    pub id: String,
    pub kind: MediaKind,
    pub producer_type: ProducerType,
    pub paused: bool,
}

#[derive(Debug, Clone)]
pub struct ConsumerInfo {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
}

/// Per-connection state of an admitted member.
#[derive(Debug)]
pub struct Participant {
    pub connection_id: String,
    pub user_key: String,
    pub user_id: String,
    pub session_id: String,
    pub display_name: String,
    pub role: Role,
    pub is_ghost: bool,
    pub client_policy_key: String,

    pub producer_transport_id: Option<String>,
    pub consumer_transport_id: Option<String>,
    pub producers: HashMap<String, ProducerInfo>,
    pub consumers: HashMap<String, ConsumerInfo>,

    pub is_muted: bool,
    pub is_camera_off: bool,
    pub is_hand_raised: bool,

    /// Monotonic admission sequence; drives first-joiner tie-breaks and
    /// host election order.
    pub admitted_seq: u64,
    /// False while the connection is inside the disconnect-grace window.
    pub connected: bool,
}

impl Participant {
    pub fn is_observer(&self) -> bool {
        self.role == Role::Attendee
    }

    pub fn is_host(&self) -> bool {
        self.role == Role::Host
    }

    /// Records the producer transport. Idempotent on the same id; returns a
    /// previously attached transport id so the caller can close it.
    pub fn attach_producer_transport(&mut self, id: String) -> Result<Option<String>, SignalError> {
        if self.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        if self.producer_transport_id.as_deref() == Some(id.as_str()) {
            return Ok(None);
        }
        Ok(self.producer_transport_id.replace(id))
    }

    pub fn attach_consumer_transport(&mut self, id: String) -> Option<String> {
        if self.consumer_transport_id.as_deref() == Some(id.as_str()) {
            return None;
        }
        self.consumer_transport_id.replace(id)
    }

    pub fn add_producer(&mut self, producer: ProducerInfo) {
        self.producers.insert(producer.id.clone(), producer);
    }

    pub fn remove_producer_by_id(&mut self, producer_id: &str) -> Option<ProducerInfo> {
        self.producers.remove(producer_id)
    }

    pub fn get_producer(&self, kind: MediaKind, producer_type: ProducerType) -> Option<&ProducerInfo> {
        self.producers
            .values()
            .find(|p| p.kind == kind && p.producer_type == producer_type)
    }

    pub fn owns_producer(&self, producer_id: &str) -> bool {
        self.producers.contains_key(producer_id)
    }

    pub fn is_consuming(&self, producer_id: &str) -> bool {
        self.consumers.values().any(|c| c.producer_id == producer_id)
    }
}
