use std::collections::HashMap;

use huddle_config::PolicySettings;
use serde::Deserialize;
use tracing::info;

/// Per-client behavioral flags, keyed by the token's `clientId`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientPolicy {
    /// When false, a non-host join to a nonexistent room fails ROOM_NOT_FOUND.
    pub allow_non_host_room_creation: bool,
    /// When false, tokens asserting host are downgraded to participant.
    pub allow_host_join: bool,
    /// When true, non-host joins queue in the waiting room until admitted.
    pub use_waiting_room: bool,
    /// When false, only hosts may change their display name post-admission.
    pub allow_display_name_update: bool,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            allow_non_host_room_creation: true,
            allow_host_join: true,
            use_waiting_room: false,
            allow_display_name_update: true,
        }
    }
}

pub struct ClientPolicies {
    clients: HashMap<String, ClientPolicy>,
}

impl ClientPolicies {
    pub fn from_settings(settings: &PolicySettings) -> anyhow::Result<Self> {
        let mut clients: HashMap<String, ClientPolicy> = HashMap::new();
        if let Some(raw) = settings.clients.as_deref().filter(|s| !s.is_empty()) {
            clients = serde_json::from_str(raw)?;
            info!(clients = clients.len(), "client policy override loaded");
        }
        Ok(Self { clients })
    }

    /// Policy for a client key, falling back to the `"default"` entry and
    /// then to built-in defaults.
    pub fn get(&self, client_policy_key: &str) -> ClientPolicy {
        self.clients
            .get(client_policy_key)
            .or_else(|| self.clients.get("default"))
            .cloned()
            .unwrap_or_default()
    }
}
