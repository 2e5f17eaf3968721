use nanoid::nanoid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FeedMode {
    #[default]
    #[serde(rename = "active-speaker")]
    ActiveSpeaker,
    #[serde(rename = "host-pinned")]
    HostPinned,
}

/// Webinar policy overlay on a room.
///
/// `link_slug` is generated once when the webinar is first enabled and never
/// changes; `link_version` is the monotonic counter that invalidates old
/// links when rotated.
#[derive(Debug, Clone)]
pub struct WebinarOverlay {
    pub enabled: bool,
    pub public_access: bool,
    pub locked: bool,
    pub max_attendees: u32,
    pub requires_invite_code: bool,
    pub invite_code: Option<String>,
    pub link_slug: String,
    pub link_version: u32,
    pub feed_mode: FeedMode,
    /// Connection whose producers observers currently receive.
    pub feed_speaker: Option<String>,
}

impl WebinarOverlay {
    pub fn new(default_max_attendees: u32) -> Self {
        Self {
            enabled: false,
            public_access: false,
            locked: false,
            max_attendees: default_max_attendees,
            requires_invite_code: false,
            invite_code: None,
            link_slug: String::new(),
            link_version: 1,
            feed_mode: FeedMode::default(),
            feed_speaker: None,
        }
    }

    pub fn apply(&mut self, update: WebinarUpdate) {
        if let Some(enabled) = update.enabled {
            self.enabled = enabled;
            if enabled && self.link_slug.is_empty() {
                self.link_slug = nanoid!(12);
            }
        }
        if let Some(public_access) = update.public_access {
            self.public_access = public_access;
        }
        if let Some(locked) = update.locked {
            self.locked = locked;
        }
        if let Some(max_attendees) = update.max_attendees {
            self.max_attendees = max_attendees;
        }
        if let Some(requires_invite_code) = update.requires_invite_code {
            self.requires_invite_code = requires_invite_code;
        }
        if let Some(invite_code) = update.invite_code {
            self.invite_code = if invite_code.is_empty() {
                None
            } else {
                Some(invite_code)
            };
        }
        if let Some(feed_mode) = update.feed_mode {
            self.feed_mode = feed_mode;
        }
    }

    pub fn rotate_link(&mut self) -> u32 {
        self.link_version += 1;
        self.link_version
    }

    /// Shareable attendee link. Old versions stop resolving after a rotate.
    pub fn link(&self) -> String {
        format!("/w/{}/v{}", self.link_slug, self.link_version)
    }

    pub fn snapshot(&self, attendee_count: u32) -> WebinarSnapshot {
        WebinarSnapshot {
            enabled: self.enabled,
            public_access: self.public_access,
            locked: self.locked,
            max_attendees: self.max_attendees,
            attendee_count,
            requires_invite_code: self.requires_invite_code,
            link_slug: self.link_slug.clone(),
            link_version: self.link_version,
            feed_mode: self.feed_mode,
        }
    }
}

/// Partial update from `webinar:updateConfig`; absent fields keep their
/// current value, an empty `inviteCode` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebinarUpdate {
    pub enabled: Option<bool>,
    pub public_access: Option<bool>,
    pub locked: Option<bool>,
    pub max_attendees: Option<u32>,
    pub requires_invite_code: Option<bool>,
    pub invite_code: Option<String>,
    pub feed_mode: Option<FeedMode>,
}

/// Public view of the webinar config; never carries the invite code itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebinarSnapshot {
    pub enabled: bool,
    pub public_access: bool,
    pub locked: bool,
    pub max_attendees: u32,
    pub attendee_count: u32,
    pub requires_invite_code: bool,
    pub link_slug: String,
    pub link_version: u32,
    pub feed_mode: FeedMode,
}
