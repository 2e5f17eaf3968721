use thiserror::Error;

use crate::media::MediaError;

/// Per-request failure surfaced through the ack envelope.
///
/// The `Display` text is part of the wire contract: clients feature-gate on
/// substrings such as "invite code required", so messages stay stable even
/// when the enum is refactored.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),

    #[error("room not found")]
    RoomNotFound,
    #[error("room is locked")]
    RoomLocked,
    #[error("guests are not allowed in this room")]
    NoGuests,
    #[error("webinar is not enabled")]
    WebinarDisabled,
    #[error("webinar is locked")]
    WebinarLocked,
    #[error("webinar is full")]
    WebinarFull,
    #[error("webinar invite code required")]
    WebinarInviteCodeRequired,
    #[error("invalid webinar invite code")]
    WebinarInviteCodeInvalid,
    #[error("meeting invite code required")]
    MeetingInviteCodeRequired,
    #[error("invalid meeting invite code")]
    MeetingInviteCodeInvalid,

    #[error("not ready for this request")]
    NotReady,
    #[error("not in a room")]
    NotInRoom,
    #[error("room has no host")]
    NoHost,
    #[error("screen share is already active")]
    ScreenBusy,

    #[error("ghost sessions cannot publish media")]
    GhostNoMedia,
    #[error("attendees cannot perform this action")]
    ObserverReadonly,
    #[error("display name changes are disabled")]
    DisplayNameDisabled,

    #[error("transport not found")]
    TransportNotFound,
    #[error("producer not found")]
    ProducerNotFound,
    #[error("consumer not found")]
    ConsumerNotFound,
    #[error("cannot consume this producer")]
    CannotConsume,
    #[error("media router error: {0}")]
    MediaRouter(String),

    #[error("request timed out")]
    Timeout,
    #[error("server is draining")]
    ServerDraining,
    #[error("internal error")]
    Internal,

    #[error("{0}")]
    BadRequest(String),
}

impl SignalError {
    /// Stable machine-readable code carried alongside the diagnostic text.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RoomNotFound => "ROOM_NOT_FOUND",
            Self::RoomLocked => "ROOM_LOCKED",
            Self::NoGuests => "NO_GUESTS",
            Self::WebinarDisabled => "WEBINAR_DISABLED",
            Self::WebinarLocked => "WEBINAR_LOCKED",
            Self::WebinarFull => "WEBINAR_FULL",
            Self::WebinarInviteCodeRequired | Self::WebinarInviteCodeInvalid => {
                "WEBINAR_INVITE_CODE_INVALID"
            }
            Self::MeetingInviteCodeRequired | Self::MeetingInviteCodeInvalid => {
                "MEETING_INVITE_CODE_INVALID"
            }
            Self::NotReady => "NOT_READY",
            Self::NotInRoom => "NOT_IN_ROOM",
            Self::NoHost => "NO_HOST",
            Self::ScreenBusy => "SCREEN_BUSY",
            Self::GhostNoMedia => "GHOST_NO_MEDIA",
            Self::ObserverReadonly => "OBSERVER_READONLY",
            Self::DisplayNameDisabled => "DISPLAY_NAME_DISABLED",
            Self::TransportNotFound => "TRANSPORT_NOT_FOUND",
            Self::ProducerNotFound => "PRODUCER_NOT_FOUND",
            Self::ConsumerNotFound => "CONSUMER_NOT_FOUND",
            Self::CannotConsume => "CANNOT_CONSUME",
            Self::MediaRouter(_) => "MEDIA_ROUTER_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::ServerDraining => "SERVER_DRAINING",
            Self::Internal => "INTERNAL",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl From<MediaError> for SignalError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::TransportNotFound => SignalError::TransportNotFound,
            MediaError::ProducerNotFound => SignalError::ProducerNotFound,
            MediaError::ConsumerNotFound => SignalError::ConsumerNotFound,
            MediaError::CannotConsume => SignalError::CannotConsume,
            MediaError::Backend(msg) => SignalError::MediaRouter(msg),
        }
    }
}
