pub mod auth;
pub mod bus;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod media;
pub mod policy;
pub mod room;

pub use auth::TokenVerifier;
pub use bus::ConnectionBus;
pub use error::SignalError;
pub use policy::ClientPolicies;
pub use room::registry::RoomRegistry;
