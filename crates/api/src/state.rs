use std::sync::Arc;

use huddle_config::Settings;
use huddle_core::bus::ConnectionBus;
use huddle_core::media::{MediaRouterFactory, MediasoupRouterFactory};
use huddle_core::policy::ClientPolicies;
use huddle_core::room::registry::RoomRegistry;
use huddle_core::{TokenVerifier, lifecycle};
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub verifier: Arc<TokenVerifier>,
    pub policies: Arc<ClientPolicies>,
    pub bus: Arc<ConnectionBus>,
    pub registry: Arc<RoomRegistry>,
    /// Parsed ICE server list forwarded opaquely in join acks.
    pub ice_servers: Option<serde_json::Value>,
}

impl AppState {
    /// Production state. Mediasoup workers spawn lazily with the first
    /// rooms, so construction itself forks nothing.
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let media_factory: Arc<dyn MediaRouterFactory> =
            Arc::new(MediasoupRouterFactory::new(&settings.mediasoup));
        Self::with_media_factory(settings, media_factory)
    }

    /// State with an injected media seam; what tests use.
    pub fn with_media_factory(
        settings: Settings,
        media_factory: Arc<dyn MediaRouterFactory>,
    ) -> anyhow::Result<Self> {
        let verifier = Arc::new(TokenVerifier::new(settings.auth.clone()));
        let policies = Arc::new(ClientPolicies::from_settings(&settings.policy)?);
        let bus = Arc::new(ConnectionBus::new());
        let registry = RoomRegistry::new(
            media_factory,
            Arc::clone(&bus),
            Arc::clone(&policies),
            settings.lifecycle.clone(),
            settings.webinar.clone(),
        );

        let _reaper =
            lifecycle::spawn_reaper(Arc::clone(&registry), settings.lifecycle.reaper_interval_ms);

        let ice_servers = settings
            .ice
            .servers
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|raw| match serde_json::from_str(raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(%e, "ignoring malformed ICE server config");
                    None
                }
            });

        Ok(Self {
            settings,
            verifier,
            policies,
            bus,
            registry,
            ice_servers,
        })
    }
}
