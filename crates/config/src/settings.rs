use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub auth: AuthSettings,
    pub mediasoup: MediasoupSettings,
    pub policy: PolicySettings,
    pub lifecycle: LifecycleSettings,
    pub webinar: WebinarSettings,
    pub ice: IceSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    /// Advertised `wss://` URL handed to clients in join responses.
    pub public_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub secret: String,
    pub issuer: String,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MediasoupSettings {
    pub num_workers: u32,
    pub listen_ip: String,
    pub announced_ip: String,
    pub rtc_min_port: u16,
    pub rtc_max_port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicySettings {
    /// JSON override of per-client policies:
    /// `{"<clientId>": {"allowNonHostRoomCreation": true, ...}}`.
    pub clients: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleSettings {
    /// How long a dropped connection may reattach before full teardown.
    pub disconnect_grace_ms: u64,
    /// How long a room stays host-less before the next host is elected.
    pub admin_cleanup_timeout_ms: u64,
    /// How long an empty room survives before the reaper destroys it.
    pub empty_room_ttl_ms: u64,
    pub reaper_interval_ms: u64,
    /// Server-side ceiling for a single signaling request.
    pub request_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebinarSettings {
    pub default_max_attendees: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IceSettings {
    /// Opaque ICE server list forwarded to clients, if provisioned.
    pub servers: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("HUDDLE"),
            )
            .set_default("app.host", "0.0.0.0")?
            .set_default("app.port", 3016)?
            .set_default("app.cors_origins", Vec::<String>::new())?
            .set_default("app.public_url", None::<String>)?
            .set_default("auth.secret", "change-me-in-production")?
            .set_default("auth.issuer", "huddle")?
            .set_default("auth.token_ttl_secs", 3600)?
            .set_default("mediasoup.num_workers", 2)?
            .set_default("mediasoup.listen_ip", "0.0.0.0")?
            .set_default("mediasoup.announced_ip", "127.0.0.1")?
            .set_default("mediasoup.rtc_min_port", 40000)?
            .set_default("mediasoup.rtc_max_port", 49999)?
            .set_default("policy.clients", None::<String>)?
            .set_default("lifecycle.disconnect_grace_ms", 15_000)?
            .set_default("lifecycle.admin_cleanup_timeout_ms", 120_000)?
            .set_default("lifecycle.empty_room_ttl_ms", 300_000)?
            .set_default("lifecycle.reaper_interval_ms", 10_000)?
            .set_default("lifecycle.request_timeout_ms", 30_000)?
            .set_default("webinar.default_max_attendees", 100)?
            .set_default("ice.servers", None::<String>)?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::load().expect("Failed to load default settings")
    }
}
