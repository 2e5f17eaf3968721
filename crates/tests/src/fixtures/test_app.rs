use std::net::SocketAddr;
use std::sync::Arc;

use huddle_api::{build_router, state::AppState};
use huddle_config::Settings;
use huddle_core::auth::{JoinMode, TokenSpec};
use tokio::net::TcpListener;

use super::stub_media::StubMediaFactory;
use super::ws_client::WsClient;

/// A running test server with a stub media seam and fast lifecycle timings.
pub struct TestApp {
    pub addr: SocketAddr,
    pub base_url: String,
    pub ws_url: String,
    pub settings: Settings,
    pub state: AppState,
    pub media: Arc<StubMediaFactory>,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_settings(|_| {}).await
    }

    /// Spawn a test server with customized settings.
    ///
    /// The `mutator` closure receives a `&mut Settings` after test defaults
    /// are applied, so individual tests can tweak policies and timings.
    pub async fn spawn_with_settings(mutator: impl FnOnce(&mut Settings)) -> Self {
        let mut settings = test_settings();
        mutator(&mut settings);

        let media = Arc::new(StubMediaFactory::new());
        let state = AppState::with_media_factory(settings.clone(), media.clone())
            .expect("Failed to create AppState");
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base_url = format!("http://{}", addr);
        let ws_url = format!("ws://{}/ws", addr);
        let client = reqwest::Client::new();

        Self {
            addr,
            base_url,
            ws_url,
            settings,
            state,
            media,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn mint(&self, spec: TokenSpec) -> String {
        self.state.verifier.mint(spec).expect("mint token")
    }

    /// Host token with room-creation rights; the usual meeting organizer.
    pub fn host_token(&self, user: &str, session: &str) -> String {
        self.mint(TokenSpec {
            user_id: user.to_string(),
            email: Some(format!("{user}@example.com")),
            display_name: Some(capitalized(user)),
            is_host: true,
            allow_room_creation: true,
            session_id: session.to_string(),
            ..Default::default()
        })
    }

    /// Plain participant token with a verified email.
    pub fn user_token(&self, user: &str, session: &str) -> String {
        self.mint(TokenSpec {
            user_id: user.to_string(),
            email: Some(format!("{user}@example.com")),
            display_name: Some(capitalized(user)),
            session_id: session.to_string(),
            ..Default::default()
        })
    }

    /// Guest token without a verified identity.
    pub fn guest_token(&self, user: &str, session: &str) -> String {
        self.mint(TokenSpec {
            user_id: user.to_string(),
            display_name: Some(capitalized(user)),
            session_id: session.to_string(),
            ..Default::default()
        })
    }

    /// Webinar attendee token.
    pub fn attendee_token(&self, user: &str, session: &str) -> String {
        self.mint(TokenSpec {
            user_id: user.to_string(),
            email: Some(format!("{user}@example.com")),
            display_name: Some(capitalized(user)),
            session_id: session.to_string(),
            join_mode: JoinMode::WebinarAttendee,
            ..Default::default()
        })
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        WsClient::connect(&self.ws_url, token).await
    }
}

fn capitalized(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn test_settings() -> Settings {
    Settings {
        app: huddle_config::AppSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            cors_origins: vec![],
            public_url: None,
        },
        auth: huddle_config::AuthSettings {
            secret: "test-secret-key-for-jwt-signing-minimum-32-chars".to_string(),
            issuer: "huddle".to_string(),
            token_ttl_secs: 3600,
        },
        mediasoup: huddle_config::MediasoupSettings {
            num_workers: 1,
            listen_ip: "0.0.0.0".to_string(),
            announced_ip: "127.0.0.1".to_string(),
            rtc_min_port: 40000,
            rtc_max_port: 40100,
        },
        policy: huddle_config::PolicySettings { clients: None },
        lifecycle: huddle_config::LifecycleSettings {
            disconnect_grace_ms: 300,
            admin_cleanup_timeout_ms: 700,
            empty_room_ttl_ms: 500,
            reaper_interval_ms: 50,
            request_timeout_ms: 5_000,
        },
        webinar: huddle_config::WebinarSettings {
            default_max_attendees: 100,
        },
        ice: huddle_config::IceSettings { servers: None },
    }
}
