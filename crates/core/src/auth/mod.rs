use chrono::{Duration, Utc};
use huddle_config::AuthSettings;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Join-token claims as minted by the token issuer.
///
/// `isAdmin` is a legacy alias of `isHost`; the verifier collapses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub is_forced_host: bool,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub allow_room_creation: bool,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    pub session_id: String,
    #[serde(default)]
    pub join_mode: JoinMode,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

fn default_client_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Meeting,
    WebinarAttendee,
}

/// Verified identity handed to the session and the room core.
#[derive(Debug, Clone)]
pub struct Identity {
    /// Stable key shared by every connection of the same user; the token
    /// email when present, the subject otherwise.
    pub user_key: String,
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_forced_host: bool,
    pub is_host: bool,
    pub allow_room_creation: bool,
    pub client_policy_key: String,
    pub session_id: String,
    pub join_mode: JoinMode,
}

pub struct TokenVerifier {
    settings: AuthSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(settings: AuthSettings) -> Self {
        let encoding_key = EncodingKey::from_secret(settings.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());
        Self {
            settings,
            encoding_key,
            decoding_key,
        }
    }

    /// Mints a signed join token. Not exposed over the wire; used by tests
    /// and operator tooling that provisions clients.
    pub fn mint(&self, spec: TokenSpec) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = JoinClaims {
            sub: spec.user_id,
            email: spec.email,
            name: spec.display_name,
            is_forced_host: spec.is_forced_host,
            is_host: spec.is_host,
            is_admin: spec.is_host,
            allow_room_creation: spec.allow_room_creation,
            client_id: spec.client_id,
            session_id: spec.session_id,
            join_mode: spec.join_mode,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.settings.token_ttl_secs as i64)).timestamp(),
            iss: self.settings.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.settings.issuer]);

        let token_data = decode::<JoinClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;
        let claims = token_data.claims;

        if claims.is_admin != claims.is_host {
            warn!(
                sub = %claims.sub,
                is_admin = claims.is_admin,
                is_host = claims.is_host,
                "isAdmin/isHost diverge in token; treating isAdmin as alias"
            );
        }

        let user_key = claims
            .email
            .clone()
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| claims.sub.clone());

        Ok(Identity {
            user_key,
            user_id: claims.sub,
            email: claims.email,
            display_name: claims.name,
            is_forced_host: claims.is_forced_host,
            is_host: claims.is_host || claims.is_admin,
            allow_room_creation: claims.allow_room_creation,
            client_policy_key: claims.client_id,
            session_id: claims.session_id,
            join_mode: claims.join_mode,
        })
    }
}

/// Input for [`TokenVerifier::mint`].
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub is_forced_host: bool,
    pub is_host: bool,
    pub allow_room_creation: bool,
    pub client_id: String,
    pub session_id: String,
    pub join_mode: JoinMode,
}

impl Default for TokenSpec {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            email: None,
            display_name: None,
            is_forced_host: false,
            is_host: false,
            allow_room_creation: false,
            client_id: "default".to_string(),
            session_id: String::new(),
            join_mode: JoinMode::Meeting,
        }
    }
}
