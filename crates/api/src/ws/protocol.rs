use huddle_core::SignalError;
use huddle_core::media::MediaKind;
use serde::Deserialize;
use serde_json::{Value, json};

/// One client request: `{"id": n, "type": "<name>", "data": {...}}`.
#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
}

pub fn ack_ok(id: u64, data: Value) -> Value {
    json!({ "id": id, "ok": true, "data": data })
}

pub fn ack_err(id: u64, err: &SignalError) -> Value {
    json!({
        "id": id,
        "error": { "code": err.code(), "message": err.to_string() },
    })
}

pub fn parse_args<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, SignalError> {
    serde_json::from_value(data).map_err(|e| SignalError::BadRequest(e.to_string()))
}

// --- Request payloads; key names are part of the wire contract. ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomArgs {
    pub room_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub ghost: bool,
    #[serde(default)]
    pub webinar_invite_code: Option<String>,
    #[serde(default)]
    pub meeting_invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransportArgs {
    pub transport_id: String,
    pub dtls_parameters: Value,
}

#[derive(Debug, Deserialize)]
pub struct RestartIceArgs {
    pub transport: TransportName,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum TransportName {
    Producer,
    Consumer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProduceArgs {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
    #[serde(default)]
    pub app_data: ProduceAppData,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProduceAppData {
    #[serde(rename = "type", default)]
    pub producer_type: huddle_core::media::ProducerType,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeArgs {
    pub producer_id: String,
    pub rtp_capabilities: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeConsumerArgs {
    pub consumer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleProducerArgs {
    pub producer_id: String,
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseProducerArgs {
    pub producer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct HandRaisedArgs {
    pub raised: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatArgs {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ReactionArgs {
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayNameArgs {
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct FlagArgs {
    pub flag: bool,
}

#[derive(Debug, Deserialize)]
pub struct VideoQualityArgs {
    pub quality: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserArgs {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectArgs {
    pub user_id: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeetingConfigArgs {
    #[serde(default)]
    pub invite_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdArgs {
    pub app_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AppsLockArgs {
    pub locked: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppPayloadArgs {
    pub app_id: String,
    pub update: String,
}
