use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;

pub mod mediasoup_router;

pub use mediasoup_router::MediasoupRouterFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Source label attached by the producing client (`appData.type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    #[default]
    Webcam,
    Screen,
}

/// Transport connection details sent to the client. ICE/DTLS payloads are
/// opaque to the core; they are produced and consumed by the media worker
/// and the client only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub id: String,
    pub ice_parameters: serde_json::Value,
    pub ice_candidates: serde_json::Value,
    pub dtls_parameters: serde_json::Value,
}

/// Consumer details sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSpec {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: serde_json::Value,
}

/// A freshly created producer: its id plus a one-shot notification that
/// fires when the media worker closes it (transport close or worker-side
/// close, whichever happens first).
pub struct NewProducer {
    pub id: String,
    pub closed: oneshot::Receiver<()>,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("transport not found")]
    TransportNotFound,
    #[error("producer not found")]
    ProducerNotFound,
    #[error("consumer not found")]
    ConsumerNotFound,
    #[error("cannot consume: incompatible capabilities")]
    CannotConsume,
    #[error("{0}")]
    Backend(String),
}

/// Opaque façade over the media worker, one instance per room.
///
/// The room core never interprets RTP/ICE/DTLS payloads; everything crosses
/// this seam as `serde_json::Value`.
#[async_trait]
pub trait MediaRouter: Send + Sync {
    fn rtp_capabilities(&self) -> serde_json::Value;

    async fn create_transport(&self) -> Result<TransportOptions, MediaError>;

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: serde_json::Value,
    ) -> Result<(), MediaError>;

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        paused: bool,
    ) -> Result<NewProducer, MediaError>;

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: serde_json::Value,
    ) -> Result<ConsumerSpec, MediaError>;

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &serde_json::Value) -> bool;

    async fn pause_producer(&self, producer_id: &str) -> Result<(), MediaError>;
    async fn resume_producer(&self, producer_id: &str) -> Result<(), MediaError>;
    async fn close_producer(&self, producer_id: &str) -> Result<(), MediaError>;

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), MediaError>;

    async fn restart_ice(&self, transport_id: &str) -> Result<serde_json::Value, MediaError>;

    async fn close_transport(&self, transport_id: &str);
}

/// Creates one router per room.
#[async_trait]
pub trait MediaRouterFactory: Send + Sync {
    async fn create_router(&self) -> anyhow::Result<Arc<dyn MediaRouter>>;
}
