use std::net::IpAddr;
use std::num::NonZero;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use huddle_config::MediasoupSettings;
use mediasoup::prelude::*;
use mediasoup::webrtc_transport::{
    WebRtcTransportListenInfos, WebRtcTransportOptions, WebRtcTransportRemoteParameters,
};
use mediasoup::worker::WorkerSettings;
use mediasoup::worker_manager::WorkerManager;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::{
    ConsumerSpec, MediaError, MediaKind, MediaRouter, MediaRouterFactory, NewProducer,
    TransportOptions,
};

/// One live mediasoup worker and the number of routers currently on it.
struct WorkerSlot {
    worker: Worker,
    routers: Arc<AtomicUsize>,
    dead: Arc<AtomicBool>,
}

/// Keeps a worker's router count honest: decrements when the room's router
/// handle is dropped, so the slot's capacity frees up with the room.
struct RouterLease {
    routers: Arc<AtomicUsize>,
}

impl Drop for RouterLease {
    fn drop(&mut self) {
        self.routers.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Production [`MediaRouterFactory`].
///
/// Workers are not pre-forked: the first room spawns the first worker, and
/// further workers come up one at a time until `num_workers`, after which
/// new rooms land on whichever live worker hosts the fewest routers. Dead
/// workers are evicted from the fleet on the next allocation; their rooms
/// are lost with them (the routers died with the process).
pub struct MediasoupRouterFactory {
    worker_manager: WorkerManager,
    workers: tokio::sync::Mutex<Vec<WorkerSlot>>,
    max_workers: usize,
    rtc_min_port: u16,
    rtc_max_port: u16,
    listen_ip: IpAddr,
    announced_ip: Option<String>,
}

impl MediasoupRouterFactory {
    pub fn new(settings: &MediasoupSettings) -> Self {
        let listen_ip: IpAddr = settings
            .listen_ip
            .parse()
            .unwrap_or_else(|_| "0.0.0.0".parse().unwrap());

        let announced_ip = if settings.announced_ip.is_empty() {
            None
        } else {
            Some(settings.announced_ip.clone())
        };

        Self {
            worker_manager: WorkerManager::new(),
            workers: tokio::sync::Mutex::new(Vec::new()),
            max_workers: settings.num_workers.max(1) as usize,
            rtc_min_port: settings.rtc_min_port,
            rtc_max_port: settings.rtc_max_port,
            listen_ip,
            announced_ip,
        }
    }

    /// Picks the worker the next router should land on.
    ///
    /// Preference order: grow the fleet while an idle worker would beat the
    /// busiest-idle tradeoff (any live worker already carries a router and
    /// the cap allows another process), otherwise the least-loaded live
    /// worker.
    async fn checkout_worker(&self) -> anyhow::Result<(Worker, RouterLease)> {
        let mut workers = self.workers.lock().await;

        let before = workers.len();
        workers.retain(|slot| !slot.dead.load(Ordering::Relaxed));
        if workers.len() < before {
            warn!(
                evicted = before - workers.len(),
                live = workers.len(),
                "evicted dead mediasoup workers"
            );
        }

        let least_loaded = workers
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.routers.load(Ordering::Relaxed))
            .map(|(idx, slot)| (idx, slot.routers.load(Ordering::Relaxed)));

        let idx = match least_loaded {
            // An occupied fleet below the cap grows before it doubles up.
            Some((_, occupancy)) if occupancy > 0 && workers.len() < self.max_workers => {
                let slot = self.spawn_worker().await?;
                workers.push(slot);
                workers.len() - 1
            }
            Some((idx, _)) => idx,
            None => {
                let slot = self.spawn_worker().await?;
                workers.push(slot);
                0
            }
        };

        let slot = &workers[idx];
        slot.routers.fetch_add(1, Ordering::Relaxed);
        Ok((
            slot.worker.clone(),
            RouterLease {
                routers: Arc::clone(&slot.routers),
            },
        ))
    }

    async fn spawn_worker(&self) -> anyhow::Result<WorkerSlot> {
        let mut worker_settings = WorkerSettings::default();
        worker_settings.rtc_port_range = self.rtc_min_port..=self.rtc_max_port;

        let worker = self
            .worker_manager
            .create_worker(worker_settings)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to spawn mediasoup worker: {}", e))?;

        let dead = Arc::new(AtomicBool::new(false));
        let worker_id = worker.id();
        {
            let dead = Arc::clone(&dead);
            worker
                .on_dead(move |reason| {
                    dead.store(true, Ordering::Relaxed);
                    error!(?reason, %worker_id, "mediasoup worker died");
                })
                .detach();
        }

        info!(%worker_id, "mediasoup worker spawned on demand");
        Ok(WorkerSlot {
            worker,
            routers: Arc::new(AtomicUsize::new(0)),
            dead,
        })
    }
}

#[async_trait]
impl MediaRouterFactory for MediasoupRouterFactory {
    async fn create_router(&self) -> anyhow::Result<Arc<dyn MediaRouter>> {
        let (worker, lease) = self.checkout_worker().await?;
        let router = worker
            .create_router(RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create router: {}", e))?;

        info!(router_id = %router.id(), worker_id = %worker.id(), "mediasoup router created");

        Ok(Arc::new(MediasoupRouter {
            router,
            listen_ip: self.listen_ip,
            announced_ip: self.announced_ip.clone(),
            transports: DashMap::new(),
            producers: DashMap::new(),
            consumers: DashMap::new(),
            _lease: lease,
        }))
    }
}

/// One mediasoup Router plus the live handles it has vended. Dropping a
/// handle closes the underlying mediasoup object, so removal from these
/// maps is the close operation.
pub struct MediasoupRouter {
    router: Router,
    listen_ip: IpAddr,
    announced_ip: Option<String>,
    transports: DashMap<String, WebRtcTransport>,
    producers: DashMap<String, Producer>,
    consumers: DashMap<String, Consumer>,
    _lease: RouterLease,
}

#[async_trait]
impl MediaRouter for MediasoupRouter {
    fn rtp_capabilities(&self) -> serde_json::Value {
        serde_json::to_value(self.router.rtp_capabilities()).unwrap_or_default()
    }

    async fn create_transport(&self) -> Result<TransportOptions, MediaError> {
        let udp_info = ListenInfo {
            protocol: Protocol::Udp,
            ip: self.listen_ip,
            announced_address: self.announced_ip.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        };

        let tcp_info = ListenInfo {
            protocol: Protocol::Tcp,
            ip: self.listen_ip,
            announced_address: self.announced_ip.clone(),
            port: None,
            port_range: None,
            flags: None,
            send_buffer_size: None,
            recv_buffer_size: None,
            expose_internal_ip: false,
        };

        let listen_infos = WebRtcTransportListenInfos::new(udp_info).insert(tcp_info);
        let mut transport_options = WebRtcTransportOptions::new(listen_infos);
        transport_options.enable_udp = true;
        transport_options.enable_tcp = true;
        transport_options.prefer_udp = true;

        let transport = self
            .router
            .create_webrtc_transport(transport_options)
            .await
            .map_err(|e| MediaError::Backend(format!("Failed to create WebRtcTransport: {}", e)))?;

        let options = TransportOptions {
            id: transport.id().to_string(),
            ice_parameters: serde_json::to_value(transport.ice_parameters()).unwrap_or_default(),
            ice_candidates: serde_json::to_value(transport.ice_candidates()).unwrap_or_default(),
            dtls_parameters: serde_json::to_value(transport.dtls_parameters()).unwrap_or_default(),
        };

        self.transports.insert(options.id.clone(), transport);
        debug!(transport_id = %options.id, "transport created");
        Ok(options)
    }

    async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: serde_json::Value,
    ) -> Result<(), MediaError> {
        let dtls_parameters: DtlsParameters = serde_json::from_value(dtls_parameters)
            .map_err(|e| MediaError::Backend(format!("Invalid dtls_parameters: {}", e)))?;

        let transport = self
            .transports
            .get(transport_id)
            .ok_or(MediaError::TransportNotFound)?;

        transport
            .connect(WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| MediaError::Backend(format!("Failed to connect transport: {}", e)))?;

        debug!(transport_id, "transport connected");
        Ok(())
    }

    async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        paused: bool,
    ) -> Result<NewProducer, MediaError> {
        let rtp_parameters: RtpParameters = serde_json::from_value(rtp_parameters)
            .map_err(|e| MediaError::Backend(format!("Invalid rtp_parameters: {}", e)))?;

        let transport = self
            .transports
            .get(transport_id)
            .ok_or(MediaError::TransportNotFound)?;

        let kind = match kind {
            MediaKind::Audio => mediasoup::prelude::MediaKind::Audio,
            MediaKind::Video => mediasoup::prelude::MediaKind::Video,
        };
        let mut producer_options = ProducerOptions::new(kind, rtp_parameters);
        producer_options.paused = paused;

        let producer = transport
            .produce(producer_options)
            .await
            .map_err(|e| MediaError::Backend(format!("Failed to produce: {}", e)))?;

        let producer_id = producer.id().to_string();

        // Both the worker-side close and the transport close funnel into one
        // oneshot; whichever fires first wins, the other finds the slot empty.
        let (closed_tx, closed_rx) = oneshot::channel();
        let closed_tx = Arc::new(Mutex::new(Some(closed_tx)));
        {
            let closed_tx = Arc::clone(&closed_tx);
            producer
                .on_close(move || {
                    if let Some(tx) = closed_tx.lock().unwrap().take() {
                        let _ = tx.send(());
                    }
                })
                .detach();
        }
        producer
            .on_transport_close(move || {
                if let Some(tx) = closed_tx.lock().unwrap().take() {
                    let _ = tx.send(());
                }
            })
            .detach();

        self.producers.insert(producer_id.clone(), producer);
        debug!(%producer_id, ?kind, "producer created");

        Ok(NewProducer {
            id: producer_id,
            closed: closed_rx,
        })
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        rtp_capabilities: serde_json::Value,
    ) -> Result<ConsumerSpec, MediaError> {
        let rtp_capabilities: RtpCapabilities = serde_json::from_value(rtp_capabilities)
            .map_err(|e| MediaError::Backend(format!("Invalid rtp_capabilities: {}", e)))?;
        let producer_id =
            ProducerId::from_str(producer_id).map_err(|_| MediaError::ProducerNotFound)?;

        if !self.router.can_consume(&producer_id, &rtp_capabilities) {
            return Err(MediaError::CannotConsume);
        }

        let transport = self
            .transports
            .get(transport_id)
            .ok_or(MediaError::TransportNotFound)?;

        // Consumers start paused; the client resumes once its pipeline is wired.
        let mut consumer_options = ConsumerOptions::new(producer_id, rtp_capabilities);
        consumer_options.paused = true;

        let consumer = transport
            .consume(consumer_options)
            .await
            .map_err(|e| MediaError::Backend(format!("Failed to consume: {}", e)))?;

        let spec = ConsumerSpec {
            id: consumer.id().to_string(),
            producer_id: consumer.producer_id().to_string(),
            kind: match consumer.kind() {
                mediasoup::prelude::MediaKind::Audio => MediaKind::Audio,
                mediasoup::prelude::MediaKind::Video => MediaKind::Video,
            },
            rtp_parameters: serde_json::to_value(consumer.rtp_parameters())
                .map_err(|e| MediaError::Backend(e.to_string()))?,
        };

        self.consumers.insert(spec.id.clone(), consumer);
        debug!(consumer_id = %spec.id, %producer_id, "consumer created");
        Ok(spec)
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &serde_json::Value) -> bool {
        let Ok(producer_id) = ProducerId::from_str(producer_id) else {
            return false;
        };
        let Ok(rtp_capabilities) =
            serde_json::from_value::<RtpCapabilities>(rtp_capabilities.clone())
        else {
            return false;
        };
        self.router.can_consume(&producer_id, &rtp_capabilities)
    }

    async fn pause_producer(&self, producer_id: &str) -> Result<(), MediaError> {
        let producer = self
            .producers
            .get(producer_id)
            .ok_or(MediaError::ProducerNotFound)?;
        producer
            .pause()
            .await
            .map_err(|e| MediaError::Backend(e.to_string()))
    }

    async fn resume_producer(&self, producer_id: &str) -> Result<(), MediaError> {
        let producer = self
            .producers
            .get(producer_id)
            .ok_or(MediaError::ProducerNotFound)?;
        producer
            .resume()
            .await
            .map_err(|e| MediaError::Backend(e.to_string()))
    }

    async fn close_producer(&self, producer_id: &str) -> Result<(), MediaError> {
        // Dropping the handle closes the mediasoup producer.
        self.producers
            .remove(producer_id)
            .map(|_| ())
            .ok_or(MediaError::ProducerNotFound)
    }

    async fn resume_consumer(&self, consumer_id: &str) -> Result<(), MediaError> {
        let consumer = self
            .consumers
            .get(consumer_id)
            .ok_or(MediaError::ConsumerNotFound)?;
        consumer
            .resume()
            .await
            .map_err(|e| MediaError::Backend(e.to_string()))
    }

    async fn restart_ice(&self, transport_id: &str) -> Result<serde_json::Value, MediaError> {
        let transport = self
            .transports
            .get(transport_id)
            .ok_or(MediaError::TransportNotFound)?;
        let ice_parameters = transport
            .restart_ice()
            .await
            .map_err(|e| MediaError::Backend(format!("Failed to restart ICE: {}", e)))?;
        serde_json::to_value(ice_parameters).map_err(|e| MediaError::Backend(e.to_string()))
    }

    async fn close_transport(&self, transport_id: &str) {
        if self.transports.remove(transport_id).is_some() {
            debug!(transport_id, "transport closed");
        }
    }
}

/// Standard SFU media codecs: opus audio + VP8/H264 video.
fn media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        // Opus audio
        RtpCodecCapability::Audio {
            mime_type: MimeTypeAudio::Opus,
            preferred_payload_type: Some(111),
            clock_rate: NonZero::new(48000).unwrap(),
            channels: NonZero::new(2).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![RtcpFeedback::TransportCc],
        },
        // VP8 video
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::Vp8,
            preferred_payload_type: Some(96),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::default(),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
        // H264 video
        RtpCodecCapability::Video {
            mime_type: MimeTypeVideo::H264,
            preferred_payload_type: Some(125),
            clock_rate: NonZero::new(90000).unwrap(),
            parameters: RtpCodecParametersParameters::from([
                ("level-asymmetry-allowed", 1_u32.into()),
                ("packetization-mode", 1_u32.into()),
                ("profile-level-id", "42e01f".into()),
            ]),
            rtcp_feedback: vec![
                RtcpFeedback::Nack,
                RtcpFeedback::NackPli,
                RtcpFeedback::CcmFir,
                RtcpFeedback::GoogRemb,
                RtcpFeedback::TransportCc,
            ],
        },
    ]
}
