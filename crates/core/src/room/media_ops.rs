use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::SignalError;
use crate::events::EventPayload;
use crate::media::{ConsumerSpec, MediaError, MediaKind, ProducerType, TransportOptions};
use crate::room::Room;
use crate::room::participant::{ConsumerInfo, ProducerInfo};
use crate::room::state::ProducerRef;

/// Which of a connection's two transports a request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSide {
    Producer,
    Consumer,
}

impl Room {
    pub async fn create_transport(
        &self,
        connection_id: &str,
        side: TransportSide,
    ) -> Result<TransportOptions, SignalError> {
        let mut st = self.state.lock().await;
        {
            let p = st
                .participants
                .get(connection_id)
                .ok_or(SignalError::NotInRoom)?;
            if side == TransportSide::Producer && p.is_observer() {
                return Err(SignalError::ObserverReadonly);
            }
        }

        let options = self.media().create_transport().await?;

        let p = st
            .participants
            .get_mut(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        let replaced = match side {
            TransportSide::Producer => p.attach_producer_transport(options.id.clone())?,
            TransportSide::Consumer => p.attach_consumer_transport(options.id.clone()),
        };
        st.touch();
        drop(st);

        if let Some(old) = replaced {
            self.media().close_transport(&old).await;
        }
        debug!(connection_id, transport_id = %options.id, ?side, "transport created");
        Ok(options)
    }

    pub async fn connect_transport(
        &self,
        connection_id: &str,
        transport_id: &str,
        dtls_parameters: serde_json::Value,
    ) -> Result<(), SignalError> {
        let st = self.state.lock().await;
        let p = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        let owns = p.producer_transport_id.as_deref() == Some(transport_id)
            || p.consumer_transport_id.as_deref() == Some(transport_id);
        if !owns {
            return Err(SignalError::TransportNotFound);
        }
        drop(st);

        self.media()
            .connect_transport(transport_id, dtls_parameters)
            .await?;
        Ok(())
    }

    pub async fn restart_ice(
        &self,
        connection_id: &str,
        side: TransportSide,
    ) -> Result<serde_json::Value, SignalError> {
        let st = self.state.lock().await;
        let p = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        let transport_id = match side {
            TransportSide::Producer => p.producer_transport_id.clone(),
            TransportSide::Consumer => p.consumer_transport_id.clone(),
        }
        .ok_or(SignalError::TransportNotFound)?;
        drop(st);

        Ok(self.media().restart_ice(&transport_id).await?)
    }

    /// Creates a producer, registers it, and announces it to the channel
    /// (excluding the owner). The close observer is subscribed exactly once.
    pub async fn produce(
        self: &Arc<Self>,
        connection_id: &str,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: serde_json::Value,
        producer_type: ProducerType,
        paused: bool,
    ) -> Result<String, SignalError> {
        let mut st = self.state.lock().await;
        let p = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if p.is_observer() {
            return Err(SignalError::ObserverReadonly);
        }
        if p.is_ghost {
            return Err(SignalError::GhostNoMedia);
        }
        if p.producer_transport_id.as_deref() != Some(transport_id) {
            return Err(SignalError::TransportNotFound);
        }
        if producer_type == ProducerType::Screen
            && kind == MediaKind::Video
            && st.screen_share_producer_id.is_some()
        {
            return Err(SignalError::ScreenBusy);
        }

        let new_producer = self
            .media()
            .produce(transport_id, kind, rtp_parameters, paused)
            .await?;
        let producer_id = new_producer.id;

        let p = st
            .participants
            .get_mut(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        p.add_producer(ProducerInfo {
            id: producer_id.clone(),
            kind,
            producer_type,
            paused,
        });
        if kind == MediaKind::Audio && producer_type == ProducerType::Webcam {
            p.is_muted = paused;
        }
        if kind == MediaKind::Video && producer_type == ProducerType::Webcam {
            p.is_camera_off = paused;
        }

        st.producer_index.insert(
            producer_id.clone(),
            ProducerRef {
                owner_connection_id: connection_id.to_string(),
                kind,
                producer_type,
                paused,
            },
        );
        if producer_type == ProducerType::Screen && kind == MediaKind::Video {
            st.screen_share_producer_id = Some(producer_id.clone());
        }
        st.touch();

        info!(
            room_id = %self.room_id(),
            connection_id,
            %producer_id,
            ?kind,
            ?producer_type,
            "producer created"
        );

        if let Some(descriptor) = st.describe_producer(&producer_id) {
            self.emit(
                &st,
                EventPayload::NewProducer(descriptor),
                Some(connection_id),
            );
        }
        self.refresh_feed(&mut st);
        drop(st);

        // Forward the media worker's close notification into the room; the
        // index removal in handle_producer_closed makes the close idempotent
        // no matter how many paths report it.
        let weak = self.downgrade();
        let watched_id = producer_id.clone();
        tokio::spawn(async move {
            if new_producer.closed.await.is_ok() {
                if let Some(room) = weak.upgrade() {
                    room.handle_producer_closed(&watched_id).await;
                }
            }
        });

        Ok(producer_id)
    }

    /// Client-requested close. Also the target of `closeRemoteProducer`.
    pub async fn close_producer(
        self: &Arc<Self>,
        connection_id: &str,
        producer_id: &str,
    ) -> Result<(), SignalError> {
        {
            let st = self.state.lock().await;
            let p = st
                .participants
                .get(connection_id)
                .ok_or(SignalError::NotInRoom)?;
            if !p.owns_producer(producer_id) {
                return Err(SignalError::ProducerNotFound);
            }
        }
        if let Err(e) = self.media().close_producer(producer_id).await {
            debug!(%producer_id, %e, "media close_producer");
        }
        self.handle_producer_closed(producer_id).await;
        Ok(())
    }

    /// Host-only variant closing any producer in the room.
    pub async fn close_remote_producer(
        self: &Arc<Self>,
        connection_id: &str,
        producer_id: &str,
    ) -> Result<(), SignalError> {
        {
            let st = self.state.lock().await;
            Self::require_host(&st, connection_id)?;
            if !st.producer_index.contains_key(producer_id) {
                return Err(SignalError::ProducerNotFound);
            }
        }
        if let Err(e) = self.media().close_producer(producer_id).await {
            debug!(%producer_id, %e, "media close_producer");
        }
        self.handle_producer_closed(producer_id).await;
        Ok(())
    }

    /// The single sink for every producer-close path (client request, host
    /// request, owner teardown, media worker observer). Removing the index
    /// entry is the dedupe: `producerClosed` is broadcast exactly once.
    pub(crate) async fn handle_producer_closed(self: &Arc<Self>, producer_id: &str) {
        let mut st = self.state.lock().await;
        let Some(entry) = st.producer_index.remove(producer_id) else {
            return;
        };
        if st.screen_share_producer_id.as_deref() == Some(producer_id) {
            st.screen_share_producer_id = None;
        }

        let owner_connection_id = entry.owner_connection_id.clone();
        let mut owner_user_id = String::new();
        if let Some(owner) = st.participants.get_mut(&owner_connection_id) {
            owner_user_id = owner.user_id.clone();
            if let Some(info) = owner.remove_producer_by_id(producer_id) {
                // A closed producer collapses to muted/camera-off.
                if info.kind == MediaKind::Audio && info.producer_type == ProducerType::Webcam {
                    owner.is_muted = true;
                }
                if info.kind == MediaKind::Video && info.producer_type == ProducerType::Webcam {
                    owner.is_camera_off = true;
                }
            }
        }
        st.touch();

        debug!(room_id = %self.room_id(), %producer_id, "producer closed");
        self.emit(
            &st,
            EventPayload::ProducerClosed {
                producer_id: producer_id.to_string(),
                connection_id: owner_connection_id,
                user_id: owner_user_id,
            },
            None,
        );
        self.refresh_feed(&mut st);
    }

    pub async fn consume(
        &self,
        connection_id: &str,
        producer_id: &str,
        rtp_capabilities: serde_json::Value,
    ) -> Result<ConsumerSpec, SignalError> {
        let mut st = self.state.lock().await;
        let p = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        let transport_id = p
            .consumer_transport_id
            .clone()
            .ok_or(SignalError::TransportNotFound)?;

        let entry = st
            .producer_index
            .get(producer_id)
            .ok_or(SignalError::ProducerNotFound)?;
        if entry.owner_connection_id == connection_id {
            return Err(SignalError::CannotConsume);
        }
        // One consumer per remote connection per producer.
        if p.is_consuming(producer_id) {
            return Err(SignalError::CannotConsume);
        }
        // Observers only consume the selected feed.
        if p.is_observer()
            && st.webinar.feed_speaker.as_deref() != Some(entry.owner_connection_id.as_str())
        {
            return Err(SignalError::CannotConsume);
        }

        let spec = self
            .media()
            .consume(&transport_id, producer_id, rtp_capabilities)
            .await
            .map_err(|e| match e {
                MediaError::CannotConsume => SignalError::CannotConsume,
                other => other.into(),
            })?;

        let p = st
            .participants
            .get_mut(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        p.consumers.insert(
            spec.id.clone(),
            ConsumerInfo {
                id: spec.id.clone(),
                producer_id: spec.producer_id.clone(),
                kind: spec.kind,
            },
        );
        st.touch();
        debug!(connection_id, consumer_id = %spec.id, %producer_id, "consumer created");
        Ok(spec)
    }

    pub async fn resume_consumer(
        &self,
        connection_id: &str,
        consumer_id: &str,
    ) -> Result<(), SignalError> {
        let st = self.state.lock().await;
        let p = st
            .participants
            .get(connection_id)
            .ok_or(SignalError::NotInRoom)?;
        if !p.consumers.contains_key(consumer_id) {
            return Err(SignalError::ConsumerNotFound);
        }
        drop(st);
        self.media().resume_consumer(consumer_id).await?;
        Ok(())
    }

    pub async fn toggle_mute(
        &self,
        connection_id: &str,
        producer_id: &str,
        paused: bool,
    ) -> Result<(), SignalError> {
        self.toggle_producer(connection_id, producer_id, MediaKind::Audio, paused)
            .await
    }

    pub async fn toggle_camera(
        &self,
        connection_id: &str,
        producer_id: &str,
        paused: bool,
    ) -> Result<(), SignalError> {
        self.toggle_producer(connection_id, producer_id, MediaKind::Video, paused)
            .await
    }

    /// Pauses or resumes a webcam producer. The broadcast state is derived
    /// from the post-call state, not the request: a producer the media
    /// worker no longer knows collapses to paused.
    async fn toggle_producer(
        &self,
        connection_id: &str,
        producer_id: &str,
        kind: MediaKind,
        paused: bool,
    ) -> Result<(), SignalError> {
        let mut st = self.state.lock().await;
        {
            let p = st
                .participants
                .get(connection_id)
                .ok_or(SignalError::NotInRoom)?;
            let info = p
                .producers
                .get(producer_id)
                .ok_or(SignalError::ProducerNotFound)?;
            if info.kind != kind {
                return Err(SignalError::ProducerNotFound);
            }
        }

        let result = if paused {
            self.media().pause_producer(producer_id).await
        } else {
            self.media().resume_producer(producer_id).await
        };
        let effective_paused = match result {
            Ok(()) => paused,
            Err(MediaError::ProducerNotFound) => {
                warn!(%producer_id, "toggle on closed producer");
                true
            }
            Err(e) => return Err(e.into()),
        };

        let (user_id, payload) = {
            let p = st
                .participants
                .get_mut(connection_id)
                .ok_or(SignalError::NotInRoom)?;
            if let Some(info) = p.producers.get_mut(producer_id) {
                info.paused = effective_paused;
            }
            match kind {
                MediaKind::Audio => {
                    p.is_muted = effective_paused;
                }
                MediaKind::Video => {
                    p.is_camera_off = effective_paused;
                }
            }
            (p.user_id.clone(), effective_paused)
        };
        if let Some(entry) = st.producer_index.get_mut(producer_id) {
            entry.paused = effective_paused;
        }
        st.touch();

        let event = match kind {
            MediaKind::Audio => EventPayload::ParticipantMuted {
                connection_id: connection_id.to_string(),
                user_id,
                paused: payload,
            },
            MediaKind::Video => EventPayload::ParticipantCameraOff {
                connection_id: connection_id.to_string(),
                user_id,
                paused: payload,
            },
        };
        self.emit(&st, event, Some(connection_id));
        Ok(())
    }
}
