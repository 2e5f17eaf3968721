use std::sync::Arc;
use std::time::Duration;

use huddle_core::SignalError;
use huddle_core::auth::Identity;
use huddle_core::room::Room;
use huddle_core::room::admission::{JoinOutcome, JoinRequest};
use huddle_core::room::media_ops::TransportSide;
use serde_json::{Value, json};
use tracing::debug;

use super::protocol::{self, RequestEnvelope, TransportName};
use crate::state::AppState;

/// Where a connection sits in its lifecycle. Authentication happened at the
/// WebSocket upgrade, so a session is born `Authenticated`.
enum Phase {
    Authenticated,
    Waiting(Arc<Room>),
    Joined(Arc<Room>),
}

/// Drives one connection from admission to teardown; every request is
/// validated against the current phase before it reaches the room.
pub struct Session {
    state: AppState,
    identity: Identity,
    connection_id: String,
    phase: Phase,
}

impl Session {
    pub fn new(state: AppState, identity: Identity, connection_id: String) -> Self {
        Self {
            state,
            identity,
            connection_id,
            phase: Phase::Authenticated,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Handles one request and produces its ack frame. Every request is
    /// bounded by the configured server-side timeout.
    pub async fn handle(&mut self, envelope: RequestEnvelope) -> Value {
        let id = envelope.id;
        let timeout = Duration::from_millis(self.state.settings.lifecycle.request_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.dispatch(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(SignalError::Timeout),
        };
        match result {
            Ok(data) => protocol::ack_ok(id, data),
            Err(err) => {
                debug!(connection_id = %self.connection_id, code = err.code(), "request failed");
                protocol::ack_err(id, &err)
            }
        }
    }

    async fn dispatch(&mut self, envelope: RequestEnvelope) -> Result<Value, SignalError> {
        let data = envelope.data;
        match envelope.kind.as_str() {
            "ping" => Ok(json!({ "pong": true })),
            "joinRoom" => self.join_room(data).await,
            "getRooms" => {
                let rooms = self.state.registry.list(&self.identity).await;
                Ok(json!({ "rooms": rooms }))
            }
            "leaveRoom" => {
                let room = self.joined_room()?;
                room.leave(&self.connection_id).await?;
                self.phase = Phase::Authenticated;
                Ok(json!({ "success": true }))
            }
            kind => {
                let room = self.joined_room()?;
                self.dispatch_in_room(&room, kind, data).await
            }
        }
    }

    async fn dispatch_in_room(
        &mut self,
        room: &Arc<Room>,
        kind: &str,
        data: Value,
    ) -> Result<Value, SignalError> {
        let conn = self.connection_id.clone();
        match kind {
            "createProducerTransport" => {
                let options = room.create_transport(&conn, TransportSide::Producer).await?;
                Ok(serde_json::to_value(options).unwrap_or_default())
            }
            "createConsumerTransport" => {
                let options = room.create_transport(&conn, TransportSide::Consumer).await?;
                Ok(serde_json::to_value(options).unwrap_or_default())
            }
            "connectProducerTransport" | "connectConsumerTransport" => {
                let args: protocol::ConnectTransportArgs = protocol::parse_args(data)?;
                room.connect_transport(&conn, &args.transport_id, args.dtls_parameters)
                    .await?;
                Ok(json!({ "success": true }))
            }
            "restartIce" => {
                let args: protocol::RestartIceArgs = protocol::parse_args(data)?;
                let side = match args.transport {
                    TransportName::Producer => TransportSide::Producer,
                    TransportName::Consumer => TransportSide::Consumer,
                };
                let ice_parameters = room.restart_ice(&conn, side).await?;
                Ok(json!({ "iceParameters": ice_parameters }))
            }
            "produce" => {
                let args: protocol::ProduceArgs = protocol::parse_args(data)?;
                let producer_id = room
                    .produce(
                        &conn,
                        &args.transport_id,
                        args.kind,
                        args.rtp_parameters,
                        args.app_data.producer_type,
                        args.app_data.paused,
                    )
                    .await?;
                Ok(json!({ "producerId": producer_id }))
            }
            "consume" => {
                let args: protocol::ConsumeArgs = protocol::parse_args(data)?;
                let spec = room
                    .consume(&conn, &args.producer_id, args.rtp_capabilities)
                    .await?;
                Ok(serde_json::to_value(spec).unwrap_or_default())
            }
            "resumeConsumer" => {
                let args: protocol::ResumeConsumerArgs = protocol::parse_args(data)?;
                room.resume_consumer(&conn, &args.consumer_id).await?;
                Ok(json!({ "success": true }))
            }
            "toggleMute" => {
                let args: protocol::ToggleProducerArgs = protocol::parse_args(data)?;
                room.toggle_mute(&conn, &args.producer_id, args.paused).await?;
                Ok(json!({ "success": true }))
            }
            "toggleCamera" => {
                let args: protocol::ToggleProducerArgs = protocol::parse_args(data)?;
                room.toggle_camera(&conn, &args.producer_id, args.paused)
                    .await?;
                Ok(json!({ "success": true }))
            }
            "closeProducer" => {
                let args: protocol::CloseProducerArgs = protocol::parse_args(data)?;
                room.close_producer(&conn, &args.producer_id).await?;
                Ok(json!({ "success": true }))
            }
            "setHandRaised" => {
                let args: protocol::HandRaisedArgs = protocol::parse_args(data)?;
                room.set_hand_raised(&conn, args.raised).await?;
                Ok(json!({ "success": true }))
            }
            "sendChat" => {
                let args: protocol::ChatArgs = protocol::parse_args(data)?;
                let message = room.send_chat(&conn, args.content).await?;
                Ok(json!({ "success": true, "message": message }))
            }
            "sendReaction" => {
                let args: protocol::ReactionArgs = protocol::parse_args(data)?;
                room.send_reaction(&conn, args.emoji).await?;
                Ok(json!({ "success": true }))
            }
            "updateDisplayName" => {
                let args: protocol::DisplayNameArgs = protocol::parse_args(data)?;
                room.update_display_name(&conn, args.display_name).await?;
                Ok(json!({ "success": true }))
            }
            "lockRoom" => {
                let args: protocol::FlagArgs = protocol::parse_args(data)?;
                room.lock_room(&conn, args.flag).await?;
                Ok(json!({ "success": true }))
            }
            "setNoGuests" => {
                let args: protocol::FlagArgs = protocol::parse_args(data)?;
                room.set_no_guests(&conn, args.flag).await?;
                Ok(json!({ "success": true }))
            }
            "lockChat" => {
                let args: protocol::FlagArgs = protocol::parse_args(data)?;
                room.lock_chat(&conn, args.flag).await?;
                Ok(json!({ "success": true }))
            }
            "setTtsDisabled" => {
                let args: protocol::FlagArgs = protocol::parse_args(data)?;
                room.set_tts_disabled(&conn, args.flag).await?;
                Ok(json!({ "success": true }))
            }
            "setVideoQuality" => {
                let args: protocol::VideoQualityArgs = protocol::parse_args(data)?;
                room.set_video_quality(&conn, args.quality).await?;
                Ok(json!({ "success": true }))
            }
            "admitUser" => {
                let args: protocol::UserArgs = protocol::parse_args(data)?;
                room.admit_user(&conn, &args.user_id).await?;
                Ok(json!({ "success": true }))
            }
            "rejectUser" => {
                let args: protocol::UserArgs = protocol::parse_args(data)?;
                room.reject_user(&conn, &args.user_id).await?;
                Ok(json!({ "success": true }))
            }
            "kickUser" => {
                let args: protocol::UserArgs = protocol::parse_args(data)?;
                room.kick_user(&conn, &args.user_id).await?;
                Ok(json!({ "success": true }))
            }
            "redirectUser" => {
                let args: protocol::RedirectArgs = protocol::parse_args(data)?;
                room.redirect_user(&conn, &args.user_id, args.url).await?;
                Ok(json!({ "success": true }))
            }
            "closeRemoteProducer" => {
                let args: protocol::CloseProducerArgs = protocol::parse_args(data)?;
                room.close_remote_producer(&conn, &args.producer_id).await?;
                Ok(json!({ "success": true }))
            }
            "getProducers" => {
                let producers = room.get_producers(&conn).await?;
                Ok(json!({ "producers": producers }))
            }
            "meeting:getConfig" => room.meeting_config(&conn).await,
            "meeting:updateConfig" => {
                let args: protocol::MeetingConfigArgs = protocol::parse_args(data)?;
                room.update_meeting_config(&conn, args.invite_code).await?;
                Ok(json!({ "success": true }))
            }
            "webinar:getConfig" => room.webinar_config(&conn).await,
            "webinar:updateConfig" => {
                let update: huddle_core::room::webinar::WebinarUpdate =
                    protocol::parse_args(data)?;
                room.update_webinar_config(&conn, update).await?;
                Ok(json!({ "success": true }))
            }
            "webinar:generateLink" => room.webinar_generate_link(&conn).await,
            "webinar:rotateLink" => room.webinar_rotate_link(&conn).await,
            "apps:open" => {
                let args: protocol::AppIdArgs = protocol::parse_args(data)?;
                room.open_app(&conn, &args.app_id).await?;
                Ok(json!({ "success": true }))
            }
            "apps:close" => {
                room.close_app(&conn).await?;
                Ok(json!({ "success": true }))
            }
            "apps:lock" => {
                let args: protocol::AppsLockArgs = protocol::parse_args(data)?;
                room.lock_apps(&conn, args.locked).await?;
                Ok(json!({ "success": true }))
            }
            "apps:yjs:sync" => {
                let args: protocol::AppIdArgs = protocol::parse_args(data)?;
                room.sync_app(&conn, &args.app_id).await
            }
            "apps:yjs:update" => {
                let args: protocol::AppPayloadArgs = protocol::parse_args(data)?;
                room.apply_app_update(&conn, &args.app_id, &args.update)
                    .await?;
                Ok(json!({ "success": true }))
            }
            "apps:awareness" => {
                let args: protocol::AppPayloadArgs = protocol::parse_args(data)?;
                room.set_app_awareness(&conn, &args.app_id, &args.update)
                    .await?;
                Ok(json!({ "success": true }))
            }
            unknown => Err(SignalError::BadRequest(format!(
                "unknown request: {unknown}"
            ))),
        }
    }

    async fn join_room(&mut self, data: Value) -> Result<Value, SignalError> {
        match self.phase {
            Phase::Authenticated | Phase::Waiting(_) => {}
            Phase::Joined(_) => return Err(SignalError::NotReady),
        }

        let args: protocol::JoinRoomArgs = protocol::parse_args(data)?;
        let room = self
            .state
            .registry
            .get_or_create(&args.room_id, &self.identity)
            .await?;

        let request = JoinRequest {
            display_name: args.display_name,
            ghost: args.ghost,
            webinar_invite_code: args.webinar_invite_code,
            meeting_invite_code: args.meeting_invite_code,
        };

        match room.join(&self.identity, &self.connection_id, request).await? {
            JoinOutcome::Joined(joined) => {
                self.phase = Phase::Joined(room);
                let mut ack = serde_json::to_value(&*joined).unwrap_or_default();
                if let (Some(ice), Some(obj)) =
                    (self.state.ice_servers.clone(), ack.as_object_mut())
                {
                    obj.insert("iceServers".to_string(), ice);
                }
                Ok(ack)
            }
            JoinOutcome::Waiting => {
                let room_id = room.room_id().to_string();
                self.phase = Phase::Waiting(room);
                Ok(json!({ "status": "waiting", "roomId": room_id }))
            }
        }
    }

    fn joined_room(&self) -> Result<Arc<Room>, SignalError> {
        match &self.phase {
            Phase::Joined(room) => Ok(Arc::clone(room)),
            _ => Err(SignalError::NotReady),
        }
    }

    /// Socket gone: joined sessions enter the disconnect grace window,
    /// queued sessions drop out of the waiting room.
    pub async fn connection_closed(&mut self) {
        match &self.phase {
            Phase::Joined(room) => {
                room.connection_lost(&self.connection_id).await;
            }
            Phase::Waiting(room) => {
                room.pending_disconnected(&self.connection_id).await;
            }
            Phase::Authenticated => {}
        }
    }
}
