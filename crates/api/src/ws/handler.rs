use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::RequestEnvelope;
use super::session::Session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    // Verify the join token before accepting the WebSocket.
    let identity = match state.verifier.verify(&params.token) {
        Ok(identity) => identity,
        Err(e) => {
            debug!(%e, "handshake rejected");
            return Response::builder()
                .status(401)
                .body("UNAUTHENTICATED".into())
                .unwrap();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: huddle_core::auth::Identity) {
    let connection_id = Uuid::new_v4().to_string();
    info!(user_id = %identity.user_id, %connection_id, "WebSocket connected");

    let (sender, mut receiver) = socket.split();
    let sender = Arc::new(Mutex::new(sender));

    // Outbound events flow through an unbounded per-connection queue so
    // room emission never waits on this socket.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<huddle_core::events::EventFrame>();
    state.bus.add(connection_id.clone(), event_tx);

    let pump_sender = Arc::clone(&sender);
    let pump = tokio::spawn(async move {
        while let Some(frame) = event_rx.recv().await {
            let text = frame.to_wire().to_string();
            let mut guard = pump_sender.lock().await;
            if guard.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(state.clone(), identity.clone(), connection_id.clone());

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let envelope: RequestEnvelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!(%connection_id, %e, "unparseable frame dropped");
                        continue;
                    }
                };
                let ack = session.handle(envelope).await;
                let mut guard = sender.lock().await;
                if guard.send(Message::text(ack.to_string())).await.is_err() {
                    break;
                }
            }
            Ok(Message::Ping(data)) => {
                let mut guard = sender.lock().await;
                let _ = guard.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!(%connection_id, %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    state.bus.remove(&connection_id);
    session.connection_closed().await;
    pump.abort();

    info!(user_id = %identity.user_id, %connection_id, "WebSocket disconnected");
}
