use std::collections::VecDeque;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Signaling client: correlates request acks by id and buffers broadcast
/// notifications that arrive in between.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    buffered_events: VecDeque<Value>,
}

impl WsClient {
    pub async fn connect(ws_url: &str, token: &str) -> Self {
        let url = format!("{ws_url}?token={token}");
        let (stream, _) = connect_async(&url).await.expect("WebSocket connect");
        Self {
            stream,
            next_id: 1,
            buffered_events: VecDeque::new(),
        }
    }

    /// Attempts to connect; returns the HTTP status on rejection.
    pub async fn try_connect(ws_url: &str, token: &str) -> Result<Self, u16> {
        let url = format!("{ws_url}?token={token}");
        match connect_async(&url).await {
            Ok((stream, _)) => Ok(Self {
                stream,
                next_id: 1,
                buffered_events: VecDeque::new(),
            }),
            Err(tokio_tungstenite::tungstenite::Error::Http(resp)) => Err(resp.status().as_u16()),
            Err(e) => panic!("unexpected connect error: {e}"),
        }
    }

    /// Sends one request and waits for its ack; broadcast frames that arrive
    /// first are buffered for later assertions.
    pub async fn request(&mut self, kind: &str, data: Value) -> Result<Value, Value> {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({ "id": id, "type": kind, "data": data }).to_string();
        self.stream
            .send(Message::text(frame))
            .await
            .expect("send request");

        loop {
            let value = self.read_frame().await.expect("ack before socket close");
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                if value.get("ok").and_then(Value::as_bool) == Some(true) {
                    return Ok(value["data"].clone());
                }
                return Err(value["error"].clone());
            }
            if value.get("type").is_some() {
                self.buffered_events.push_back(value);
            }
        }
    }

    pub async fn request_ok(&mut self, kind: &str, data: Value) -> Value {
        match self.request(kind, data).await {
            Ok(data) => data,
            Err(err) => panic!("request {kind} failed: {err}"),
        }
    }

    /// Expects a failure; returns the `{code, message}` error object.
    pub async fn request_err(&mut self, kind: &str, data: Value) -> Value {
        match self.request(kind, data).await {
            Ok(data) => panic!("request {kind} unexpectedly succeeded: {data}"),
            Err(err) => err,
        }
    }

    pub async fn join(&mut self, room_id: &str) -> Value {
        self.request_ok("joinRoom", json!({ "roomId": room_id }))
            .await
    }

    /// Next broadcast notification, buffered or fresh.
    pub async fn next_event(&mut self) -> Value {
        if let Some(event) = self.buffered_events.pop_front() {
            return event;
        }
        loop {
            let value = tokio::time::timeout(EVENT_TIMEOUT, self.read_frame())
                .await
                .expect("timed out waiting for event")
                .expect("socket closed while waiting for event");
            if value.get("type").is_some() {
                return value;
            }
        }
    }

    /// Skips ahead to the next event of the given type.
    pub async fn event_of(&mut self, event_type: &str) -> Value {
        for _ in 0..50 {
            let event = self.next_event().await;
            if event["type"] == event_type {
                return event;
            }
        }
        panic!("event {event_type} never arrived");
    }

    /// Asserts that no event of the given type arrives within `window`.
    /// Unrelated events are kept buffered.
    pub async fn expect_quiet(&mut self, event_type: &str, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        for event in &self.buffered_events {
            assert_ne!(event["type"], event_type, "unexpected {event_type}: {event}");
        }
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match tokio::time::timeout(remaining, self.read_frame()).await {
                Ok(Some(value)) => {
                    assert_ne!(
                        value["type"], event_type,
                        "unexpected {event_type}: {value}"
                    );
                    if value.get("type").is_some() {
                        self.buffered_events.push_back(value);
                    }
                }
                Ok(None) => return,
                Err(_) => return,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }

    async fn read_frame(&mut self) -> Option<Value> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return serde_json::from_str(text.as_str()).ok();
                }
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}
