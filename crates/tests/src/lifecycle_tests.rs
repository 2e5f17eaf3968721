use std::time::Duration;

use serde_json::json;

use crate::fixtures::test_app::TestApp;
use crate::fixtures::ws_client::WsClient;

async fn produce_audio(client: &mut WsClient) -> String {
    let t = client
        .request_ok("createProducerTransport", json!({}))
        .await;
    let transport = t["id"].as_str().unwrap().to_string();
    client
        .request_ok(
            "connectProducerTransport",
            json!({ "transportId": transport, "dtlsParameters": {} }),
        )
        .await;
    let ack = client
        .request_ok(
            "produce",
            json!({
                "transportId": transport,
                "kind": "audio",
                "rtpParameters": { "codecs": [] },
            }),
        )
        .await;
    ack["producerId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn reconnect_within_grace_preserves_media() {
    let app = TestApp::spawn().await;
    let token = app.user_token("bob", "s-bob");

    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("resilient").await;
    let mut bob = app.connect(&token).await;
    bob.join("resilient").await;
    let producer_id = produce_audio(&mut bob).await;
    alice.event_of("newProducer").await;

    bob.close().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut bob = app.connect(&token).await;
    let ack = bob.join("resilient").await;
    assert_eq!(ack["status"], "joined");

    // Peers saw neither a departure nor a producer close.
    alice
        .expect_quiet("producerClosed", Duration::from_millis(500))
        .await;
    alice
        .expect_quiet("userLeft", Duration::from_millis(100))
        .await;

    // The producer is still live and attributed to Bob's new connection.
    let listed = alice.request_ok("getProducers", json!({})).await;
    let producers = listed["producers"].as_array().unwrap();
    assert_eq!(producers.len(), 1);
    assert_eq!(producers[0]["producerId"], producer_id.as_str());
    assert!(app.media.single().has_producer(&producer_id));
}

#[tokio::test]
async fn grace_expiry_runs_the_full_teardown() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("ephemeral").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("ephemeral").await;
    let producer_id = produce_audio(&mut bob).await;
    alice.event_of("newProducer").await;

    bob.close().await;

    // Grace is 300ms in tests; producers close, then the user leaves.
    let closed = alice.event_of("producerClosed").await;
    assert_eq!(closed["data"]["producerId"], producer_id.as_str());
    let left = alice.next_event().await;
    assert_eq!(left["type"], "userLeft");
    assert_eq!(left["data"]["userId"], "bob");
    assert!(!app.media.single().has_producer(&producer_id));
}

#[tokio::test]
async fn empty_rooms_are_reaped_after_ttl() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("fleeting").await;
    assert_eq!(app.state.registry.room_count(), 1);

    alice.request_ok("leaveRoom", json!({})).await;

    // TTL 500ms + reaper interval 50ms.
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(app.state.registry.room_count(), 0);
    assert!(app.state.registry.get("fleeting").is_none());
}

#[tokio::test]
async fn occupied_rooms_survive_the_reaper() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("durable").await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(app.state.registry.room_count(), 1);

    // The member can still operate in it.
    alice
        .request_ok("sendChat", json!({ "content": "still here" }))
        .await;
}

#[tokio::test]
async fn drain_refuses_new_joins_but_keeps_rooms_working() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("stable").await;

    app.state.registry.set_draining(true);

    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    let err = bob
        .request_err("joinRoom", json!({ "roomId": "stable" }))
        .await;
    assert_eq!(err["code"], "SERVER_DRAINING");

    // Existing members are unaffected.
    alice
        .request_ok("sendChat", json!({ "content": "carrying on" }))
        .await;
}

#[tokio::test]
async fn drain_announces_restart_to_every_channel() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("room-a").await;
    let mut bob = app.connect(&app.host_token("bob", "s-bob")).await;
    bob.join("room-b").await;

    huddle_core::lifecycle::drain(&app.state.registry).await;

    alice.event_of("serverRestarting").await;
    bob.event_of("serverRestarting").await;
}

#[tokio::test]
async fn leave_room_returns_session_to_lobby() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("revolving-door").await;

    alice.request_ok("leaveRoom", json!({})).await;

    // Requests that need a room now fail fast.
    let err = alice
        .request_err("sendChat", json!({ "content": "hi" }))
        .await;
    assert_eq!(err["code"], "NOT_READY");

    // And the session may join again.
    let ack = alice.join("revolving-door").await;
    assert_eq!(ack["status"], "joined");
}
