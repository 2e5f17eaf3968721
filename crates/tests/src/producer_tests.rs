use std::time::Duration;

use serde_json::json;

use crate::fixtures::test_app::TestApp;
use crate::fixtures::ws_client::WsClient;

async fn producer_transport(client: &mut WsClient) -> String {
    let t = client
        .request_ok("createProducerTransport", json!({}))
        .await;
    let id = t["id"].as_str().unwrap().to_string();
    client
        .request_ok(
            "connectProducerTransport",
            json!({ "transportId": id, "dtlsParameters": {} }),
        )
        .await;
    id
}

async fn consumer_transport(client: &mut WsClient) -> String {
    let t = client
        .request_ok("createConsumerTransport", json!({}))
        .await;
    let id = t["id"].as_str().unwrap().to_string();
    client
        .request_ok(
            "connectConsumerTransport",
            json!({ "transportId": id, "dtlsParameters": {} }),
        )
        .await;
    id
}

async fn produce(client: &mut WsClient, transport: &str, kind: &str, source: &str) -> String {
    let ack = client
        .request_ok(
            "produce",
            json!({
                "transportId": transport,
                "kind": kind,
                "rtpParameters": { "codecs": [] },
                "appData": { "type": source },
            }),
        )
        .await;
    ack["producerId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn produce_fans_out_and_peers_consume() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("media").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("media").await;

    let transport = producer_transport(&mut alice).await;
    let producer_id = produce(&mut alice, &transport, "audio", "webcam").await;

    let event = bob.event_of("newProducer").await;
    assert_eq!(event["data"]["producerId"], producer_id.as_str());
    assert_eq!(event["data"]["userId"], "alice");
    assert_eq!(event["data"]["kind"], "audio");
    assert_eq!(event["data"]["type"], "webcam");

    // Consuming requires a connected consumer transport.
    let err = bob
        .request_err(
            "consume",
            json!({ "producerId": producer_id, "rtpCapabilities": {} }),
        )
        .await;
    assert_eq!(err["code"], "TRANSPORT_NOT_FOUND");

    consumer_transport(&mut bob).await;
    let spec = bob
        .request_ok(
            "consume",
            json!({ "producerId": producer_id, "rtpCapabilities": {} }),
        )
        .await;
    assert_eq!(spec["producerId"], producer_id.as_str());
    assert_eq!(spec["kind"], "audio");
    let consumer_id = spec["id"].as_str().unwrap().to_string();

    bob.request_ok("resumeConsumer", json!({ "consumerId": consumer_id }))
        .await;

    // One consumer per remote connection per producer.
    let err = bob
        .request_err(
            "consume",
            json!({ "producerId": producer_id, "rtpCapabilities": {} }),
        )
        .await;
    assert_eq!(err["code"], "CANNOT_CONSUME");

    // Nobody consumes their own producer.
    consumer_transport(&mut alice).await;
    let err = alice
        .request_err(
            "consume",
            json!({ "producerId": producer_id, "rtpCapabilities": {} }),
        )
        .await;
    assert_eq!(err["code"], "CANNOT_CONSUME");
}

#[tokio::test]
async fn screen_share_is_a_singleton() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("screens").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("screens").await;

    let alice_transport = producer_transport(&mut alice).await;
    let p1 = produce(&mut alice, &alice_transport, "video", "screen").await;

    let bob_transport = producer_transport(&mut bob).await;
    let err = bob
        .request_err(
            "produce",
            json!({
                "transportId": bob_transport,
                "kind": "video",
                "rtpParameters": { "codecs": [] },
                "appData": { "type": "screen" },
            }),
        )
        .await;
    assert_eq!(err["code"], "SCREEN_BUSY");

    alice
        .request_ok("closeProducer", json!({ "producerId": p1 }))
        .await;
    let closed = bob.event_of("producerClosed").await;
    assert_eq!(closed["data"]["producerId"], p1.as_str());

    // The slot is free again.
    let p2 = produce(&mut bob, &bob_transport, "video", "screen").await;
    assert_ne!(p1, p2);
}

#[tokio::test]
async fn producer_closed_is_broadcast_exactly_once() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("closing").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("closing").await;

    let transport = producer_transport(&mut alice).await;
    let producer_id = produce(&mut alice, &transport, "video", "webcam").await;
    bob.event_of("newProducer").await;

    alice
        .request_ok("closeProducer", json!({ "producerId": producer_id }))
        .await;
    let closed = bob.event_of("producerClosed").await;
    assert_eq!(closed["data"]["producerId"], producer_id.as_str());

    // The media worker reporting the same close again must not re-broadcast.
    app.media.single().trigger_producer_close(&producer_id);
    bob.expect_quiet("producerClosed", Duration::from_millis(300))
        .await;

    // And a second client close is an error, not a duplicate event.
    let err = alice
        .request_err("closeProducer", json!({ "producerId": producer_id }))
        .await;
    assert_eq!(err["code"], "PRODUCER_NOT_FOUND");
}

#[tokio::test]
async fn media_worker_close_reaches_the_room() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("worker-close").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("worker-close").await;

    let transport = producer_transport(&mut alice).await;
    let producer_id = produce(&mut alice, &transport, "video", "webcam").await;
    bob.event_of("newProducer").await;

    app.media.single().trigger_producer_close(&producer_id);

    let closed = bob.event_of("producerClosed").await;
    assert_eq!(closed["data"]["producerId"], producer_id.as_str());
    // The owner hears about it too.
    let closed = alice.event_of("producerClosed").await;
    assert_eq!(closed["data"]["producerId"], producer_id.as_str());
}

#[tokio::test]
async fn ghosts_cannot_produce() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("haunted").await;

    let mut ghost = app.connect(&app.user_token("casper", "s-casper")).await;
    let ack = ghost
        .request_ok("joinRoom", json!({ "roomId": "haunted", "ghost": true }))
        .await;
    assert_eq!(ack["status"], "joined");

    let transport = producer_transport(&mut ghost).await;
    let err = ghost
        .request_err(
            "produce",
            json!({
                "transportId": transport,
                "kind": "audio",
                "rtpParameters": { "codecs": [] },
            }),
        )
        .await;
    assert_eq!(err["code"], "GHOST_NO_MEDIA");
}

#[tokio::test]
async fn toggle_mute_broadcasts_post_state() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("toggles").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("toggles").await;

    let transport = producer_transport(&mut alice).await;
    let audio = produce(&mut alice, &transport, "audio", "webcam").await;
    bob.event_of("newProducer").await;

    alice
        .request_ok("toggleMute", json!({ "producerId": audio, "paused": true }))
        .await;
    let muted = bob.event_of("participantMuted").await;
    assert_eq!(muted["data"]["userId"], "alice");
    assert_eq!(muted["data"]["paused"], true);

    let video = produce(&mut alice, &transport, "video", "webcam").await;
    bob.event_of("newProducer").await;
    alice
        .request_ok(
            "toggleCamera",
            json!({ "producerId": video, "paused": true }),
        )
        .await;
    let camera = bob.event_of("participantCameraOff").await;
    assert_eq!(camera["data"]["paused"], true);
}

#[tokio::test]
async fn get_producers_lists_remote_producers() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("inventory").await;
    let transport = producer_transport(&mut alice).await;
    produce(&mut alice, &transport, "audio", "webcam").await;
    produce(&mut alice, &transport, "video", "webcam").await;

    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    let ack = bob.join("inventory").await;
    assert_eq!(ack["existingProducers"].as_array().unwrap().len(), 2);

    let listed = bob.request_ok("getProducers", json!({})).await;
    assert_eq!(listed["producers"].as_array().unwrap().len(), 2);

    // One's own producers are not in the list.
    let listed = alice.request_ok("getProducers", json!({})).await;
    assert_eq!(listed["producers"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn restart_ice_returns_fresh_parameters() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("ice").await;
    producer_transport(&mut alice).await;

    let ack = alice
        .request_ok("restartIce", json!({ "transport": "producer" }))
        .await;
    assert!(ack["iceParameters"].is_object());

    let err = alice
        .request_err("restartIce", json!({ "transport": "consumer" }))
        .await;
    assert_eq!(err["code"], "TRANSPORT_NOT_FOUND");
}
