use serde_json::json;

use crate::fixtures::test_app::TestApp;
use crate::fixtures::ws_client::WsClient;

async fn enable_webinar(host: &mut WsClient, config: serde_json::Value) {
    let mut base = json!({ "enabled": true });
    if let (Some(base_obj), Some(extra)) = (base.as_object_mut(), config.as_object()) {
        for (k, v) in extra {
            base_obj.insert(k.clone(), v.clone());
        }
    }
    host.request_ok("webinar:updateConfig", base).await;
}

async fn produce_video(client: &mut WsClient) -> String {
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
                "kind": "video",
                "rtpParameters": { "codecs": [] },
            }),
        )
        .await;
    ack["producerId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn attendee_cap_is_enforced() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("town-hall").await;
    enable_webinar(&mut alice, json!({ "maxAttendees": 2 })).await;

    let mut a1 = app.connect(&app.attendee_token("a1", "s-a1")).await;
    let ack = a1.join("town-hall").await;
    assert_eq!(ack["status"], "joined");
    assert_eq!(ack["webinarRole"], "attendee");
    assert_eq!(ack["webinarAttendeeCount"], 1);

    let count = alice.event_of("webinar:attendeeCountChanged").await;
    assert_eq!(count["data"]["attendeeCount"], 1);

    let mut a2 = app.connect(&app.attendee_token("a2", "s-a2")).await;
    let ack = a2.join("town-hall").await;
    assert_eq!(ack["webinarAttendeeCount"], 2);
    let count = alice.event_of("webinar:attendeeCountChanged").await;
    assert_eq!(count["data"]["attendeeCount"], 2);

    let mut a3 = app.connect(&app.attendee_token("a3", "s-a3")).await;
    let err = a3
        .request_err("joinRoom", json!({ "roomId": "town-hall" }))
        .await;
    assert_eq!(err["code"], "WEBINAR_FULL");

    // Departure frees a seat and is announced.
    a1.request_ok("leaveRoom", json!({})).await;
    let count = alice.event_of("webinar:attendeeCountChanged").await;
    assert_eq!(count["data"]["attendeeCount"], 1);
    let ack = a3.join("town-hall").await;
    assert_eq!(ack["status"], "joined");
}

#[tokio::test]
async fn webinar_gates_reject_in_order() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("gated").await;

    // Disabled webinar.
    let mut a1 = app.connect(&app.attendee_token("a1", "s-a1")).await;
    let err = a1.request_err("joinRoom", json!({ "roomId": "gated" })).await;
    assert_eq!(err["code"], "WEBINAR_DISABLED");

    // Locked webinar.
    enable_webinar(&mut alice, json!({ "locked": true })).await;
    let err = a1.request_err("joinRoom", json!({ "roomId": "gated" })).await;
    assert_eq!(err["code"], "WEBINAR_LOCKED");

    // Invite code gate: required, then invalid, then valid.
    enable_webinar(
        &mut alice,
        json!({ "locked": false, "requiresInviteCode": true, "inviteCode": "77" }),
    )
    .await;

    let err = a1.request_err("joinRoom", json!({ "roomId": "gated" })).await;
    assert_eq!(err["code"], "WEBINAR_INVITE_CODE_INVALID");
    assert_eq!(err["message"], "webinar invite code required");

    let err = a1
        .request_err(
            "joinRoom",
            json!({ "roomId": "gated", "webinarInviteCode": "13" }),
        )
        .await;
    assert_eq!(err["code"], "WEBINAR_INVITE_CODE_INVALID");
    assert_eq!(err["message"], "invalid webinar invite code");

    let ack = a1
        .request_ok(
            "joinRoom",
            json!({ "roomId": "gated", "webinarInviteCode": "77" }),
        )
        .await;
    assert_eq!(ack["status"], "joined");
}

#[tokio::test]
async fn observers_are_read_only() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("stage").await;
    enable_webinar(&mut alice, json!({})).await;

    let mut a1 = app.connect(&app.attendee_token("a1", "s-a1")).await;
    a1.join("stage").await;

    let err = a1.request_err("createProducerTransport", json!({})).await;
    assert_eq!(err["code"], "OBSERVER_READONLY");
    let err = a1
        .request_err("sendChat", json!({ "content": "hello" }))
        .await;
    assert_eq!(err["code"], "OBSERVER_READONLY");
    let err = a1
        .request_err("setHandRaised", json!({ "raised": true }))
        .await;
    assert_eq!(err["code"], "OBSERVER_READONLY");
    let err = a1
        .request_err("updateDisplayName", json!({ "displayName": "Anon" }))
        .await;
    assert_eq!(err["code"], "OBSERVER_READONLY");

    // Consumer transports are allowed; that is how the feed arrives.
    a1.request_ok("createConsumerTransport", json!({})).await;
}

#[tokio::test]
async fn observer_feed_follows_the_speaker() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("broadcast").await;
    enable_webinar(&mut alice, json!({})).await;

    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("broadcast").await;

    let alice_producer = produce_video(&mut alice).await;
    let bob_producer = produce_video(&mut bob).await;

    // Alice produced first, so she is the selected feed on admission.
    let mut a1 = app.connect(&app.attendee_token("a1", "s-a1")).await;
    let ack = a1.join("broadcast").await;
    let existing = ack["existingProducers"].as_array().unwrap();
    assert_eq!(existing.len(), 1);
    assert_eq!(existing[0]["producerId"], alice_producer.as_str());

    // Consuming outside the feed is refused.
    let t = a1.request_ok("createConsumerTransport", json!({})).await;
    a1.request_ok(
        "connectConsumerTransport",
        json!({ "transportId": t["id"], "dtlsParameters": {} }),
    )
    .await;
    let err = a1
        .request_err(
            "consume",
            json!({ "producerId": bob_producer, "rtpCapabilities": {} }),
        )
        .await;
    assert_eq!(err["code"], "CANNOT_CONSUME");

    a1.request_ok(
        "consume",
        json!({ "producerId": alice_producer, "rtpCapabilities": {} }),
    )
    .await;

    // The speaker's producer closes; the feed moves to Bob and observers
    // are told to swap consumers.
    alice
        .request_ok("closeProducer", json!({ "producerId": alice_producer }))
        .await;
    let feed = a1.event_of("webinar:feedChanged").await;
    assert_eq!(feed["data"]["speakerUserId"], "bob");
    let producers = feed["data"]["producers"].as_array().unwrap();
    assert_eq!(producers.len(), 1);
    assert_eq!(producers[0]["producerId"], bob_producer.as_str());
}

#[tokio::test]
async fn link_rotation_bumps_the_version_only() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("linked").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("linked").await;

    enable_webinar(&mut alice, json!({})).await;
    bob.event_of("webinar:configChanged").await;

    let link = alice.request_ok("webinar:generateLink", json!({})).await;
    let slug = link["linkSlug"].as_str().unwrap().to_string();
    assert_eq!(link["linkVersion"], 1);
    assert!(link["link"].as_str().unwrap().contains(&slug));

    let rotated = alice.request_ok("webinar:rotateLink", json!({})).await;
    assert_eq!(rotated["linkSlug"], slug.as_str());
    assert_eq!(rotated["linkVersion"], 2);
    assert!(rotated["link"].as_str().unwrap().ends_with("v2"));

    let changed = bob.event_of("webinar:configChanged").await;
    assert_eq!(changed["data"]["linkVersion"], 2);
    assert_eq!(changed["data"]["linkSlug"], slug.as_str());
}

#[tokio::test]
async fn webinar_config_is_host_only() {
    let app = TestApp::spawn().await;
    let mut alice = app.connect(&app.host_token("alice", "s-alice")).await;
    alice.join("private-config").await;
    let mut bob = app.connect(&app.user_token("bob", "s-bob")).await;
    bob.join("private-config").await;

    let err = bob.request_err("webinar:getConfig", json!({})).await;
    assert_eq!(err["code"], "FORBIDDEN");
    let err = bob
        .request_err("webinar:updateConfig", json!({ "enabled": true }))
        .await;
    assert_eq!(err["code"], "FORBIDDEN");

    enable_webinar(&mut alice, json!({ "inviteCode": "99", "requiresInviteCode": true })).await;
    let config = alice.request_ok("webinar:getConfig", json!({})).await;
    assert_eq!(config["inviteCode"], "99");
    assert_eq!(config["requiresInviteCode"], true);
}
