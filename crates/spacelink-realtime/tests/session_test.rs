//! Integration tests for session dispatch, tables, and outbound frames.

mod helpers;

use serde_json::json;

use spacelink_core::types::ParticipantId;
use spacelink_realtime::message::CursorPosition;
use spacelink_realtime::{
    ConnectionManager, EventKind, RealtimeError, SessionEvent, TransportEvent,
};

use helpers::{Plan, ScriptedConnector, frame, record, test_config, wait_for};

#[tokio::test(start_paused = true)]
async fn test_outbound_frame_shapes() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut server = servers.recv().await.expect("transport opened");

    session.propose_change(json!({ "op": "insert", "at": 3 })).expect("delta");
    session
        .update_cursor(CursorPosition { x: 10.0, y: 20.5 })
        .expect("cursor");
    session
        .update_presence(Some("editing"), json!({ "tab": "design" }))
        .expect("presence");
    session.request_snapshot().expect("snapshot request");

    let delta = server.next_frame().await.expect("delta frame");
    assert_eq!(delta["type"], "delta");
    assert_eq!(delta["spaceId"], "s1");
    assert_eq!(delta["data"]["changes"]["op"], "insert");
    assert!(delta["timestamp"].is_string());

    let cursor = server.next_frame().await.expect("cursor frame");
    assert_eq!(cursor["type"], "cursor_update");
    assert_eq!(cursor["data"]["position"], json!({ "x": 10.0, "y": 20.5 }));

    let presence = server.next_frame().await.expect("presence frame");
    assert_eq!(presence["type"], "presence_update");
    assert_eq!(presence["data"]["activity"], "editing");
    assert_eq!(presence["data"]["metadata"]["tab"], "design");

    let snapshot = server.next_frame().await.expect("snapshot request frame");
    assert_eq!(snapshot["type"], "snapshot_request");
    assert_eq!(snapshot["data"], json!({}));

    assert_eq!(manager.metrics().frames_sent, 4);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_frames_update_tables_before_dispatch() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut events = record(&session);
    let server = servers.recv().await.expect("transport opened");

    server
        .push(
            "presence_update",
            json!({ "userId": "u1", "displayName": "Ada", "online": true, "activity": "viewing" }),
        )
        .await;
    server
        .push(
            "cursor_update",
            json!({ "userId": "u1", "position": { "x": 1.0, "y": 2.0 }, "color": "#ff0000" }),
        )
        .await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::CursorUpdate(_))).await;

    let u1 = ParticipantId::from("u1");
    let presence = session.presence();
    assert_eq!(presence[&u1].display_name, "Ada");
    assert_eq!(presence[&u1].activity.as_deref(), Some("viewing"));
    assert_eq!(session.cursors()[&u1].color, "#ff0000");

    server.push("member_left", json!({ "userId": "u1" })).await;
    let left = wait_for(&mut events, |e| matches!(e, SessionEvent::MemberLeft(_))).await;
    assert!(matches!(left, SessionEvent::MemberLeft(member) if member.participant_id == u1));
    assert!(session.presence().is_empty());
    assert!(session.cursors().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_events_arrive_in_order_per_kind_listeners() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut events = record(&session);
    let server = servers.recv().await.expect("transport opened");

    let (delta_tx, mut deltas) = tokio::sync::mpsc::unbounded_channel();
    session.on(EventKind::Delta, move |event| {
        if let SessionEvent::Delta(change) = event {
            let _ = delta_tx.send(change.id.clone());
        }
    });

    for id in ["c1", "c2", "c3"] {
        server
            .push("delta", json!({ "id": id, "changes": { "op": "noop" }, "author": "u2" }))
            .await;
    }
    server.push("ack", json!({ "id": "c3" })).await;
    wait_for(&mut events, |e| matches!(e, SessionEvent::Ack(_))).await;

    let mut ids = Vec::new();
    while let Ok(id) = deltas.try_recv() {
        ids.push(id);
    }
    assert_eq!(ids, vec!["c1", "c2", "c3"]);
    assert!(session.last_ack().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_reported_and_connection_survives() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut events = record(&session);
    let server = servers.recv().await.expect("transport opened");

    server.push_raw("{ not json").await;
    let error = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(error, SessionEvent::Error(RealtimeError::MessageDecode(_))));

    server.push("snapshot", json!({ "document": { "rev": 7 } })).await;
    let snapshot = wait_for(&mut events, |e| matches!(e, SessionEvent::Snapshot(_))).await;
    assert!(matches!(snapshot, SessionEvent::Snapshot(data) if data["document"]["rev"] == 7));

    assert!(session.is_connected());
    let metrics = manager.metrics();
    assert_eq!(metrics.decode_failures, 1);
    assert_eq!(metrics.frames_received, 1);
}

#[tokio::test(start_paused = true)]
async fn test_remote_error_and_unknown_type() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut events = record(&session);
    let server = servers.recv().await.expect("transport opened");

    server
        .push("error", json!({ "code": "RATE_LIMITED", "message": "slow down" }))
        .await;
    server.push("comment_added", json!({ "text": "hi" })).await;

    let error = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(
        error,
        SessionEvent::Error(RealtimeError::Remote(remote)) if remote.code == "RATE_LIMITED"
    ));
    let message = wait_for(&mut events, |e| matches!(e, SessionEvent::Message(_))).await;
    assert!(matches!(message, SessionEvent::Message(envelope) if envelope.kind().as_str() == "comment_added"));
}

#[tokio::test(start_paused = true)]
async fn test_listener_survives_reconnect() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept, Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut events = record(&session);

    let first = servers.recv().await.expect("first transport");
    first.close("blip");
    wait_for(&mut events, |e| matches!(e, SessionEvent::Connected)).await;

    let second = servers.recv().await.expect("second transport");
    second.push("member_joined", json!({ "userId": "u9", "displayName": "Lin" })).await;
    let joined = wait_for(&mut events, |e| matches!(e, SessionEvent::MemberJoined(_))).await;
    assert!(matches!(
        joined,
        SessionEvent::MemberJoined(member) if member.display_name.as_deref() == Some("Lin")
    ));
}

#[tokio::test(start_paused = true)]
async fn test_setup_listener_sees_frames_queued_during_handshake() {
    let held = vec![
        frame("delta", json!({ "id": "c1", "changes": { "op": "insert" }, "author": "u2" })),
        frame(
            "presence_update",
            json!({ "userId": "u1", "displayName": "Ada", "online": true }),
        ),
        frame("member_left", json!({ "userId": "u1" })),
    ];
    let (connector, _servers) = ScriptedConnector::new([Plan::AcceptWith(held)], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);

    let (tx, mut kinds) = tokio::sync::mpsc::unbounded_channel();
    let session = manager
        .attach_with("s1", "token", move |session| {
            session.on_any(move |event| {
                let _ = tx.send(event.kind());
            });
        })
        .await
        .expect("attach");

    let mut seen = Vec::new();
    while seen.len() < 4 {
        seen.push(kinds.recv().await.expect("session event"));
    }
    assert_eq!(
        seen,
        vec![
            EventKind::Connected,
            EventKind::Delta,
            EventKind::PresenceUpdate,
            EventKind::MemberLeft,
        ]
    );
    assert!(session.presence().is_empty());
    assert_eq!(session.stats().dispatched, 4);
}

#[tokio::test(start_paused = true)]
async fn test_undecodable_binary_frame_reports_reason() {
    let (connector, mut servers) = ScriptedConnector::new([Plan::Accept], Plan::Accept);
    let manager = ConnectionManager::new(test_config(), connector);
    let session = manager.attach("s1", "token").await.expect("attach");
    let mut events = record(&session);
    let server = servers.recv().await.expect("transport opened");

    server
        .inbound
        .send(TransportEvent::Malformed(
            "binary frame is not valid UTF-8".to_string(),
        ))
        .await
        .expect("client pump alive");

    let error = wait_for(&mut events, |e| matches!(e, SessionEvent::Error(_))).await;
    assert!(matches!(
        error,
        SessionEvent::Error(RealtimeError::MessageDecode(reason)) if reason.contains("UTF-8")
    ));
    assert!(session.is_connected());
    assert_eq!(manager.metrics().decode_failures, 1);
}
