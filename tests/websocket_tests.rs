//! WebSocket integration tests

use futures::{SinkExt, StreamExt};
use newsroom::authz::RoleDirectory;
use newsroom::collab::Coordinator;
use newsroom::config::CoordinatorConfig;
use newsroom::models::{DocumentKind, NewDocument};
use newsroom::store::{DocumentStore, MemoryStore};
use newsroom::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn setup_server() -> (SocketAddr, Arc<Coordinator>) {
    let store = Arc::new(MemoryStore::new());
    store
        .create(NewDocument {
            id: Some("statement".into()),
            title: "Holding statement".into(),
            kind: DocumentKind::Statement,
            blocks: vec!["headline".into(), "body".into()],
        })
        .await
        .unwrap();

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(RoleDirectory::newsroom_defaults()),
        store,
        CoordinatorConfig::default(),
    ));
    let app = newsroom::app(AppState::new(coordinator.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    (addr, coordinator)
}

async fn connect(addr: SocketAddr) -> Client {
    let url = format!("ws://{}/ws", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws_stream
}

async fn send(ws: &mut Client, kind: &str, sender: &str, payload: serde_json::Value) {
    let msg = serde_json::json!({
        "kind": kind,
        "documentId": "statement",
        "senderId": sender,
        "payload": payload,
    });
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Skip events until one of type `kind` arrives
async fn recv_type(ws: &mut Client, kind: &str) -> serde_json::Value {
    loop {
        let event = recv(ws).await;
        if event["type"] == kind {
            return event;
        }
    }
}

async fn join(ws: &mut Client, user: &str, role: &str) -> serde_json::Value {
    send(
        ws,
        "join",
        user,
        serde_json::json!({"role": role, "displayName": user}),
    )
    .await;
    recv_type(ws, "document_state").await
}

#[tokio::test]
async fn test_websocket_join_returns_snapshot() {
    let (addr, _coordinator) = setup_server().await;
    let mut ws = connect(addr).await;

    let state = join(&mut ws, "alice", "writer").await;
    assert_eq!(state["documentId"], "statement");
    assert_eq!(state["status"], "draft");
    assert_eq!(state["blocks"].as_array().unwrap().len(), 2);
    assert_eq!(state["roster"][0]["userId"], "alice");
}

#[tokio::test]
async fn test_websocket_invalid_message() {
    let (addr, _coordinator) = setup_server().await;
    let mut ws = connect(addr).await;

    ws.send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
    assert!(event["message"].as_str().unwrap().contains("Invalid message"));

    send(&mut ws, "shout", "alice", serde_json::json!({})).await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
}

#[tokio::test]
async fn test_websocket_unknown_document() {
    let (addr, _coordinator) = setup_server().await;
    let mut ws = connect(addr).await;

    let msg = serde_json::json!({
        "kind": "join",
        "documentId": "missing",
        "senderId": "alice",
        "payload": {"role": "writer", "displayName": "Alice"},
    });
    ws.send(Message::Text(msg.to_string().into())).await.unwrap();
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
}

#[tokio::test]
async fn test_websocket_message_before_join() {
    let (addr, _coordinator) = setup_server().await;
    let mut ws = connect(addr).await;
    let mut other = connect(addr).await;
    join(&mut other, "bob", "writer").await;

    send(
        &mut ws,
        "request-block-lock",
        "alice",
        serde_json::json!({"blockId": "headline"}),
    )
    .await;
    let event = recv(&mut ws).await;
    assert_eq!(event["type"], "error");
}

#[tokio::test]
async fn test_websocket_lock_edit_flow() {
    let (addr, _coordinator) = setup_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "alice", "writer").await;
    join(&mut bob, "bob", "writer").await;

    send(
        &mut alice,
        "request-block-lock",
        "alice",
        serde_json::json!({"blockId": "headline"}),
    )
    .await;
    let locked = recv_type(&mut bob, "block_locked").await;
    assert_eq!(locked["holder"], "alice");

    // Bob cannot edit without the lock
    send(
        &mut bob,
        "edit-block",
        "bob",
        serde_json::json!({"blockId": "headline", "content": "nope"}),
    )
    .await;
    let error = recv_type(&mut bob, "error").await;
    assert!(error["message"].as_str().unwrap().contains("Not authorized"));

    send(
        &mut alice,
        "edit-block",
        "alice",
        serde_json::json!({"blockId": "headline", "content": {"text": "Statement on outage"}}),
    )
    .await;
    let updated = recv_type(&mut bob, "block_updated").await;
    assert_eq!(updated["author"], "alice");
    assert_eq!(updated["version"], 1);
    assert_eq!(updated["content"]["text"], "Statement on outage");
}

#[tokio::test]
async fn test_websocket_close_transfers_locks() {
    let (addr, coordinator) = setup_server().await;
    let mut alice = connect(addr).await;
    let mut bob = connect(addr).await;
    join(&mut alice, "alice", "writer").await;
    join(&mut bob, "bob", "writer").await;

    send(
        &mut alice,
        "request-block-lock",
        "alice",
        serde_json::json!({"blockId": "body"}),
    )
    .await;
    recv_type(&mut bob, "block_locked").await;

    send(
        &mut bob,
        "request-block-lock",
        "bob",
        serde_json::json!({"blockId": "body"}),
    )
    .await;
    let queued = recv_type(&mut bob, "lock_queued").await;
    assert_eq!(queued["position"], 1);

    alice.close(None).await.unwrap();

    let transferred = recv_type(&mut bob, "block_transferred").await;
    assert_eq!(transferred["holder"], "bob");
    let left = recv_type(&mut bob, "user_left").await;
    assert_eq!(left["userId"], "alice");
    assert_eq!(left["roster"].as_array().unwrap().len(), 1);

    let info = coordinator.session_info("statement").await.unwrap();
    assert_eq!(info.participants.len(), 1);
}

#[tokio::test]
async fn test_websocket_preemption_notifies_holder() {
    let (addr, _coordinator) = setup_server().await;
    let mut writer = connect(addr).await;
    let mut chief = connect(addr).await;
    join(&mut writer, "wendy", "writer").await;
    join(&mut chief, "carla", "editor_in_chief").await;

    send(
        &mut writer,
        "request-block-lock",
        "wendy",
        serde_json::json!({"blockId": "headline"}),
    )
    .await;
    recv_type(&mut writer, "block_locked").await;

    send(
        &mut chief,
        "request-block-lock",
        "carla",
        serde_json::json!({"blockId": "headline"}),
    )
    .await;
    let preempted = recv_type(&mut writer, "lock_preempted").await;
    assert_eq!(preempted["holder"], "carla");
}

#[tokio::test]
async fn test_websocket_last_leave_destroys_session() {
    let (addr, coordinator) = setup_server().await;
    let mut ws = connect(addr).await;
    join(&mut ws, "alice", "writer").await;
    assert_eq!(coordinator.session_count().await, 1);

    ws.close(None).await.unwrap();

    let mut destroyed = false;
    for _ in 0..40 {
        if coordinator.session_count().await == 0 {
            destroyed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(destroyed);
}
