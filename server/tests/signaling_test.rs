//! Integration tests for lobby creation, join notifications, host
//! migration, and signaling relay over real WebSocket connections.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use huddle_server::broker::Broker;
use huddle_server::codes::LobbyCodes;
use huddle_server::config::Config;
use huddle_server::routes;
use huddle_server::snapshot::SnapshotCache;
use huddle_server::state::AppState;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the server on a random port with shortened timers and no store.
/// Returns the WebSocket URL.
async fn start_test_server() -> String {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let config = Config {
        data_dir: data_dir.clone(),
        no_lobby_timeout_ms: 300,
        seal_close_timeout_secs: 1,
        ..Config::default()
    };
    let codes = LobbyCodes::open(&data_dir, config.code_seed)
        .await
        .expect("Failed to open code allocator");

    let state = AppState {
        config: Arc::new(config),
        broker: Arc::new(Mutex::new(Broker::default())),
        cache: Arc::new(SnapshotCache::new(64, None)),
        codes: Arc::new(codes),
    };

    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    format!("ws://{}/ws", addr)
}

async fn connect(url: &str) -> WsStream {
    let (stream, _) = connect_async(url).await.expect("Failed to connect");
    stream
}

async fn send_cmd(ws: &mut WsStream, kind: i64, id: i64, data: &str) {
    let text = json!({ "type": kind, "id": id, "data": data }).to_string();
    ws.send(Message::Text(text.into())).await.expect("send failed");
}

/// Next non-ping frame, with a timeout.
async fn recv_message(ws: &mut WsStream) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn recv_envelope(ws: &mut WsStream) -> Value {
    match recv_message(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("invalid JSON frame"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn recv_close(ws: &mut WsStream) -> (u16, String) {
    loop {
        match recv_message(ws).await {
            Message::Close(Some(frame)) => {
                return (u16::from(frame.code), frame.reason.to_string())
            }
            Message::Close(None) => return (1005, String::new()),
            _ => continue,
        }
    }
}

/// Create a lobby (mesh or star) and return its code after draining the
/// creator's ID and JOIN frames.
async fn create_lobby(ws: &mut WsStream, mesh: bool) -> String {
    send_cmd(ws, 0, if mesh { 0 } else { 1 }, "").await;
    let id_frame = recv_envelope(ws).await;
    assert_eq!(id_frame["type"], 1, "expected ID frame first");
    assert_eq!(id_frame["id"], 1, "creator is the host");
    let join_frame = recv_envelope(ws).await;
    assert_eq!(join_frame["type"], 0, "expected JOIN reply");
    assert_eq!(join_frame["id"], 0);
    join_frame["data"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_lobby_and_relay_signaling() {
    let url = start_test_server().await;

    let mut host = connect(&url).await;
    send_cmd(&mut host, 0, 0, "").await; // mesh lobby
    let id_frame = recv_envelope(&mut host).await;
    assert_eq!(id_frame["type"], 1);
    assert_eq!(id_frame["id"], 1);
    assert_eq!(id_frame["data"], "true");
    let join_frame = recv_envelope(&mut host).await;
    assert_eq!(join_frame["type"], 0);
    assert_eq!(join_frame["id"], 0);
    let code = join_frame["data"].as_str().unwrap().to_string();
    assert_eq!(code.len(), 6);
    assert!(huddle_server::codes::valid(&code));

    let mut guest = connect(&url).await;
    send_cmd(&mut guest, 0, 0, &code).await;
    let guest_id_frame = recv_envelope(&mut guest).await;
    assert_eq!(guest_id_frame["type"], 1);
    assert_eq!(guest_id_frame["data"], "true");
    let guest_id = guest_id_frame["id"].as_i64().unwrap();
    assert!(guest_id > 1, "non-host gets its raw identity");
    let guest_pc = recv_envelope(&mut guest).await;
    assert_eq!(guest_pc["type"], 2);
    assert_eq!(guest_pc["id"], 1, "existing host is addressed as 1");
    let guest_join = recv_envelope(&mut guest).await;
    assert_eq!(guest_join["type"], 0);
    assert_eq!(guest_join["data"].as_str().unwrap(), code);

    let host_pc = recv_envelope(&mut host).await;
    assert_eq!(host_pc["type"], 2);
    assert_eq!(host_pc["id"], guest_id);

    // guest offers to the host via the reserved id 1
    send_cmd(&mut guest, 4, 1, "sdp-offer").await;
    let offer = recv_envelope(&mut host).await;
    assert_eq!(offer["type"], 4);
    assert_eq!(offer["id"], guest_id, "sender stamped with raw id");
    assert_eq!(offer["data"], "sdp-offer");

    // host answers by raw id; guest sees the host as id 1
    send_cmd(&mut host, 5, guest_id, "sdp-answer").await;
    let answer = recv_envelope(&mut guest).await;
    assert_eq!(answer["type"], 5);
    assert_eq!(answer["id"], 1);
    assert_eq!(answer["data"], "sdp-answer");

    // ICE candidates relay the same way
    send_cmd(&mut guest, 6, 1, "candidate-blob").await;
    let candidate = recv_envelope(&mut host).await;
    assert_eq!(candidate["type"], 6);
    assert_eq!(candidate["data"], "candidate-blob");
}

#[tokio::test]
async fn test_host_migration_promotes_first_member() {
    let url = start_test_server().await;

    let mut a = connect(&url).await;
    let code = create_lobby(&mut a, false).await;

    let mut b = connect(&url).await;
    send_cmd(&mut b, 0, 1, &code).await;
    let b_id = recv_envelope(&mut b).await["id"].as_i64().unwrap();
    recv_envelope(&mut b).await; // PEER_CONNECT(1)
    recv_envelope(&mut b).await; // JOIN
    recv_envelope(&mut a).await; // PEER_CONNECT(b)

    let mut c = connect(&url).await;
    send_cmd(&mut c, 0, 1, &code).await;
    let c_id = recv_envelope(&mut c).await["id"].as_i64().unwrap();
    recv_envelope(&mut c).await; // PEER_CONNECT(1)
    let pc_b = recv_envelope(&mut c).await;
    assert_eq!(pc_b["id"], b_id);
    recv_envelope(&mut c).await; // JOIN
    recv_envelope(&mut a).await; // PEER_CONNECT(c)
    recv_envelope(&mut b).await; // PEER_CONNECT(c)

    // the host disconnects: first remaining member is promoted
    a.close(None).await.unwrap();
    let host_changed = recv_envelope(&mut b).await;
    assert_eq!(host_changed["type"], 8);
    assert_eq!(host_changed["id"], 1);
    assert_eq!(host_changed["data"], "You are now the host");

    // a later joiner sees the promoted member addressed as 1
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut d = connect(&url).await;
    send_cmd(&mut d, 0, 1, &code).await;
    let d_id = recv_envelope(&mut d).await["id"].as_i64().unwrap();
    let first_pc = recv_envelope(&mut d).await;
    assert_eq!(first_pc["type"], 2);
    assert_eq!(first_pc["id"], 1);
    let second_pc = recv_envelope(&mut d).await;
    assert_eq!(second_pc["id"], c_id);

    // c heard nothing about the migration, only the new arrival
    let c_next = recv_envelope(&mut c).await;
    assert_eq!(c_next["type"], 2);
    assert_eq!(c_next["id"], d_id);
}

#[tokio::test]
async fn test_malformed_envelope_closes_connection() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    ws.send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Invalid message format");
}

#[tokio::test]
async fn test_float_type_field_is_rejected() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    ws.send(Message::Text(
        r#"{"type":0.5,"id":0,"data":""}"#.to_string().into(),
    ))
    .await
    .unwrap();
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Invalid message format");
}

#[tokio::test]
async fn test_command_before_join_is_rejected() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    send_cmd(&mut ws, 7, 0, "").await;
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Invalid message when not in a lobby");
}

#[tokio::test]
async fn test_join_unknown_code_is_rejected() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    send_cmd(&mut ws, 0, 1, "ZZZZZZ").await;
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Lobby does not exists");
}

#[tokio::test]
async fn test_second_join_is_rejected() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    create_lobby(&mut ws, false).await;
    send_cmd(&mut ws, 0, 1, "").await;
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Already in a lobby");
}

#[tokio::test]
async fn test_relay_to_unknown_destination_is_rejected() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    create_lobby(&mut ws, false).await;
    send_cmd(&mut ws, 4, 424242, "sdp").await;
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Invalid destination");
}

#[tokio::test]
async fn test_unknown_command_is_rejected() {
    let url = start_test_server().await;
    let mut ws = connect(&url).await;
    create_lobby(&mut ws, false).await;
    send_cmd(&mut ws, 42, 0, "").await;
    let (code, reason) = recv_close(&mut ws).await;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Invalid command");
}
