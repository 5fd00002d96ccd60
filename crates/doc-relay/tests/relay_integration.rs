//! End-to-end tests: a real relay server on a free port, driven by real WebSocket clients.

#![cfg(feature = "axum")]

use doc_relay::{router_with_relay, ConnectionRegistry, RelayState};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server on a free port, return its WebSocket URL.
async fn start_server(state: RelayState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router_with_relay(state, "/ws");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{addr}/ws")
}

fn new_state() -> RelayState {
    RelayState::new(Arc::new(ConnectionRegistry::new()))
}

async fn connect(url: &str) -> Client {
    let (client, _) = connect_async(url).await.expect("Should connect to relay");
    client
}

async fn send_event(client: &mut Client, event: &str, data: &str) {
    let frame = format!(r#"{{"event":"{event}","data":{data}}}"#);
    client.send(Message::Text(frame.into())).await.unwrap();
}

async fn join(client: &mut Client, room_id: &str) {
    send_event(client, "join-document", &format!("\"{room_id}\"")).await;
}

/// Next text frame, or `None` if nothing arrives in time.
async fn recv_text(client: &mut Client, wait: Duration) -> Option<String> {
    loop {
        match timeout(wait, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text.to_string()),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("Unexpected frame: {other:?}"),
            Err(_) => return None,
        }
    }
}

async fn expect_change(client: &mut Client) -> String {
    recv_text(client, Duration::from_secs(2))
        .await
        .expect("Should receive a change")
}

async fn expect_silence(client: &mut Client) {
    let frame = recv_text(client, Duration::from_millis(200)).await;
    assert!(frame.is_none(), "Should not receive anything, got {frame:?}");
}

/// Joins are processed on the server's own schedule; wait until they landed.
async fn wait_for_members(state: &RelayState, room_id: &str, count: usize) {
    timeout(Duration::from_secs(2), async {
        while state.registry().room_members(room_id).await.len() != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Room '{room_id}' never reached {count} members"));
}

async fn wait_for_connections(state: &RelayState, count: usize) {
    timeout(Duration::from_secs(2), async {
        while state.registry().connection_count().await != count {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Registry never reached {count} connections"));
}

#[tokio::test]
async fn test_change_reaches_every_other_member() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut c = connect(&url).await;
    for client in [&mut a, &mut b, &mut c] {
        join(client, "doc1").await;
    }
    wait_for_members(&state, "doc1", 3).await;

    send_event(&mut a, "send-changes", r#""hello""#).await;

    let expected = r#"{"event":"receive-changes","data":"hello"}"#;
    assert_eq!(expect_change(&mut b).await, expected);
    assert_eq!(expect_change(&mut c).await, expected);
    expect_silence(&mut a).await;
    expect_silence(&mut b).await;
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn test_join_then_send_without_waiting() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut b, "doc1").await;
    wait_for_members(&state, "doc1", 1).await;

    // Both frames go out back to back; the join must land before the change
    join(&mut a, "doc1").await;
    send_event(&mut a, "send-changes", r#""right after join""#).await;

    assert_eq!(
        expect_change(&mut b).await,
        r#"{"event":"receive-changes","data":"right after join"}"#
    );
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn test_former_member_is_not_a_recipient() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    join(&mut a, "doc1").await;
    wait_for_members(&state, "doc1", 1).await;
    a.close(None).await.unwrap();
    wait_for_connections(&state, 0).await;
    assert_eq!(state.registry().room_count().await, 0);

    let mut b = connect(&url).await;
    join(&mut b, "doc1").await;
    wait_for_members(&state, "doc1", 1).await;
    send_event(&mut b, "send-changes", r#""world""#).await;

    timeout(Duration::from_secs(2), async {
        while state.broadcaster().stats().messages_relayed == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Change should be processed");

    let stats = state.broadcaster().stats();
    assert_eq!(stats.deliveries, 0);
    assert_eq!(stats.deliveries_failed, 0);
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn test_rooms_do_not_leak() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    let mut other = connect(&url).await;
    join(&mut a, "doc1").await;
    join(&mut b, "doc1").await;
    join(&mut other, "doc2").await;
    wait_for_members(&state, "doc1", 2).await;
    wait_for_members(&state, "doc2", 1).await;

    send_event(&mut a, "send-changes", r#""for doc1""#).await;

    expect_change(&mut b).await;
    expect_silence(&mut other).await;
}

#[tokio::test]
async fn test_payload_is_relayed_byte_for_byte() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut a, "doc1").await;
    join(&mut b, "doc1").await;
    wait_for_members(&state, "doc1", 2).await;

    let text = "collaborative ✍ text\n".repeat(400);
    let payload = format!(
        r#"{{ "delta" : {},  "rev": 1.0e3 }}"#,
        serde_json::to_string(&text).unwrap()
    );
    send_event(&mut a, "send-changes", &payload).await;

    let received = expect_change(&mut b).await;
    assert_eq!(
        received,
        format!(r#"{{"event":"receive-changes","data":{payload}}}"#)
    );
}

#[tokio::test]
async fn test_rejoining_does_not_duplicate_delivery() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    join(&mut a, "doc1").await;
    join(&mut b, "doc1").await;
    join(&mut b, "doc1").await;
    wait_for_members(&state, "doc1", 2).await;
    // Let the second join land as well
    sleep(Duration::from_millis(50)).await;

    send_event(&mut a, "send-changes", r#""once""#).await;

    expect_change(&mut b).await;
    expect_silence(&mut b).await;
}

#[tokio::test]
async fn test_default_room_is_joined_on_connect() {
    let state = new_state().with_default_room("poc_document_1");
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;
    wait_for_members(&state, "poc_document_1", 2).await;

    send_event(&mut a, "send-changes", r#""typed""#).await;

    assert_eq!(
        expect_change(&mut b).await,
        r#"{"event":"receive-changes","data":"typed"}"#
    );
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&url).await;

    a.send(Message::Text("definitely not json".to_string().into()))
        .await
        .unwrap();
    send_event(&mut a, "rename-document", r#""doc1""#).await;
    send_event(&mut a, "join-document", r#""""#).await;

    join(&mut a, "doc1").await;
    join(&mut b, "doc1").await;
    wait_for_members(&state, "doc1", 2).await;

    send_event(&mut a, "send-changes", r#""after garbage""#).await;
    assert_eq!(
        expect_change(&mut b).await,
        r#"{"event":"receive-changes","data":"after garbage"}"#
    );
    expect_silence(&mut a).await;
}

#[tokio::test]
async fn test_binary_framing() {
    let state = new_state();
    let url = start_server(state.clone()).await;

    let mut a = connect(&url).await;
    let mut b = connect(&format!("{url}?framing=binary")).await;

    let mut join_frame = Vec::new();
    lib0::encoding::Write::write_string(&mut join_frame, r#"{"event":"join-room","data":"doc1"}"#);
    b.send(Message::Binary(join_frame.into())).await.unwrap();
    join(&mut a, "doc1").await;
    wait_for_members(&state, "doc1", 2).await;

    send_event(&mut a, "send-changes", r#""binary please""#).await;

    let frame = timeout(Duration::from_secs(2), b.next())
        .await
        .expect("Should receive a change")
        .expect("Stream should be open")
        .unwrap();

    match frame {
        Message::Binary(data) => {
            let mut decoder = lib0::decoding::Cursor::new(&data);
            let json = lib0::decoding::Read::read_string(&mut decoder).unwrap();
            assert_eq!(json, r#"{"event":"receive-changes","data":"binary please"}"#);
        }
        other => panic!("Expected binary frame, got {other:?}"),
    }
}
