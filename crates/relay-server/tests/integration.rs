//! End-to-end tests against a bound server using a real WebSocket client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use relay_server::{RelayServer, ShutdownCoordinator};
use relay_settings::Settings;
use relay_store::Database;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<ShutdownCoordinator>,
    _static_dir: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

/// Boot a server on an ephemeral port.
async fn boot_server(tweak: impl FnOnce(&mut Settings)) -> TestServer {
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("index.html"), "<html>relay</html>").unwrap();

    let mut settings = Settings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;
    settings.server.static_dir = static_dir.path().to_path_buf();
    tweak(&mut settings);

    let server = RelayServer::new(settings, Database::in_memory().unwrap());
    let shutdown = server.shutdown().clone();
    let (addr, _handle) = server.listen().await.unwrap();

    TestServer {
        addr,
        shutdown,
        _static_dir: static_dir,
    }
}

async fn connect(addr: SocketAddr, client_id: Option<&str>) -> WsStream {
    let url = match client_id {
        Some(id) => format!("ws://{addr}/api/ws?clientId={id}"),
        None => format!("ws://{addr}/api/ws"),
    };
    let (ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    ws
}

async fn health(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{addr}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Registration completes after the upgrade response, so poll until the hub sees `n`.
async fn wait_for_connections(addr: SocketAddr, n: u64) {
    timeout(TIMEOUT, async {
        loop {
            if health(addr).await["connections"] == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached {n} connections"));
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

/// Next envelope, skipping control frames.
async fn next_envelope(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for envelope")
            .expect("stream ended")
            .expect("transport error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn next_of_type(ws: &mut WsStream, kind: &str) -> Value {
    loop {
        let env = next_envelope(ws).await;
        if env["type"] == kind {
            return env;
        }
    }
}

#[tokio::test]
async fn unicast_reaches_only_the_addressed_client() {
    let server = boot_server(|_| {}).await;
    let mut alice = connect(server.addr, Some("alice")).await;
    let mut bob = connect(server.addr, Some("bob")).await;
    wait_for_connections(server.addr, 2).await;

    send(&mut alice, json!({"receiver": "bob", "type": "chat", "payload": "hi"})).await;

    let got = next_envelope(&mut bob).await;
    assert_eq!(got["sender"], "alice");
    assert_eq!(got["receiver"], "bob");
    assert_eq!(got["type"], "chat");
    assert_eq!(got["payload"], "hi");
    assert!(got["timestamp"].as_str().is_some_and(|ts| !ts.is_empty()));

    // Alice's first envelope must be the later broadcast, not the unicast.
    send(&mut bob, json!({"receiver": "*", "type": "marker"})).await;
    let first = next_envelope(&mut alice).await;
    assert_eq!(first["type"], "marker");
    assert_eq!(first["sender"], "bob");
}

#[tokio::test]
async fn broadcast_reaches_every_client_including_sender() {
    let server = boot_server(|_| {}).await;
    let mut a = connect(server.addr, Some("a")).await;
    let mut b = connect(server.addr, Some("b")).await;
    let mut c = connect(server.addr, Some("c")).await;
    wait_for_connections(server.addr, 3).await;

    send(&mut a, json!({"type": "announce", "payload": {"n": 1}})).await;

    for ws in [&mut a, &mut b, &mut c] {
        let got = next_envelope(ws).await;
        assert_eq!(got["type"], "announce");
        assert_eq!(got["sender"], "a");
        assert_eq!(got["payload"]["n"], 1);
    }
}

#[tokio::test]
async fn explicit_sender_and_timestamp_are_kept() {
    let server = boot_server(|_| {}).await;
    let mut a = connect(server.addr, Some("a")).await;
    wait_for_connections(server.addr, 1).await;

    send(
        &mut a,
        json!({"sender": "ops", "receiver": "a", "type": "note", "timestamp": "2026-01-01T09:00:00+09:00"}),
    )
    .await;
    let got = next_envelope(&mut a).await;
    assert_eq!(got["sender"], "ops");
    assert_eq!(got["timestamp"], "2026-01-01T09:00:00+09:00");
}

#[tokio::test]
async fn missing_client_id_falls_back_to_peer_ip() {
    let server = boot_server(|_| {}).await;
    let mut anon = connect(server.addr, None).await;
    let mut named = connect(server.addr, Some("named")).await;
    wait_for_connections(server.addr, 2).await;

    send(&mut named, json!({"receiver": "127.0.0.1", "type": "direct"})).await;
    let got = next_envelope(&mut anon).await;
    assert_eq!(got["type"], "direct");

    send(&mut anon, json!({"receiver": "named", "type": "reply"})).await;
    let got = next_envelope(&mut named).await;
    assert_eq!(got["sender"], "127.0.0.1");
}

#[tokio::test]
async fn demo_start_runs_a_single_tick_stream() {
    let server = boot_server(|s| s.hub.demo_tick_millis = 100).await;
    let mut carol = connect(server.addr, Some("carol")).await;
    let mut dave = connect(server.addr, Some("dave")).await;
    wait_for_connections(server.addr, 2).await;

    send(&mut carol, json!({"type": "demo-start"})).await;
    let first = next_of_type(&mut dave, "server-tick").await;
    assert_eq!(first["sender"], "server");
    assert_eq!(first["receiver"], "*");
    assert_eq!(first["payload"]["message"], "server tick #1");
    assert!(first["payload"]["sentAt"].is_string());

    // A second trigger must not start a parallel stream.
    send(&mut dave, json!({"type": "demo-start"})).await;
    let mut last = 1;
    for _ in 0..5 {
        let tick = next_of_type(&mut dave, "server-tick").await;
        let message = tick["payload"]["message"].as_str().unwrap().to_owned();
        let n: u64 = message.trim_start_matches("server tick #").parse().unwrap();
        assert_eq!(n, last + 1, "ticks out of sequence: {message}");
        last = n;
    }

    let tick = next_of_type(&mut carol, "server-tick").await;
    assert!(tick["payload"]["message"].as_str().unwrap().starts_with("server tick #"));
}

#[tokio::test]
async fn malformed_frame_closes_the_connection() {
    let server = boot_server(|_| {}).await;
    let mut bad = connect(server.addr, Some("bad")).await;
    let mut good = connect(server.addr, Some("good")).await;
    wait_for_connections(server.addr, 2).await;

    bad.send(Message::Text("definitely not json".to_string().into())).await.unwrap();

    let closed = timeout(TIMEOUT, async {
        loop {
            match bad.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the connection");
    wait_for_connections(server.addr, 1).await;

    // The survivor keeps working.
    send(&mut good, json!({"receiver": "good", "type": "still-here"})).await;
    assert_eq!(next_envelope(&mut good).await["type"], "still-here");
}

#[tokio::test]
async fn oversized_frame_closes_the_connection() {
    let server = boot_server(|s| s.hub.max_frame_bytes = 256).await;
    let mut ws = connect(server.addr, Some("big")).await;
    wait_for_connections(server.addr, 1).await;

    let payload = "x".repeat(1024);
    let _ = ws
        .send(Message::Text(json!({"type": "blob", "payload": payload}).to_string().into()))
        .await;

    wait_for_connections(server.addr, 0).await;
}

#[tokio::test]
async fn client_disconnect_unregisters() {
    let server = boot_server(|_| {}).await;
    let mut ws = connect(server.addr, Some("leaver")).await;
    wait_for_connections(server.addr, 1).await;

    ws.close(None).await.unwrap();
    wait_for_connections(server.addr, 0).await;
}

#[tokio::test]
async fn shutdown_sends_close_to_clients() {
    let server = boot_server(|_| {}).await;
    let mut ws = connect(server.addr, Some("stay")).await;
    wait_for_connections(server.addr, 1).await;

    server.shutdown.shutdown();

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn health_and_spa_fallback_over_http() {
    let server = boot_server(|_| {}).await;

    let body = health(server.addr).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);

    let page = reqwest::get(format!("http://{}/dashboard", server.addr))
        .await
        .unwrap();
    assert_eq!(page.status(), reqwest::StatusCode::OK);
    assert_eq!(page.text().await.unwrap(), "<html>relay</html>");
}

#[tokio::test]
async fn user_records_over_http() {
    let server = boot_server(|_| {}).await;
    let client = reqwest::Client::new();
    let base = format!("http://{}/api/users", server.addr);

    let created: Value = client
        .post(&base)
        .json(&json!({"name": "Eve", "email": "eve@example.com", "role": "ops"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let id = created["id"].as_i64().unwrap();

    let listed: Value = client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed[0]["email"], "eve@example.com");

    let resp = client.delete(format!("{base}/{id}")).send().await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NO_CONTENT);
}
