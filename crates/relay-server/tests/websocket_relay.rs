//! End-to-end tests: a real relay on a loopback port, real WebSocket clients.
//!
//! Each test starts its own server on port 0, so tests can run in parallel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use relay_server::domain::RelayConfig;
use relay_server::infrastructure::serve;

const SECRET: &str = "your-device-secret";
const WAIT: Duration = Duration::from_secs(2);

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Helpers ───────────────────────────────────────────────────────────────────

struct TestServer {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

async fn start(config: RelayConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    tokio::spawn(serve(listener, config, Arc::clone(&running)));
    TestServer { addr, running }
}

async fn start_default() -> TestServer {
    start(RelayConfig {
        device_secret: Some(SECRET.to_string()),
        ping_interval: None,
        ..RelayConfig::default()
    })
    .await
}

async fn connect_controller(server: &TestServer, session: &str) -> Ws {
    let mut request = format!("ws://{}/signaling", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        COOKIE,
        HeaderValue::from_str(&format!("connect.sid={session}")).unwrap(),
    );
    connect_async(request).await.unwrap().0
}

async fn connect_device(server: &TestServer, secret: &str) -> Ws {
    let url = format!("ws://{}/signaling?deviceAuth={secret}", server.addr);
    connect_async(url).await.unwrap().0
}

async fn send(ws: &mut Ws, frame: &str) {
    ws.send(WsMessage::Text(frame.to_string())).await.unwrap();
}

async fn register(ws: &mut Ws, role: &str, device_id: &str) {
    let frame = json!({"type": "register", "role": role, "deviceId": device_id});
    send(ws, &frame.to_string()).await;
}

/// Next text frame within `wait`, skipping control frames.  `None` on
/// timeout or when the connection ends.
async fn try_recv_text(ws: &mut Ws, wait: Duration) -> Option<String> {
    timeout(wait, async {
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(text),
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                _ => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

async fn recv_text(ws: &mut Ws) -> String {
    try_recv_text(ws, WAIT)
        .await
        .expect("expected a text frame from the relay")
}

async fn recv_json(ws: &mut Ws) -> Value {
    serde_json::from_str(&recv_text(ws).await).unwrap()
}

/// `true` once the server has closed the connection.
async fn closed_by_server(ws: &mut Ws) -> bool {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap_or(false)
}

fn error(message: &str) -> Value {
    json!({"type": "error", "message": message})
}

// ── Pairing and routing ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_pair_command_and_disconnect_over_websocket() {
    let server = start_default().await;
    let mut a = connect_controller(&server, "s%3Asession-a").await;
    let mut b = connect_device(&server, SECRET).await;

    // Both register → each side is told its peer is ready.
    register(&mut a, "controller", "dev1").await;
    register(&mut b, "device", "dev1").await;
    assert_eq!(recv_json(&mut a).await, json!({"type": "device_ready"}));
    assert_eq!(recv_json(&mut b).await, json!({"type": "controller_ready"}));

    // A's command reaches B byte for byte.
    let command = r#"{"type":"command", "deviceId":"dev1", "cmd":"open","args":[1,2]}"#;
    send(&mut a, command).await;
    assert_eq!(recv_text(&mut b).await, command);

    // B's reply reaches A.
    let reply = r#"{"type":"command_response","deviceId":"dev1","ok":true}"#;
    send(&mut b, reply).await;
    assert_eq!(recv_text(&mut a).await, reply);

    // B leaves.  Once its cleanup has run, A's commands bounce.
    let _ = b.close(None).await;
    assert!(closed_by_server(&mut b).await);
    let mut bounced = None;
    for _ in 0..20 {
        send(&mut a, command).await;
        if let Some(text) = try_recv_text(&mut a, Duration::from_millis(200)).await {
            bounced = Some(serde_json::from_str::<Value>(&text).unwrap());
            break;
        }
    }
    assert_eq!(bounced, Some(error("device for device dev1 not connected")));
}

#[tokio::test]
async fn test_reconnecting_device_supersedes_old_connection() {
    let server = start_default().await;
    let mut a = connect_controller(&server, "sid").await;
    let mut b1 = connect_device(&server, SECRET).await;
    register(&mut a, "controller", "dev1").await;
    register(&mut b1, "device", "dev1").await;
    recv_json(&mut a).await;
    recv_json(&mut b1).await;

    // Act: a second device connection takes over the identifier.
    let mut b2 = connect_device(&server, SECRET).await;
    register(&mut b2, "device", "dev1").await;
    assert_eq!(recv_json(&mut a).await, json!({"type": "device_ready"}));
    assert_eq!(recv_json(&mut b2).await, json!({"type": "controller_ready"}));

    // Assert: commands go to the new connection only.
    send(&mut a, r#"{"type":"command","deviceId":"dev1","n":1}"#).await;
    assert_eq!(
        recv_text(&mut b2).await,
        r#"{"type":"command","deviceId":"dev1","n":1}"#
    );
    assert_eq!(try_recv_text(&mut b1, Duration::from_millis(200)).await, None);
}

#[tokio::test]
async fn test_command_without_device_reports_error_and_keeps_connection() {
    let server = start_default().await;
    let mut a = connect_controller(&server, "sid").await;
    register(&mut a, "controller", "lonely").await;

    send(&mut a, r#"{"type":"command","deviceId":"lonely"}"#).await;
    assert_eq!(
        recv_json(&mut a).await,
        error("device for device lonely not connected")
    );

    // Still usable afterwards.
    send(&mut a, "not json").await;
    assert_eq!(recv_json(&mut a).await, error("Invalid message format"));
}

// ── Admission and authorization ───────────────────────────────────────────────

#[tokio::test]
async fn test_connection_without_credentials_is_refused_and_closed() {
    let server = start_default().await;
    let url = format!("ws://{}/signaling", server.addr);
    let (mut ws, _) = connect_async(url).await.unwrap();

    assert_eq!(recv_json(&mut ws).await, error("Authentication required"));
    assert!(closed_by_server(&mut ws).await);
}

#[tokio::test]
async fn test_device_secret_with_plus_slash_and_equals_is_accepted() {
    // Arrange: a base64-style secret, written into the URL exactly as configured.
    let secret = "abc+def/ghi=";
    let server = start(RelayConfig {
        device_secret: Some(secret.to_string()),
        ping_interval: None,
        ..RelayConfig::default()
    })
    .await;
    let mut a = connect_controller(&server, "sid").await;
    let mut b = connect_device(&server, secret).await;

    // Act
    register(&mut a, "controller", "dev1").await;
    register(&mut b, "device", "dev1").await;

    // Assert
    assert_eq!(recv_json(&mut a).await, json!({"type": "device_ready"}));
    assert_eq!(recv_json(&mut b).await, json!({"type": "controller_ready"}));
}

#[tokio::test]
async fn test_device_with_wrong_secret_is_refused_and_closed() {
    let server = start_default().await;
    let mut b = connect_device(&server, "wrong").await;

    register(&mut b, "device", "dev1").await;

    assert_eq!(recv_json(&mut b).await, error("Device authentication failed"));
    assert!(closed_by_server(&mut b).await);
}

#[tokio::test]
async fn test_device_credential_cannot_register_as_controller() {
    let server = start_default().await;
    let mut b = connect_device(&server, SECRET).await;

    register(&mut b, "controller", "dev1").await;

    assert_eq!(
        recv_json(&mut b).await,
        error("Authorization failed for controller")
    );
    assert!(closed_by_server(&mut b).await);
}

#[tokio::test]
async fn test_unknown_path_is_rejected_with_404() {
    let server = start_default().await;
    let url = format!("ws://{}/elsewhere?deviceAuth={SECRET}", server.addr);

    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
        Err(other) => panic!("expected HTTP 404, got {other}"),
        Ok(_) => panic!("upgrade on an unknown path must fail"),
    }
}

// ── Protocol errors ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_route_before_register_reports_not_registered() {
    let server = start_default().await;
    let mut a = connect_controller(&server, "sid").await;

    send(&mut a, r#"{"type":"command","deviceId":"dev1"}"#).await;
    assert_eq!(recv_json(&mut a).await, error("Connection not registered"));

    // Registration still works afterwards.
    register(&mut a, "controller", "dev1").await;
    send(&mut a, r#"{"type":"command","deviceId":"dev1"}"#).await;
    assert_eq!(
        recv_json(&mut a).await,
        error("device for device dev1 not connected")
    );
}

#[tokio::test]
async fn test_binary_frame_reports_invalid_format() {
    let server = start_default().await;
    let mut a = connect_controller(&server, "sid").await;

    a.send(WsMessage::Binary(vec![1, 2, 3])).await.unwrap();

    assert_eq!(recv_json(&mut a).await, error("Invalid message format"));
}

// ── Keepalive ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_sends_keepalive_pings() {
    let server = start(RelayConfig {
        device_secret: Some(SECRET.to_string()),
        ping_interval: Some(Duration::from_millis(50)),
        ..RelayConfig::default()
    })
    .await;
    let mut b = connect_device(&server, SECRET).await;

    let got_ping = timeout(WAIT, async {
        loop {
            match b.next().await {
                Some(Ok(WsMessage::Ping(_))) => return true,
                Some(Ok(_)) => continue,
                _ => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    assert!(got_ping);
}

#[tokio::test]
async fn test_silent_device_is_dropped_after_ping_timeout() {
    // Arrange: the device registers, then never reads again, so it never
    // answers a Ping.
    let server = start(RelayConfig {
        device_secret: Some(SECRET.to_string()),
        ping_interval: Some(Duration::from_millis(50)),
        ping_timeout: Duration::from_millis(300),
        ..RelayConfig::default()
    })
    .await;
    let mut a = connect_controller(&server, "sid").await;
    let mut b = connect_device(&server, SECRET).await;
    register(&mut b, "device", "dev1").await;
    register(&mut a, "controller", "dev1").await;
    assert_eq!(recv_json(&mut a).await, json!({"type": "device_ready"}));

    // Act: the controller keeps talking (and so stays alive) until its
    // commands start bouncing.
    let command = r#"{"type":"command","deviceId":"dev1"}"#;
    let mut bounced = None;
    for _ in 0..30 {
        send(&mut a, command).await;
        if let Some(text) = try_recv_text(&mut a, Duration::from_millis(200)).await {
            bounced = Some(serde_json::from_str::<Value>(&text).unwrap());
            break;
        }
    }

    // Assert
    assert_eq!(bounced, Some(error("device for device dev1 not connected")));
    assert!(closed_by_server(&mut b).await);
}
