//! WebSocket server: accept loop and per-connection task management.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener on the configured address.
//! 2. Accepting incoming TCP connections from controllers and devices.
//! 3. Upgrading each connection to a WebSocket, refusing any request path
//!    other than the configured endpoint with `404 Not Found`.
//! 4. Capturing the session cookie / device query parameter from the upgrade
//!    request and running admission.
//! 5. Running a reader loop (inbound frames → relay engine) and a writer task
//!    (outbound queue → WebSocket, plus keepalive Pings) per connection.  A
//!    peer silent for longer than `ping_timeout` is dropped.
//! 6. Releasing the connection's registry entries exactly once when it ends.
//! 7. Stopping the accept loop when the `running` flag is cleared.
//!
//! # Scalability
//!
//! Each connection runs in its own Tokio task.  The registry lock inside the
//! engine is held only for map operations, never across an `.await`, so one
//! slow connection cannot hold up any other.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use futures_util::{Stream, StreamExt};
use relay_core::{Credentials, Disposition, Relay};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header::COOKIE, StatusCode},
        Error as WsError, Message as WsMessage,
    },
};
use tracing::{debug, error, info, warn};

use crate::application::{build_relay, extract_credentials, Session};
use crate::domain::RelayConfig;
use crate::infrastructure::outbound::{self, run_writer, Keepalive, Liveness};

// ── Public API ────────────────────────────────────────────────────────────────

/// Binds `config.bind_addr` and serves connections until `running` is set to
/// `false`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot be bound (e.g., the port is
/// already in use or the process lacks permission to bind).
pub async fn run_server(config: RelayConfig, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind WebSocket listener on {}", config.bind_addr))?;

    serve(listener, config, running).await
}

/// Runs the accept loop on an already-bound listener.
///
/// Split out from [`run_server`] so callers (and tests) can bind port `0` and
/// learn the real address before the loop starts.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn serve(
    listener: TcpListener,
    config: RelayConfig,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local_addr = listener
        .local_addr()
        .context("failed to read listener address")?;
    info!("signal relay listening on ws://{local_addr}{}", config.path);

    let relay = Arc::new(build_relay(&config));
    let config = Arc::new(config);

    loop {
        if !running.load(Ordering::Relaxed) {
            info!("shutdown flag set; stopping accept loop");
            break;
        }

        // Short timeout so the loop notices the shutdown flag even when no
        // one is connecting.
        match timeout(Duration::from_millis(200), listener.accept()).await {
            Ok(Ok((stream, peer_addr))) => {
                debug!("new TCP connection from {peer_addr}");
                let cfg = Arc::clone(&config);
                let relay = Arc::clone(&relay);
                tokio::spawn(async move {
                    handle_connection(stream, peer_addr, cfg, relay).await;
                });
            }
            Ok(Err(e)) => {
                // Transient accept error (e.g., too many open file descriptors).
                error!("accept error: {e}");
            }
            Err(_) => {}
        }
    }

    Ok(())
}

// ── Per-connection handler ────────────────────────────────────────────────────

/// Entry point of each per-connection task; logs how the connection ended.
async fn handle_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    relay: Arc<Relay>,
) {
    match run_connection(raw_stream, peer_addr, config, relay).await {
        Ok(()) => info!("connection {peer_addr} closed"),
        Err(e) => warn!("connection {peer_addr} closed with error: {e:#}"),
    }
}

/// Runs the complete lifecycle of one WebSocket connection.
///
/// # Errors
///
/// Returns an error if the WebSocket handshake fails, including when the
/// request path is not the configured endpoint.
async fn run_connection(
    raw_stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    relay: Arc<Relay>,
) -> anyhow::Result<()> {
    // ── Step 1: Handshake and credential capture ──────────────────────────────
    let mut credentials: Option<Credentials> = None;
    let ws_stream = accept_hdr_async(raw_stream, |request: &Request, response: Response| {
        if request.uri().path() != config.path {
            return Err(not_found());
        }
        credentials = Some(credentials_from_request(request, &config));
        Ok(response)
    })
    .await
    .with_context(|| format!("WebSocket handshake failed with {peer_addr}"))?;
    let credentials = credentials.unwrap_or_default();

    debug!("WebSocket session established: {peer_addr}");

    // ── Step 2: Outbound queue and writer task ────────────────────────────────
    let (ws_tx, mut ws_rx) = ws_stream.split();
    let (sink, outbox) = outbound::channel(config.outbound_buffer);
    let sink = Arc::new(sink);
    let (stop_tx, stop_rx) = oneshot::channel();
    let label = peer_addr.to_string();
    let liveness = Liveness::new();
    let keepalive = config.ping_interval.map(|interval| Keepalive {
        interval,
        timeout: config.ping_timeout,
        liveness: liveness.clone(),
    });
    let mut writer = tokio::spawn(run_writer(ws_tx, outbox, keepalive, stop_rx, label.clone()));

    // ── Step 3: Admission ─────────────────────────────────────────────────────
    let mut session = match Session::open(relay, credentials, sink.clone()) {
        Ok(session) => session,
        Err(e) => {
            // The error notice is queued; let the writer flush it, then close.
            info!("connection {peer_addr} refused: {e}");
            sink.close();
            let _ = stop_tx.send(());
            let _ = writer.await;
            return Ok(());
        }
    };
    info!("connection {peer_addr} admitted as {}", session.id());

    // ── Step 4: Read until either side is done ────────────────────────────────
    let writer_finished = tokio::select! {
        _ = read_frames(&mut ws_rx, &mut session, &liveness, &label) => false,
        _ = &mut writer => true,
    };

    // ── Step 5: Cleanup ───────────────────────────────────────────────────────
    sink.close();
    let released = session.close();
    debug!("connection {peer_addr}: released {} registration(s)", released.len());
    if !writer_finished {
        let _ = stop_tx.send(());
        let _ = writer.await;
    }

    Ok(())
}

/// Feeds inbound frames to `session` until the peer closes, the stream
/// fails, or the relay decides the connection must end.  Every frame counts
/// as a sign of life on `liveness`.
async fn read_frames<S>(ws_rx: &mut S, session: &mut Session, liveness: &Liveness, label: &str)
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(next) = ws_rx.next().await {
        if next.is_ok() {
            liveness.touch();
        }
        let disposition = match next {
            Ok(WsMessage::Text(text)) => session.on_text(&text),
            Ok(WsMessage::Binary(_)) => session.on_binary(),
            // tungstenite answers Pings itself; Pongs answer our keepalive.
            Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {
                Disposition::Continue
            }
            Ok(WsMessage::Close(_)) => {
                debug!("connection {label}: Close frame received");
                break;
            }
            Err(WsError::ConnectionClosed | WsError::Protocol(_)) => {
                debug!("connection {label}: WebSocket closed");
                break;
            }
            Err(e) => {
                warn!("connection {label}: WebSocket error: {e}");
                break;
            }
        };

        if disposition == Disposition::Close {
            debug!("connection {label}: closed by relay");
            break;
        }
    }
}

// ── Handshake helpers ─────────────────────────────────────────────────────────

fn credentials_from_request(request: &Request, config: &RelayConfig) -> Credentials {
    let cookies: Vec<&str> = request
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    extract_credentials(request.uri().query(), &cookies, config)
}

fn not_found() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("Not Found".to_string()));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

// ── Tests ─────────────────────────────────────────────────────────────────────
