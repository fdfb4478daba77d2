//! Outbound path of one connection: a bounded queue and the task that drains
//! it into the WebSocket.
//!
//! # How frames leave the relay (for beginners)
//!
//! The engine never writes to a socket directly.  Routing a frame to a peer
//! means pushing it onto that peer's [`ChannelSink`], which never blocks:
//!
//! ```text
//! any session task ──try_send──► [ bounded mpsc queue ] ──► writer task ──► WebSocket
//!                                                           (+ keepalive Pings)
//! ```
//!
//! A full queue or a queue whose writer is gone is reported straight back to
//! the router as [`SendError::Full`] / [`SendError::Closed`], so a slow or
//! vanished peer can never stall the connection that is talking to it.
//!
//! # Keepalive
//!
//! The reader stamps a shared [`Liveness`] marker on every inbound frame,
//! Pongs included.  Before each Ping the writer checks the marker; a peer
//! that has been silent for the whole `timeout` is half-open, and the writer
//! ends.  The connection task then runs the usual cleanup, so the peer's
//! registrations are released.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use relay_core::{PeerSink, SendError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};

/// Creates the queue for one connection.
///
/// # Panics
///
/// If `depth` is zero (tokio rejects zero-capacity channels); the config
/// validator refuses such a setting before the server starts.
pub fn channel(depth: usize) -> (ChannelSink, Outbox) {
    let (tx, rx) = mpsc::channel(depth);
    let open = Arc::new(AtomicBool::new(true));
    (
        ChannelSink {
            tx,
            open: Arc::clone(&open),
        },
        Outbox { rx, open },
    )
}

/// Producer side of a connection's queue; the engine's handle to the peer.
pub struct ChannelSink {
    tx: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
}

impl ChannelSink {
    /// Stops accepting frames.  Frames already queued are still written.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl PeerSink for ChannelSink {
    fn send(&self, frame: String) -> Result<(), SendError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }
}

impl fmt::Debug for ChannelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("open", &self.is_open())
            .field("free_slots", &self.tx.capacity())
            .finish()
    }
}

/// Consumer side of a connection's queue, owned by the writer task.
pub struct Outbox {
    rx: mpsc::Receiver<String>,
    open: Arc<AtomicBool>,
}

/// When the peer was last heard from.  Clones share the same marker.
#[derive(Debug, Clone)]
pub struct Liveness {
    origin: Instant,
    last_seen_ms: Arc<AtomicU64>,
}

impl Liveness {
    /// A marker that counts "now" as the last sign of life.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_seen_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Records activity from the peer.
    pub fn touch(&self) {
        self.last_seen_ms
            .store(millis(self.origin.elapsed()), Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last_seen)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Keepalive settings for one writer.
#[derive(Debug, Clone)]
pub struct Keepalive {
    /// Time between Pings.
    pub interval: Duration,
    /// Silence after which the peer is dropped.
    pub timeout: Duration,
    /// Activity marker stamped by the reader.
    pub liveness: Liveness,
}

/// Drains `outbox` into `sink` until told to stop, the queue is closed, a
/// write fails, or the peer stops answering keepalive Pings.
///
/// With `keepalive` set, a WebSocket Ping is written every interval unless
/// the peer has been silent for `timeout`, in which case the writer ends.
/// On `shutdown` (or when its sender is dropped) every frame still queued is
/// written first, so an error notice queued just before a close is not lost.
/// The sink always receives a Close frame last.
pub async fn run_writer<S>(
    mut sink: S,
    mut outbox: Outbox,
    keepalive: Option<Keepalive>,
    mut shutdown: oneshot::Receiver<()>,
    session: String,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: fmt::Display,
{
    let mut ticker = keepalive.as_ref().map(|keepalive| {
        let period = keepalive.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            frame = outbox.rx.recv() => {
                let Some(text) = frame else { break };
                if let Err(e) = sink.send(WsMessage::Text(text)).await {
                    debug!("session {session}: WebSocket send failed: {e}");
                    break;
                }
            }
            _ = next_tick(&mut ticker) => {
                if let Some(keepalive) = keepalive
                    .as_ref()
                    .filter(|k| k.liveness.idle() >= k.timeout)
                {
                    warn!(
                        "session {session}: no response for {:?}; closing",
                        keepalive.timeout
                    );
                    break;
                }
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new())).await {
                    debug!("session {session}: keepalive ping failed: {e}");
                    break;
                }
            }
            _ = &mut shutdown => {
                while let Ok(text) = outbox.rx.try_recv() {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }

    outbox.open.store(false, Ordering::Release);
    outbox.rx.close();
    // The peer may already have closed; either way the socket is done.
    let _ = sink.send(WsMessage::Close(None)).await;
    let _ = sink.close().await;
    debug!("session {session}: writer stopped");
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_reports_full_queue() {
        // Arrange: room for exactly one frame, no writer draining it.
        let (sink, _outbox) = channel(1);

        // Act
        let first = sink.send("a".into());
        let second = sink.send("b".into());

        // Assert
        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(SendError::Full));
        assert!(sink.is_open(), "a full queue is still open");
    }

    #[test]
    fn test_channel_sink_reports_closed_when_outbox_dropped() {
        let (sink, outbox) = channel(4);
        drop(outbox);

        assert!(!sink.is_open());
        assert_eq!(sink.send("a".into()), Err(SendError::Closed));
    }

    #[test]
    fn test_closed_channel_sink_refuses_new_frames() {
        let (sink, _outbox) = channel(4);
        sink.close();

        assert!(!sink.is_open());
        assert_eq!(sink.send("a".into()), Err(SendError::Closed));
    }

    #[tokio::test]
    async fn test_writer_flushes_queue_then_sends_close_on_shutdown() {
        // Arrange
        let (sink, outbox) = channel(8);
        sink.send("a".into()).unwrap();
        sink.send("b".into()).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel();
        stop_tx.send(()).unwrap();
        let mut written: Vec<WsMessage> = Vec::new();

        // Act
        run_writer(&mut written, outbox, None, stop_rx, "test".into()).await;

        // Assert
        assert_eq!(
            written,
            vec![
                WsMessage::Text("a".into()),
                WsMessage::Text("b".into()),
                WsMessage::Close(None),
            ]
        );
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn test_writer_stops_when_shutdown_sender_dropped() {
        let (_sink, outbox) = channel(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        drop(stop_tx);
        let mut written: Vec<WsMessage> = Vec::new();

        run_writer(&mut written, outbox, None, stop_rx, "test".into()).await;

        assert_eq!(written, vec![WsMessage::Close(None)]);
    }

    fn keepalive(interval_ms: u64, timeout_ms: u64, liveness: &Liveness) -> Option<Keepalive> {
        Some(Keepalive {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(timeout_ms),
            liveness: liveness.clone(),
        })
    }

    #[tokio::test]
    async fn test_liveness_touch_resets_idle_time() {
        let liveness = Liveness::new();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(liveness.idle() >= Duration::from_millis(50));

        liveness.clone().touch();

        assert!(liveness.idle() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_writer_sends_keepalive_pings() {
        // Arrange: a peer that is never silent long enough to be dropped.
        let (_sink, outbox) = channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let liveness = Liveness::new();
        let keepalive = keepalive(20, 10_000, &liveness);
        let writer = tokio::spawn(async move {
            let mut written: Vec<WsMessage> = Vec::new();
            run_writer(&mut written, outbox, keepalive, stop_rx, "test".into()).await;
            written
        });

        // Act
        tokio::time::sleep(Duration::from_millis(90)).await;
        stop_tx.send(()).unwrap();
        let written = writer.await.unwrap();

        // Assert
        let pings = written
            .iter()
            .filter(|m| matches!(m, WsMessage::Ping(_)))
            .count();
        assert!(pings >= 1, "expected at least one ping, got {written:?}");
        assert_eq!(written.last(), Some(&WsMessage::Close(None)));
    }

    #[tokio::test]
    async fn test_writer_closes_silent_peer_after_ping_timeout() {
        // Arrange: pings every 20 ms, nothing ever comes back.
        let (sink, outbox) = channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel::<()>();
        let liveness = Liveness::new();
        let mut written: Vec<WsMessage> = Vec::new();

        // Act: the writer must end by itself; `_stop_tx` is never used.
        let finished = tokio::time::timeout(
            Duration::from_secs(2),
            run_writer(
                &mut written,
                outbox,
                keepalive(20, 70, &liveness),
                stop_rx,
                "test".into(),
            ),
        )
        .await;

        // Assert
        assert!(finished.is_ok(), "writer kept a silent peer open");
        assert!(written.iter().any(|m| matches!(m, WsMessage::Ping(_))));
        assert_eq!(written.last(), Some(&WsMessage::Close(None)));
        assert!(!sink.is_open());
    }

    #[tokio::test]
    async fn test_writer_keeps_answering_peer_open() {
        // Arrange
        let (_sink, outbox) = channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let liveness = Liveness::new();
        let keepalive = keepalive(20, 70, &liveness);
        let writer = tokio::spawn(async move {
            let mut written: Vec<WsMessage> = Vec::new();
            run_writer(&mut written, outbox, keepalive, stop_rx, "test".into()).await;
            written
        });

        // Act: the peer answers every 10 ms for well past the timeout.
        for _ in 0..20 {
            liveness.touch();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Assert
        assert!(!writer.is_finished(), "an answering peer was dropped");
        stop_tx.send(()).unwrap();
        let written = writer.await.unwrap();
        assert_eq!(written.last(), Some(&WsMessage::Close(None)));
    }
}
