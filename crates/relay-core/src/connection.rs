//! Per-connection state and the handle the engine uses to reach a connection.
//!
//! # Connection lifecycle
//!
//! ```text
//! accepted (admitted) ──► Unregistered ──► Registered { keys } ──► Closed
//!          │                    │                                    ▲
//!          └─ denied: no        └──────── disconnect ────────────────┘
//!             Connection is
//!             ever created
//! ```
//!
//! A [`Connection`] only exists once the authorization gate has admitted it,
//! so "authorized at admission" is a property of the type rather than a flag.
//! Routing from an `Unregistered` connection is refused, and a `Closed`
//! connection ignores every further frame.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::auth::Credentials;
use crate::protocol::codec::encode_notice;
use crate::protocol::messages::ServerNotice;
use crate::registry::PeerKey;

/// Opaque identity of one accepted connection.
///
/// Two handles are "the same connection" iff their ids are equal; the
/// registry compares ids, never sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection has gone away (or is going away).
    #[error("connection closed")]
    Closed,
    /// The connection's outbound buffer is full.
    #[error("outbound buffer full")]
    Full,
}

/// The send side of a live connection, as seen by the engine.
///
/// Implementations must never block: a send either enqueues the frame for
/// the transport immediately or fails.  The WebSocket transport backs this
/// with a bounded Tokio channel; tests use [`crate::mock::MockSink`].
pub trait PeerSink: Send + Sync {
    /// Queues `frame` (a complete JSON text frame) for delivery.
    ///
    /// # Errors
    ///
    /// [`SendError::Closed`] once the connection is closing or closed,
    /// [`SendError::Full`] when the transport cannot accept more frames.
    fn send(&self, frame: String) -> Result<(), SendError>;

    /// Returns `true` while the connection is open for writing.
    fn is_open(&self) -> bool;
}

/// Explicit lifecycle state of a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Admitted but has not registered yet.  Inert for pairing and routing.
    Unregistered,
    /// Holds at least one registry key.
    Registered {
        /// Every `(role, deviceId)` this connection has claimed.  A key may
        /// since have been superseded by another connection.
        keys: BTreeSet<PeerKey>,
    },
    /// Terminal.
    Closed,
}

/// One admitted connection.
///
/// Owned by the transport task that reads from the socket; the registry only
/// stores the id and a clone of the sink.
pub struct Connection {
    id: ConnectionId,
    credentials: Credentials,
    sink: Arc<dyn PeerSink>,
    state: ConnectionState,
}

impl Connection {
    pub(crate) fn new(credentials: Credentials, sink: Arc<dyn PeerSink>) -> Self {
        Self {
            id: ConnectionId::new(),
            credentials,
            sink,
            state: ConnectionState::Unregistered,
        }
    }

    /// The connection's unique handle.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Credentials captured when the connection was established.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Current lifecycle state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_registered(&self) -> bool {
        matches!(self.state, ConnectionState::Registered { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed)
    }

    pub(crate) fn sink(&self) -> &Arc<dyn PeerSink> {
        &self.sink
    }

    /// Records that this connection now occupies `key`.  No-op once closed.
    pub(crate) fn mark_registered(&mut self, key: PeerKey) {
        if let ConnectionState::Registered { keys } = &mut self.state {
            keys.insert(key);
        } else if self.state == ConnectionState::Unregistered {
            self.state = ConnectionState::Registered {
                keys: BTreeSet::from([key]),
            };
        }
    }

    /// Moves the connection to `Closed`, returning the state it left.
    pub(crate) fn mark_closed(&mut self) -> ConnectionState {
        std::mem::replace(&mut self.state, ConnectionState::Closed)
    }

    /// Sends a relay notice to this connection.
    pub fn notify(&self, notice: &ServerNotice) -> Result<(), SendError> {
        let result = self.sink.send(encode_notice(notice));
        if let Err(e) = &result {
            debug!("connection {}: notice not delivered: {e}", self.id);
        }
        result
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("credentials", &self.credentials)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSink;
    use crate::protocol::messages::{DeviceId, Role};

    fn key(role: Role, id: &str) -> PeerKey {
        PeerKey::new(role, DeviceId::new(id).unwrap())
    }

    fn connection() -> Connection {
        Connection::new(Credentials::default(), Arc::new(MockSink::new()))
    }

    #[test]
    fn test_new_connection_starts_unregistered() {
        let conn = connection();
        assert_eq!(conn.state(), &ConnectionState::Unregistered);
        assert!(!conn.is_registered());
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(connection().id(), connection().id());
    }

    #[test]
    fn test_mark_registered_accumulates_keys() {
        // Arrange
        let mut conn = connection();

        // Act
        conn.mark_registered(key(Role::Controller, "a"));
        conn.mark_registered(key(Role::Controller, "b"));

        // Assert
        match conn.state() {
            ConnectionState::Registered { keys } => assert_eq!(keys.len(), 2),
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_connection_cannot_register_again() {
        let mut conn = connection();
        conn.mark_registered(key(Role::Device, "a"));

        let previous = conn.mark_closed();
        conn.mark_registered(key(Role::Device, "b"));

        assert!(matches!(previous, ConnectionState::Registered { .. }));
        assert!(conn.is_closed());
    }

    #[test]
    fn test_notify_writes_encoded_notice_to_sink() {
        let sink = Arc::new(MockSink::new());
        let conn = Connection::new(Credentials::default(), sink.clone());

        conn.notify(&ServerNotice::DeviceReady).unwrap();

        assert_eq!(sink.frames(), vec![r#"{"type":"device_ready"}"#.to_string()]);
    }

    #[test]
    fn test_notify_on_closed_sink_reports_closed() {
        let sink = Arc::new(MockSink::new());
        sink.close();
        let conn = Connection::new(Credentials::default(), sink);

        assert_eq!(conn.notify(&ServerNotice::DeviceReady), Err(SendError::Closed));
    }
}
