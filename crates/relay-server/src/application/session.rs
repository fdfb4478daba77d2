//! Per-connection session driver.
//!
//! A [`Session`] owns one admitted [`Connection`] and a handle to the shared
//! [`Relay`].  The transport feeds it frames; the session hands them to the
//! engine and reports whether the socket should stay open.
//!
//! Registry cleanup happens when the session is closed or dropped, whichever
//! comes first, so a reader task that bails out early (socket error, panic,
//! task cancellation) still leaves no stale entries behind.

use std::sync::Arc;

use relay_core::{
    Connection, ConnectionId, Credentials, Disposition, PeerKey, PeerSink, Relay, RelayError,
    SessionAllowList, SharedSecretGate,
};
use tracing::{info, warn};

use crate::domain::RelayConfig;

/// Builds the relay and its authorization gate from `config`.
///
/// Controllers are checked against `allowed_sessions` when the list is
/// non-empty; otherwise any non-empty session cookie is accepted.
pub fn build_relay(config: &RelayConfig) -> Relay {
    let secret = config.device_secret.clone();
    let gate = if config.allowed_sessions.is_empty() {
        SharedSecretGate::new(secret)
    } else {
        info!(
            "controller sessions restricted to {} allowed token(s)",
            config.allowed_sessions.len()
        );
        SharedSecretGate::with_sessions(
            secret,
            SessionAllowList::new(config.allowed_sessions.iter().cloned()),
        )
    };
    if !gate.accepts_devices() {
        warn!("no device secret configured; every device registration will be refused");
    }
    Relay::new(gate)
}

/// One admitted connection being driven through the relay.
pub struct Session {
    relay: Arc<Relay>,
    connection: Connection,
}

impl Session {
    /// Runs admission for a new connection.
    ///
    /// # Errors
    ///
    /// [`RelayError::AuthenticationRequired`] when neither credential was
    /// presented.  The error notice is already queued on `sink`; the caller
    /// should flush it and close the socket.
    pub fn open(
        relay: Arc<Relay>,
        credentials: Credentials,
        sink: Arc<dyn PeerSink>,
    ) -> Result<Self, RelayError> {
        let connection = relay.accept(credentials, sink)?;
        Ok(Self { relay, connection })
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Handles one inbound text frame.
    pub fn on_text(&mut self, frame: &str) -> Disposition {
        self.relay.handle_frame(&mut self.connection, frame)
    }

    /// Handles one inbound binary frame.
    pub fn on_binary(&mut self) -> Disposition {
        self.relay.handle_unsupported_frame(&mut self.connection)
    }

    /// Ends the session, returning the registry keys it still held.
    pub fn close(mut self) -> Vec<PeerKey> {
        self.release()
    }

    fn release(&mut self) -> Vec<PeerKey> {
        if self.connection.is_closed() {
            return Vec::new();
        }
        self.relay.disconnect(&mut self.connection)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
