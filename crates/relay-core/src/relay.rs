//! Relay: the per-frame entry point tying the engine together.
//!
//! The transport owns one [`Connection`] per socket and calls, in order:
//!
//! 1. [`Relay::accept`] once, with the credentials from the connect request.
//! 2. [`Relay::handle_frame`] for every inbound text frame (and
//!    [`Relay::handle_unsupported_frame`] for anything that is not text).
//! 3. [`Relay::disconnect`] exactly once when the socket goes away.
//!
//! Every call returns immediately.  Nothing in here waits for another
//! connection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::auth::{AuthorizationGate, Credentials};
use crate::connection::{Connection, PeerSink};
use crate::error::{MalformedReason, RelayError};
use crate::lifecycle;
use crate::pairing;
use crate::protocol::codec::{classify, encode_notice, Inbound};
use crate::protocol::messages::{DeviceId, Role};
use crate::registry::{PeerEntry, PeerKey, PeerRegistry};
use crate::router;

/// What the transport should do after a frame was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// Flush pending output and close the connection.
    Close,
}

/// The pairing-and-relay engine.
///
/// Owns the [`PeerRegistry`] and the [`AuthorizationGate`].  Share it between
/// connection tasks with an `Arc`; each test can build its own.
pub struct Relay {
    registry: PeerRegistry,
    gate: Box<dyn AuthorizationGate>,
}

impl Relay {
    pub fn new(gate: impl AuthorizationGate + 'static) -> Self {
        Self {
            registry: PeerRegistry::new(),
            gate: Box::new(gate),
        }
    }

    /// Read access to the live registry.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Admits a new connection.
    ///
    /// # Errors
    ///
    /// [`RelayError::AuthenticationRequired`] when the gate refuses the
    /// credentials.  The `error` notice has already been queued on `sink`; the
    /// transport should close the socket.
    pub fn accept(
        &self,
        credentials: Credentials,
        sink: Arc<dyn PeerSink>,
    ) -> Result<Connection, RelayError> {
        if !self.gate.admit(&credentials) {
            let err = RelayError::AuthenticationRequired;
            // Best effort: the socket is about to be closed either way.
            let _ = sink.send(encode_notice(&err.notice()));
            return Err(err);
        }
        let connection = Connection::new(credentials, sink);
        debug!("admitted connection {}", connection.id());
        Ok(connection)
    }

    /// Handles one inbound text frame.
    pub fn handle_frame(&self, connection: &mut Connection, raw: &str) -> Disposition {
        if connection.is_closed() {
            return Disposition::Close;
        }
        match self.dispatch(connection, raw) {
            Ok(()) => Disposition::Continue,
            Err(err) => self.reject(connection, err),
        }
    }

    /// Handles an inbound frame that is not text (the protocol is JSON only).
    pub fn handle_unsupported_frame(&self, connection: &mut Connection) -> Disposition {
        if connection.is_closed() {
            return Disposition::Close;
        }
        self.reject(
            connection,
            RelayError::MalformedMessage(MalformedReason::InvalidFormat),
        )
    }

    /// Removes every registry entry held by `connection` and marks it closed.
    pub fn disconnect(&self, connection: &mut Connection) -> Vec<PeerKey> {
        lifecycle::release(&self.registry, connection)
    }

    fn dispatch(&self, connection: &mut Connection, raw: &str) -> Result<(), RelayError> {
        match classify(raw)? {
            Inbound::Register { role, device_id } => self.register(connection, role, device_id),
            Inbound::Routed {
                kind,
                device_id,
                raw,
            } => {
                if !connection.is_registered() {
                    return Err(RelayError::NotRegistered);
                }
                router::route(&self.registry, connection.id(), &device_id, &kind, raw)
                    .map(|_| ())
            }
        }
    }

    fn register(
        &self,
        connection: &mut Connection,
        role: Role,
        device_id: DeviceId,
    ) -> Result<(), RelayError> {
        if !self
            .gate
            .authorize(role, &device_id, connection.credentials())
        {
            return Err(match role {
                Role::Device => RelayError::DeviceCredentialMismatch,
                Role::Controller => RelayError::AuthorizationDenied { role },
            });
        }

        let key = PeerKey::new(role, device_id);
        let entry = PeerEntry {
            id: connection.id(),
            sink: Arc::clone(connection.sink()),
        };

        let outcome = self.registry.put(key.clone(), entry.clone());
        connection.mark_registered(key.clone());

        if let Some(previous) = outcome.superseded {
            info!("{key}: connection {previous} superseded by {}", connection.id());
        }
        info!(
            "registered {role} for device {} ({})",
            key.device_id,
            connection.id()
        );

        pairing::complete_pairing(&key, &entry, outcome.counterpart.as_ref());
        Ok(())
    }

    /// Reports `err` to the connection and decides whether it survives.
    fn reject(&self, connection: &mut Connection, err: RelayError) -> Disposition {
        // `notify` already logs a failed delivery.
        let _ = connection.notify(&err.notice());

        if err.closes_connection() {
            warn!("connection {}: {err}; closing", connection.id());
            lifecycle::release(&self.registry, connection);
            Disposition::Close
        } else {
            debug!("connection {}: {err}", connection.id());
            Disposition::Continue
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
