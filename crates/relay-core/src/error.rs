//! Error taxonomy for the relay engine.
//!
//! Every variant maps to exactly one `{"type":"error"}` notification sent back
//! to the connection that caused it (see [`RelayError::notice`]).  Whether the
//! connection survives the error is decided by
//! [`RelayError::closes_connection`]: authorization failures end the
//! connection, everything else leaves it open for the client to try again.

use thiserror::Error;

use crate::protocol::messages::{DeviceId, Role, ServerNotice};

/// Why a frame was rejected as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    /// Not JSON, not a JSON object, or not a text frame.
    #[error("Invalid message format")]
    InvalidFormat,
    /// `type` was `register` but `role` or `deviceId` was missing or invalid.
    #[error("Invalid registration message")]
    InvalidRegistration,
    /// Neither a registration nor a message carrying a `deviceId`.
    #[error("Message missing deviceId")]
    MissingDeviceId,
}

/// Errors produced while handling a connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The connection presented neither a session nor a device credential.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// The gate refused a registration for `role`.
    #[error("Authorization failed for {role}")]
    AuthorizationDenied { role: Role },

    /// A device registration presented the wrong shared secret (or none).
    #[error("Device authentication failed")]
    DeviceCredentialMismatch,

    /// The frame could not be classified.
    #[error("{0}")]
    MalformedMessage(MalformedReason),

    /// The connection tried to route traffic before registering.
    #[error("Connection not registered")]
    NotRegistered,

    /// No writable connection occupies `(role, device_id)`.
    #[error("{role} for device {device_id} not connected")]
    UnreachablePeer { role: Role, device_id: DeviceId },
}

impl RelayError {
    /// Returns `true` if the connection must be closed after reporting this
    /// error.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            RelayError::AuthenticationRequired
                | RelayError::AuthorizationDenied { .. }
                | RelayError::DeviceCredentialMismatch
        )
    }

    /// The `error` notification reported to the offending connection.
    pub fn notice(&self) -> ServerNotice {
        ServerNotice::error(self.to_string())
    }
}
