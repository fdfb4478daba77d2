//! Message router: forwards a routed frame to the peer it is addressed to.
//!
//! # Destination rule
//!
//! ```text
//! "type":"command"   ──►  device-<deviceId>
//! anything else      ──►  controller-<deviceId>
//! ```
//!
//! Forwarding is fire-and-forget.  If the destination is missing, closed, or
//! its outbound buffer is full, the frame is dropped and the caller reports
//! [`RelayError::UnreachablePeer`] to the sender.  Nothing is queued for later
//! and nothing is retried.

use tracing::debug;

use crate::connection::ConnectionId;
use crate::error::RelayError;
use crate::protocol::messages::{DeviceId, MessageKind, Role};
use crate::registry::PeerRegistry;

/// Where a routed frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub role: Role,
    pub to: ConnectionId,
}

/// Forwards `raw` verbatim to the peer selected by `kind` and `device_id`.
///
/// `sender` is only used for logging; the sender is not checked against the
/// destination.
///
/// # Errors
///
/// [`RelayError::UnreachablePeer`] when no writable connection occupies the
/// destination key.
pub fn route(
    registry: &PeerRegistry,
    sender: ConnectionId,
    device_id: &DeviceId,
    kind: &MessageKind,
    raw: &str,
) -> Result<Delivery, RelayError> {
    let role = kind.destination();
    let unreachable = || RelayError::UnreachablePeer {
        role,
        device_id: device_id.clone(),
    };

    // The registry lock is released before sending.
    let target = registry.get(role, device_id).ok_or_else(unreachable)?;

    if !target.sink.is_open() {
        debug!("route {sender} → {role}-{device_id}: target {} not open", target.id);
        return Err(unreachable());
    }

    target.sink.send(raw.to_owned()).map_err(|e| {
        debug!("route {sender} → {role}-{device_id}: send to {} failed: {e}", target.id);
        unreachable()
    })?;

    debug!(
        "routed {} from {sender} to {role}-{device_id} ({})",
        kind.name(),
        target.id
    );

    Ok(Delivery {
        role,
        to: target.id,
    })
}
