//! Lifecycle manager: cleanup when a connection goes away.
//!
//! Closing a connection is the only cancellation primitive in the relay.  On
//! close every registry entry held by the connection is removed; nobody else
//! is told (there is no "peer left" notification).  A route that races with
//! the close either reaches the connection before its sink shuts or fails as
//! not writable; it never observes a half-removed entry.

use tracing::info;

use crate::connection::Connection;
use crate::registry::{PeerKey, PeerRegistry};

/// Marks `connection` closed and removes all of its registry entries.
///
/// Returns the keys that were freed.  Safe to call more than once; later calls
/// free nothing.
pub fn release(registry: &PeerRegistry, connection: &mut Connection) -> Vec<PeerKey> {
    connection.mark_closed();
    let removed = registry.remove_by_handle(connection.id());
    for key in &removed {
        info!("client {key} disconnected ({})", connection.id());
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::auth::Credentials;
    use crate::mock::MockSink;
    use crate::protocol::messages::{DeviceId, Role};
    use crate::registry::PeerEntry;

    #[test]
    fn test_release_removes_entries_and_closes_connection() {
        // Arrange
        let registry = PeerRegistry::new();
        let sink = Arc::new(MockSink::new());
        let mut conn = Connection::new(Credentials::session("sid"), sink.clone());
        let key = PeerKey::new(Role::Controller, DeviceId::new("dev1").unwrap());
        registry.put(
            key.clone(),
            PeerEntry {
                id: conn.id(),
                sink,
            },
        );
        conn.mark_registered(key.clone());

        // Act
        let removed = release(&registry, &mut conn);

        // Assert
        assert_eq!(removed, vec![key]);
        assert!(registry.is_empty());
        assert!(conn.is_closed());
    }

    #[test]
    fn test_release_twice_is_harmless() {
        let registry = PeerRegistry::new();
        let mut conn = Connection::new(Credentials::session("sid"), Arc::new(MockSink::new()));

        assert!(release(&registry, &mut conn).is_empty());
        assert!(release(&registry, &mut conn).is_empty());
        assert!(conn.is_closed());
    }
}
