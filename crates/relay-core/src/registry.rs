//! PeerRegistry: the live directory of registered connections.
//!
//! Maps a [`PeerKey`] (role + deviceId) to the connection currently occupying
//! it.  This is the only shared mutable state in the relay: every connection
//! task reads and writes it concurrently, so every operation takes the same
//! lock.
//!
//! # Invariants
//!
//! - At most one connection per key.  A later `put` for the same key silently
//!   replaces the earlier one (last writer wins).  The replaced connection is
//!   not closed; it simply stops receiving routed traffic.
//! - The lock is never held across an `.await` (there are none in this crate)
//!   nor across a send.  Callers get cloned `Arc` sinks and send after the
//!   lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::connection::{ConnectionId, PeerSink};
use crate::protocol::messages::{DeviceId, Role};

/// Registry key: one role for one pairing identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerKey {
    pub role: Role,
    pub device_id: DeviceId,
}

impl PeerKey {
    pub fn new(role: Role, device_id: DeviceId) -> Self {
        Self { role, device_id }
    }

    /// The key of the peer this key pairs with.
    pub fn complement(&self) -> PeerKey {
        PeerKey::new(self.role.peer(), self.device_id.clone())
    }
}

impl fmt::Display for PeerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.device_id)
    }
}

/// A registered connection as stored in the registry.
#[derive(Clone)]
pub struct PeerEntry {
    pub id: ConnectionId,
    pub sink: Arc<dyn PeerSink>,
}

impl fmt::Debug for PeerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerEntry")
            .field("id", &self.id)
            .field("open", &self.sink.is_open())
            .finish()
    }
}

/// Result of [`PeerRegistry::put`].
#[derive(Debug)]
pub struct PutOutcome {
    /// The connection that held the key before, if it was a different one.
    pub superseded: Option<ConnectionId>,
    /// The entry holding the complementary key at the moment of the put.
    pub counterpart: Option<PeerEntry>,
}

/// Thread-safe registry of live peers.
///
/// Cheap to share: wrap it (or the [`crate::Relay`] that owns it) in an `Arc`.
#[derive(Default)]
pub struct PeerRegistry {
    entries: Mutex<HashMap<PeerKey, PeerEntry>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the map.  A poisoned lock is recovered: every mutation is a
    /// single `HashMap` call, so the map is never left half-updated.
    fn lock(&self) -> MutexGuard<'_, HashMap<PeerKey, PeerEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores `entry` under `key`, replacing any previous occupant.
    ///
    /// The complementary key is looked up under the same lock acquisition, so
    /// the pairing check can never observe a half-applied registration.
    pub fn put(&self, key: PeerKey, entry: PeerEntry) -> PutOutcome {
        let mut entries = self.lock();
        let new_id = entry.id;
        let superseded = entries
            .insert(key.clone(), entry)
            .map(|previous| previous.id)
            .filter(|previous| *previous != new_id);
        let counterpart = entries.get(&key.complement()).cloned();
        PutOutcome {
            superseded,
            counterpart,
        }
    }

    /// Returns the entry occupying `(role, device_id)`, if any.
    pub fn get(&self, role: Role, device_id: &DeviceId) -> Option<PeerEntry> {
        self.lock()
            .get(&PeerKey::new(role, device_id.clone()))
            .cloned()
    }

    /// Returns the id of the connection occupying `key`, if any.
    pub fn occupant(&self, key: &PeerKey) -> Option<ConnectionId> {
        self.lock().get(key).map(|entry| entry.id)
    }

    /// Removes every entry held by `id` and returns the freed keys.
    ///
    /// Keys that `id` once held but that were since superseded by another
    /// connection are left alone.  Finding nothing is not an error.
    pub fn remove_by_handle(&self, id: ConnectionId) -> Vec<PeerKey> {
        let mut entries = self.lock();
        let mut removed: Vec<PeerKey> = entries
            .iter()
            .filter(|(_, entry)| entry.id == id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &removed {
            entries.remove(key);
        }
        removed.sort();
        removed
    }

    /// Number of occupied keys.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Sorted snapshot of occupied keys, for diagnostics and tests.
    pub fn snapshot(&self) -> Vec<(PeerKey, ConnectionId)> {
        let mut keys: Vec<_> = self
            .lock()
            .iter()
            .map(|(key, entry)| (key.clone(), entry.id))
            .collect();
        keys.sort();
        keys
    }
}

impl fmt::Debug for PeerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerRegistry")
            .field("entries", &self.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSink;

    fn dev(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    fn entry() -> PeerEntry {
        PeerEntry {
            id: ConnectionId::new(),
            sink: Arc::new(MockSink::new()),
        }
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = PeerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(Role::Device, &dev("dev1")).is_none());
    }

    #[test]
    fn test_put_then_get_returns_entry() {
        // Arrange
        let registry = PeerRegistry::new();
        let e = entry();
        let id = e.id;

        // Act
        registry.put(PeerKey::new(Role::Device, dev("dev1")), e);

        // Assert
        assert_eq!(registry.get(Role::Device, &dev("dev1")).unwrap().id, id);
        assert!(registry.get(Role::Controller, &dev("dev1")).is_none());
    }

    #[test]
    fn test_put_same_key_supersedes_previous_occupant() {
        let registry = PeerRegistry::new();
        let first = entry();
        let second = entry();
        let (first_id, second_id) = (first.id, second.id);
        let key = PeerKey::new(Role::Controller, dev("dev1"));

        assert!(registry.put(key.clone(), first).superseded.is_none());
        let outcome = registry.put(key.clone(), second);

        assert_eq!(outcome.superseded, Some(first_id));
        assert_eq!(registry.occupant(&key), Some(second_id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_put_same_connection_twice_is_not_a_supersede() {
        let registry = PeerRegistry::new();
        let e = entry();
        let key = PeerKey::new(Role::Controller, dev("dev1"));

        registry.put(key.clone(), e.clone());
        let outcome = registry.put(key, e);

        assert!(outcome.superseded.is_none());
    }

    #[test]
    fn test_put_reports_counterpart_when_present() {
        let registry = PeerRegistry::new();
        let controller = entry();
        let controller_id = controller.id;
        registry.put(PeerKey::new(Role::Controller, dev("dev1")), controller);

        let outcome = registry.put(PeerKey::new(Role::Device, dev("dev1")), entry());

        assert_eq!(outcome.counterpart.map(|c| c.id), Some(controller_id));
    }

    #[test]
    fn test_put_reports_no_counterpart_for_other_device_id() {
        let registry = PeerRegistry::new();
        registry.put(PeerKey::new(Role::Controller, dev("dev1")), entry());

        let outcome = registry.put(PeerKey::new(Role::Device, dev("dev2")), entry());

        assert!(outcome.counterpart.is_none());
    }

    #[test]
    fn test_remove_by_handle_removes_every_key_of_that_handle() {
        // Arrange: one connection registered under two keys
        let registry = PeerRegistry::new();
        let e = entry();
        let id = e.id;
        registry.put(PeerKey::new(Role::Controller, dev("a")), e.clone());
        registry.put(PeerKey::new(Role::Controller, dev("b")), e);
        registry.put(PeerKey::new(Role::Device, dev("a")), entry());

        // Act
        let removed = registry.remove_by_handle(id);

        // Assert
        assert_eq!(
            removed,
            vec![
                PeerKey::new(Role::Controller, dev("a")),
                PeerKey::new(Role::Controller, dev("b")),
            ]
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_by_handle_leaves_superseding_connection_alone() {
        let registry = PeerRegistry::new();
        let old = entry();
        let old_id = old.id;
        let new = entry();
        let new_id = new.id;
        let key = PeerKey::new(Role::Device, dev("dev1"));
        registry.put(key.clone(), old);
        registry.put(key.clone(), new);

        let removed = registry.remove_by_handle(old_id);

        assert!(removed.is_empty());
        assert_eq!(registry.occupant(&key), Some(new_id));
    }

    #[test]
    fn test_remove_by_unknown_handle_is_noop() {
        let registry = PeerRegistry::new();
        registry.put(PeerKey::new(Role::Device, dev("dev1")), entry());

        assert!(registry.remove_by_handle(ConnectionId::new()).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_concurrent_puts_keep_one_entry_per_key() {
        // Arrange: many threads race to register the same two keys
        let registry = Arc::new(PeerRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let role = if i % 2 == 0 { Role::Controller } else { Role::Device };
                    for _ in 0..100 {
                        registry.put(PeerKey::new(role, dev("shared")), entry());
                    }
                })
            })
            .collect();

        // Act
        for handle in handles {
            handle.join().unwrap();
        }

        // Assert
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_peer_key_display_matches_role_dash_id() {
        assert_eq!(
            PeerKey::new(Role::Device, dev("dev1")).to_string(),
            "device-dev1"
        );
    }
}
