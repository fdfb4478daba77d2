//! Pairing coordinator: tells both sides when a pair becomes complete.
//!
//! A pair for identifier *I* is complete while both `controller-I` and
//! `device-I` are in the registry.  Completeness is not stored anywhere; it is
//! re-derived from the [`PutOutcome`](crate::registry::PutOutcome) of every
//! registration.
//!
//! Notifications are at-least-once: if either side re-registers (for example
//! after a reconnect), both sides are notified again.  Clients must tolerate
//! duplicate `device_ready` / `controller_ready` messages.

use tracing::{debug, info};

use crate::connection::ConnectionId;
use crate::protocol::codec::encode_notice;
use crate::protocol::messages::{DeviceId, Role, ServerNotice};
use crate::registry::{PeerEntry, PeerKey};

/// A pair that has just become (or been re-confirmed as) complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReady {
    pub device_id: DeviceId,
    pub controller: ConnectionId,
    pub device: ConnectionId,
}

/// Called right after `registrant` was stored under `key`.
///
/// If `counterpart` (the occupant of the complementary key) is present, sends
/// `device_ready` to the controller and `controller_ready` to the device, in
/// that order, and returns the completed pair.  A notice that cannot be
/// delivered is logged and otherwise ignored.
pub fn complete_pairing(
    key: &PeerKey,
    registrant: &PeerEntry,
    counterpart: Option<&PeerEntry>,
) -> Option<PairReady> {
    let counterpart = counterpart?;

    let (controller, device) = match key.role {
        Role::Controller => (registrant, counterpart),
        Role::Device => (counterpart, registrant),
    };

    notify_ready(controller, Role::Controller, &key.device_id);
    notify_ready(device, Role::Device, &key.device_id);

    info!(
        "pair complete for device {}: controller={} device={}",
        key.device_id, controller.id, device.id
    );

    Some(PairReady {
        device_id: key.device_id.clone(),
        controller: controller.id,
        device: device.id,
    })
}

fn notify_ready(entry: &PeerEntry, role: Role, device_id: &DeviceId) {
    let notice = ServerNotice::ready_for(role);
    if let Err(e) = entry.sink.send(encode_notice(&notice)) {
        debug!(
            "ready notice for {role} of device {device_id} not delivered to {}: {e}",
            entry.id
        );
    }
}
