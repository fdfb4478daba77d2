//! Classification of inbound frames and encoding of relay notices.
//!
//! The relay never deserializes a client message into a full typed struct:
//! payloads are opaque.  [`classify`] only looks at the three envelope fields
//! (`type`, `role`, `deviceId`) and hands back a borrowed view of the original
//! text so the router can forward it byte-for-byte.
//!
//! # Classification rules
//!
//! | Frame                                              | Result                       |
//! |----------------------------------------------------|------------------------------|
//! | not JSON, or JSON that is not an object            | `MalformedMessage(InvalidFormat)` |
//! | `type == "register"` with valid `role`+`deviceId`  | [`Inbound::Register`]        |
//! | `type == "register"` otherwise                     | `MalformedMessage(InvalidRegistration)` |
//! | any other object with a non-empty string `deviceId`| [`Inbound::Routed`]          |
//! | anything else                                      | `MalformedMessage(MissingDeviceId)` |

use serde_json::{Map, Value};

use crate::error::{MalformedReason, RelayError};
use crate::protocol::messages::{
    DeviceId, MessageKind, Role, ServerNotice, DEVICE_ID_FIELD, REGISTER_TYPE,
};

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound<'a> {
    /// A request to occupy `(role, device_id)` in the registry.
    Register { role: Role, device_id: DeviceId },
    /// Traffic for the peer of `device_id`.  `raw` is the untouched frame.
    Routed {
        kind: MessageKind,
        device_id: DeviceId,
        raw: &'a str,
    },
}

/// Classifies a raw text frame.
///
/// # Errors
///
/// Returns [`RelayError::MalformedMessage`] when the frame is neither a
/// well-formed registration nor a message carrying a `deviceId`.
pub fn classify(raw: &str) -> Result<Inbound<'_>, RelayError> {
    // Deserializing into a `Map` (rather than a derived struct) rejects JSON
    // arrays outright instead of matching struct fields positionally.
    let envelope: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|_| RelayError::MalformedMessage(MalformedReason::InvalidFormat))?;

    let tag = envelope.get("type").and_then(Value::as_str);

    if tag == Some(REGISTER_TYPE) {
        let role = envelope
            .get("role")
            .and_then(Value::as_str)
            .and_then(Role::from_wire);
        let device_id = device_id_of(&envelope);
        return match (role, device_id) {
            (Some(role), Some(device_id)) => Ok(Inbound::Register { role, device_id }),
            _ => Err(RelayError::MalformedMessage(
                MalformedReason::InvalidRegistration,
            )),
        };
    }

    match device_id_of(&envelope) {
        Some(device_id) => Ok(Inbound::Routed {
            kind: MessageKind::from_tag(tag),
            device_id,
            raw,
        }),
        None => Err(RelayError::MalformedMessage(MalformedReason::MissingDeviceId)),
    }
}

fn device_id_of(envelope: &Map<String, Value>) -> Option<DeviceId> {
    envelope
        .get(DEVICE_ID_FIELD)
        .and_then(Value::as_str)
        .and_then(DeviceId::new)
}

/// Encodes a relay notice as a JSON text frame.
pub fn encode_notice(notice: &ServerNotice) -> String {
    // `ServerNotice` holds only strings and unit variants; this cannot fail.
    serde_json::to_string(notice)
        .unwrap_or_else(|_| String::from(r#"{"type":"error","message":"internal error"}"#))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
