//! JSON message types for the signalling protocol.
//!
//! Every frame on the wire is a JSON object with a `"type"` field.  Only three
//! shapes matter to the relay itself:
//!
//! ```json
//! {"type":"register","role":"device","deviceId":"dev1"}
//! {"type":"command","deviceId":"dev1","cmd":"open"}
//! {"type":"device_ready"}
//! ```
//!
//! Everything else a client sends is an opaque payload: the relay reads the
//! `type` and `deviceId` fields to decide where it goes and forwards the
//! original text untouched.
//!
//! Clients send registrations and routed traffic; the relay itself only ever
//! originates [`ServerNotice`]s.

use std::fmt;

use serde::{Deserialize, Serialize};

/// `type` tag of a registration message.
pub const REGISTER_TYPE: &str = "register";

/// `type` tag of a controller → device message.
pub const COMMAND_TYPE: &str = "command";

/// Name of the field carrying the pairing identifier.
pub const DEVICE_ID_FIELD: &str = "deviceId";

// ── Role ──────────────────────────────────────────────────────────────────────

/// Which side of a pairing a connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The operator side (typically a browser) that issues commands.
    Controller,
    /// The controlled side that executes commands and reports back.
    Device,
}

impl Role {
    /// Returns the complementary role: the one this role pairs with.
    pub fn peer(self) -> Role {
        match self {
            Role::Controller => Role::Device,
            Role::Device => Role::Controller,
        }
    }

    /// Returns the wire spelling of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Controller => "controller",
            Role::Device => "device",
        }
    }

    /// Parses the wire spelling of a role.  Matching is exact and
    /// case-sensitive.
    pub fn from_wire(s: &str) -> Option<Role> {
        match s {
            "controller" => Some(Role::Controller),
            "device" => Some(Role::Device),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── DeviceId ──────────────────────────────────────────────────────────────────

/// The shared pairing key a controller and a device both register under.
///
/// Always non-empty.  Beyond that the relay attaches no meaning to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a `DeviceId`, or `None` if `id` is empty.
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        if id.is_empty() {
            None
        } else {
            Some(Self(id))
        }
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── MessageKind ───────────────────────────────────────────────────────────────

/// Classification of a routed (non-registration) message.
///
/// The split is deliberately binary: the literal `command` tag goes to the
/// device, and every other tag (including a missing one) is treated as
/// feedback for the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Controller → device traffic (`"type":"command"`).
    Command,
    /// Device → controller traffic.  `tag` is the `type` field if it was a
    /// string, kept only for logging.
    Feedback { tag: Option<String> },
}

impl MessageKind {
    /// Builds the kind from the raw `type` tag of a message.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(COMMAND_TYPE) => MessageKind::Command,
            other => MessageKind::Feedback {
                tag: other.map(str::to_owned),
            },
        }
    }

    /// The role a message of this kind is delivered to.
    pub fn destination(&self) -> Role {
        match self {
            MessageKind::Command => Role::Device,
            MessageKind::Feedback { .. } => Role::Controller,
        }
    }

    /// Short name for log lines.  Never includes payload content.
    pub fn name(&self) -> &str {
        match self {
            MessageKind::Command => COMMAND_TYPE,
            MessageKind::Feedback { tag: Some(tag) } => tag.as_str(),
            MessageKind::Feedback { tag: None } => "<untyped>",
        }
    }
}

// ── Relay → client notifications ──────────────────────────────────────────────

/// Messages the relay itself originates.
///
/// # Serde representation
///
/// ```json
/// {"type":"device_ready"}
/// {"type":"controller_ready"}
/// {"type":"error","message":"device for device dev1 not connected"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    /// Sent to the controller when the device for its identifier is present.
    DeviceReady,
    /// Sent to the device when the controller for its identifier is present.
    ControllerReady,
    /// Something the sender did could not be completed.
    Error {
        /// Human-readable description.
        message: String,
    },
}

impl ServerNotice {
    /// The notice a connection in `role` receives once its peer is present.
    pub fn ready_for(role: Role) -> Self {
        match role {
            Role::Controller => ServerNotice::DeviceReady,
            Role::Device => ServerNotice::ControllerReady,
        }
    }

    /// Convenience constructor for an error notice.
    pub fn error(message: impl Into<String>) -> Self {
        ServerNotice::Error {
            message: message.into(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
