//! # relay-core
//!
//! Pairing-and-relay engine for the signal relay.  A *controller* and a
//! *device* that share an identifier (the `deviceId`) each register with the
//! relay; once both are present the relay tells each side that its peer is
//! ready and then forwards their messages to one another verbatim.
//!
//! This crate has no dependencies on sockets, async runtimes, or HTTP.  The
//! transport (see the `relay-server` crate) hands every connection to the
//! engine as a [`PeerSink`] and feeds it inbound text frames one at a time.
//!
//! # Architecture overview (for beginners)
//!
//! ```text
//! inbound frame ──► Relay::handle_frame
//!                     ├── protocol   classify: register / routed / malformed
//!                     ├── auth       may this connection take this role?
//!                     ├── registry   (role, deviceId) → live connection
//!                     ├── pairing    both roles present? send *_ready
//!                     └── router     command → device, anything else → controller
//! connection closed ──► Relay::disconnect ── lifecycle: prune the registry
//! ```
//!
//! - **`protocol`** – The JSON messages that travel over the wire, and the
//!   classification of a raw inbound frame.
//! - **`connection`** – Per-connection state and the [`PeerSink`] handle the
//!   engine uses to talk back to a connection.
//! - **`auth`** – The authorization gate: admission and per-role checks.
//! - **`registry`**, **`pairing`**, **`router`**, **`lifecycle`** – The live
//!   peer directory and the three operations built on top of it.
//! - **`relay`** – The entry point that ties everything together.
//! - **`mock`** – An in-memory [`PeerSink`] for tests and benchmarks.

pub mod auth;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod mock;
pub mod pairing;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::Relay` instead of `relay_core::relay::Relay`.
pub use auth::{
    AuthorizationGate, Credentials, SessionAllowList, SessionPresence, SessionVerifier,
    SharedSecretGate,
};
pub use connection::{Connection, ConnectionId, ConnectionState, PeerSink, SendError};
pub use error::RelayError;
pub use protocol::messages::{DeviceId, Role, ServerNotice};
pub use registry::{PeerKey, PeerRegistry};
pub use relay::{Disposition, Relay};
