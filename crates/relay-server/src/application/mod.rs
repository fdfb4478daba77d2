//! Application layer for relay-server.
//!
//! Sits between the socket code and the [`relay_core`] engine.
//!
//! # Responsibilities
//!
//! - Reading the controller session cookie and the device query parameter
//!   out of the WebSocket upgrade request
//! - Building the [`relay_core::Relay`] and its authorization gate from config
//! - Driving one connection's frames through the engine, with cleanup that
//!   runs exactly once however the connection ends
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or spawning tasks (that is infrastructure)
//! - WebSocket framing (handled by tokio-tungstenite)

pub mod credentials;
pub mod session;

pub use credentials::{cookie_value, extract_credentials, query_value};
pub use session::{build_relay, Session};
