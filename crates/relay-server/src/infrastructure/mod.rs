//! Infrastructure layer for relay-server.
//!
//! All I/O lives here.
//!
//! # Responsibilities
//!
//! - Binding the TCP listener and running the accept loop
//! - Performing the WebSocket upgrade, refusing unknown paths, and capturing
//!   the credentials presented in the upgrade request
//! - Running each connection's reader loop and writer task
//! - Reading the optional TOML config file
//!
//! # What does NOT belong here?
//!
//! - Pairing and routing decisions (that is `relay-core`)
//! - Credential parsing rules (that is the application layer)

pub mod config_store;
pub mod outbound;
pub mod ws_server;

pub use config_store::load_config_file;
pub use ws_server::{run_server, serve};
