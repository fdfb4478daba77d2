//! relay-server library crate.
//!
//! This crate puts the [`relay_core`] pairing engine on the network: it
//! accepts WebSocket connections from controllers and devices, works out what
//! credentials each one presented during the HTTP upgrade, and feeds every
//! text frame to the engine.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Controllers / devices (JSON over WebSocket)
//!         ↕
//! [relay-server]
//!   ├── domain/           RelayConfig, TOML config file schema
//!   ├── application/      Credentials from the upgrade request, session driver
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop, handshake, per-connection reader
//!         ├── outbound/   Bounded channel + writer task (PeerSink impl)
//!         └── config_store/ Reading the TOML file from disk
//!         ↕
//! relay-core (registry, pairing, routing)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `relay-core` only.
//! - `infrastructure` depends on all other layers plus `tokio` and `tungstenite`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: credential extraction and the per-connection session.
pub mod application;

/// Infrastructure layer: WebSocket server, writer tasks, config file access.
pub mod infrastructure;
