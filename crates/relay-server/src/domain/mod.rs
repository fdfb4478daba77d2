//! Domain layer for relay-server.
//!
//! Pure configuration types.  Nothing here touches the file system, the
//! environment, or the network; `main.rs` and the infrastructure layer fill
//! these structs in.

pub mod config;
pub mod config_file;

pub use config::{ConfigError, RelayConfig};
pub use config_file::{AuthSection, FileConfig, ServerSection};
