//! Schema of the optional TOML config file.
//!
//! Every key is optional.  A key that is present overrides the built-in
//! default; CLI flags and `RELAY_*` environment variables override the file
//! in turn (see `main.rs`).
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 3000
//! path = "/signaling"
//! outbound_buffer = 128
//! ping_interval_secs = 30
//! ping_timeout_secs = 60
//! log_level = "info"
//!
//! [auth]
//! device_secret = "your-device-secret"
//! session_cookie = "connect.sid"
//! device_param = "deviceAuth"
//! allowed_sessions = ["s:abc123"]
//! ```

use std::net::IpAddr;
use std::time::Duration;

use serde::Deserialize;

use super::config::{ConfigError, RelayConfig};

/// Root of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub auth: AuthSection,
}

/// `[server]` table: listener and transport settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ServerSection {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub outbound_buffer: Option<usize>,
    /// `0` disables keepalive pings.
    pub ping_interval_secs: Option<u64>,
    pub ping_timeout_secs: Option<u64>,
    pub log_level: Option<String>,
}

/// `[auth]` table: credential names and the values they are checked against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AuthSection {
    pub device_secret: Option<String>,
    pub session_cookie: Option<String>,
    pub device_param: Option<String>,
    #[serde(default)]
    pub allowed_sessions: Vec<String>,
}

impl FileConfig {
    /// Parses the TOML text of a config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] if the text is not valid TOML or a value has
    /// the wrong type.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Overlays the keys present in the file onto `base`.
    pub fn apply_to(self, mut base: RelayConfig) -> RelayConfig {
        let FileConfig { server, auth } = self;

        if let Some(ip) = server.bind {
            base.bind_addr.set_ip(ip);
        }
        if let Some(port) = server.port {
            base.bind_addr.set_port(port);
        }
        if let Some(path) = server.path {
            base.path = path;
        }
        if let Some(depth) = server.outbound_buffer {
            base.outbound_buffer = depth;
        }
        if let Some(secs) = server.ping_interval_secs {
            base.ping_interval = RelayConfig::ping_interval_from_secs(secs);
        }
        if let Some(secs) = server.ping_timeout_secs {
            base.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = server.log_level {
            base.log_level = level;
        }

        if auth.device_secret.is_some() {
            base.device_secret = auth.device_secret;
        }
        if let Some(cookie) = auth.session_cookie {
            base.session_cookie = cookie;
        }
        if let Some(param) = auth.device_param {
            base.device_param = param;
        }
        if !auth.allowed_sessions.is_empty() {
            base.allowed_sessions = auth.allowed_sessions;
        }
        base
    }
}
