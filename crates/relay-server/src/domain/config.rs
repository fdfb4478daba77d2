//! Relay configuration.
//!
//! [`RelayConfig`] is the single source of truth for runtime settings.  It is
//! assembled once at startup (CLI flags over environment variables over the
//! optional TOML file over [`RelayConfig::default`]) and then shared across
//! every session task behind an `Arc`.

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default WebSocket port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default endpoint path for the WebSocket upgrade.
pub const DEFAULT_PATH: &str = "/signaling";

/// Default name of the cookie that carries a controller's session token.
pub const DEFAULT_SESSION_COOKIE: &str = "connect.sid";

/// Default name of the query parameter that carries a device's secret.
pub const DEFAULT_DEVICE_PARAM: &str = "deviceAuth";

/// Default depth of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 128;

/// Default keepalive ping interval in seconds.
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Default silence, in seconds, after which a pinged peer is dropped.
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 60;

/// Error type for building a [`RelayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting has a value the server cannot run with.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// All runtime configuration for the relay server.
///
/// # Example
///
/// ```rust
/// use relay_server::domain::RelayConfig;
///
/// let cfg = RelayConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 3000);
/// assert_eq!(cfg.path, "/signaling");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address and port the WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Request path that is upgraded to a WebSocket.  Any other path is
    /// refused with `404 Not Found` during the handshake.
    pub path: String,

    /// Shared secret devices present in the query string.  `None` means no
    /// device can register.
    pub device_secret: Option<String>,

    /// Cookie carrying the controller's session token.
    pub session_cookie: String,

    /// Query parameter carrying the device's secret.
    pub device_param: String,

    /// Session tokens accepted for controllers.  Empty means any non-empty
    /// session cookie is accepted.
    pub allowed_sessions: Vec<String>,

    /// Frames that may queue for one connection before routes to it start
    /// failing as unreachable.
    pub outbound_buffer: usize,

    /// WebSocket Ping interval; `None` disables keepalive pings.
    pub ping_interval: Option<Duration>,

    /// How long a connection may stay silent (no Pong or any other frame)
    /// while pings are enabled before it is closed.
    pub ping_timeout: Duration,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for RelayConfig {
    /// | Field            | Default          |
    /// |------------------|------------------|
    /// | bind_addr        | `0.0.0.0:3000`   |
    /// | path             | `/signaling`     |
    /// | device_secret    | none             |
    /// | session_cookie   | `connect.sid`    |
    /// | device_param     | `deviceAuth`     |
    /// | allowed_sessions | empty            |
    /// | outbound_buffer  | 128              |
    /// | ping_interval    | 30 seconds       |
    /// | ping_timeout     | 60 seconds       |
    /// | log_level        | `info`           |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            path: DEFAULT_PATH.to_string(),
            device_secret: None,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            device_param: DEFAULT_DEVICE_PARAM.to_string(),
            allowed_sessions: Vec::new(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            ping_interval: Some(Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)),
            ping_timeout: Duration::from_secs(DEFAULT_PING_TIMEOUT_SECS),
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Converts a seconds count into a ping interval; `0` disables pings.
    pub fn ping_interval_from_secs(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    /// Checks the settings the server cannot start without.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "path",
                reason: "must start with '/'",
            });
        }
        if self.session_cookie.is_empty() {
            return Err(ConfigError::Invalid {
                field: "session_cookie",
                reason: "must not be empty",
            });
        }
        if self.device_param.is_empty() {
            return Err(ConfigError::Invalid {
                field: "device_param",
                reason: "must not be empty",
            });
        }
        // tokio's bounded channel panics on a zero capacity.
        if self.outbound_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "outbound_buffer",
                reason: "must be at least 1",
            });
        }
        // A Pong can only arrive after the Ping it answers.
        if let Some(interval) = self.ping_interval {
            if self.ping_timeout <= interval {
                return Err(ConfigError::Invalid {
                    field: "ping_timeout",
                    reason: "must be longer than ping_interval",
                });
            }
        }
        Ok(())
    }
}

// Secrets and session tokens must never reach the logs.
impl fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayConfig")
            .field("bind_addr", &self.bind_addr)
            .field("path", &self.path)
            .field(
                "device_secret",
                &self.device_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("session_cookie", &self.session_cookie)
            .field("device_param", &self.device_param)
            .field("allowed_sessions", &self.allowed_sessions.len())
            .field("outbound_buffer", &self.outbound_buffer)
            .field("ping_interval", &self.ping_interval)
            .field("ping_timeout", &self.ping_timeout)
            .field("log_level", &self.log_level)
            .finish()
    }
}
