//! Signal relay entry point.
//!
//! This binary accepts long-lived WebSocket connections from *controllers*
//! (browsers holding a login session) and *devices* (holding a shared
//! secret), pairs them by `deviceId`, and relays their JSON messages to one
//! another.
//!
//! # Usage
//!
//! ```text
//! signal-relay [OPTIONS]
//!
//! Options:
//!   --config <FILE>             TOML config file
//!   --bind <IP>                 Listener address [default: 0.0.0.0]
//!   --port <PORT>               Listener port [default: 3000]
//!   --path <PATH>               WebSocket endpoint [default: /signaling]
//!   --device-secret <SECRET>    Shared secret devices must present
//!   --session-cookie <NAME>     Controller session cookie [default: connect.sid]
//!   --device-param <NAME>       Device secret query parameter [default: deviceAuth]
//!   --outbound-buffer <N>       Per-connection outbound queue depth [default: 128]
//!   --ping-interval <SECS>      Keepalive ping interval, 0 disables [default: 30]
//!   --ping-timeout <SECS>       Drop peers silent this long while pinging [default: 60]
//!   --log-level <FILTER>        Log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Where settings come from
//!
//! Highest precedence first:
//!
//! 1. Command-line flags.
//! 2. `RELAY_*` environment variables (same names as the flags, upper-cased).
//! 3. The TOML file named by `--config` / `RELAY_CONFIG`.
//! 4. Built-in defaults ([`RelayConfig::default`]).
//!
//! # Architecture overview
//!
//! ```text
//! controller (browser)         device
//!        ↕  JSON over WebSocket  ↕
//! signal-relay  ← this process
//!   domain/          RelayConfig, config file schema
//!   application/     credentials, session driver
//!   infrastructure/  accept loop, writer tasks, config file loading
//!   relay-core       registry, pairing, routing
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relay_server::domain::{FileConfig, RelayConfig};
use relay_server::infrastructure::{load_config_file, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Controller/device pairing relay over WebSocket.
///
/// Every option is optional so that an unset flag falls through to the
/// config file and then to the built-in default.
#[derive(Debug, Parser)]
#[command(
    name = "signal-relay",
    about = "WebSocket relay that pairs controllers with devices",
    version
)]
struct Cli {
    /// TOML config file.
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to bind the WebSocket server to.
    #[arg(long, env = "RELAY_BIND")]
    bind: Option<IpAddr>,

    /// TCP port for the WebSocket server.
    #[arg(long, env = "RELAY_PORT")]
    port: Option<u16>,

    /// Request path upgraded to a WebSocket; other paths get 404.
    #[arg(long, env = "RELAY_PATH")]
    path: Option<String>,

    /// Shared secret devices present in the connect URL.
    ///
    /// Without one, no device can register.
    #[arg(long, env = "RELAY_DEVICE_SECRET", hide_env_values = true)]
    device_secret: Option<String>,

    /// Name of the cookie carrying a controller's session token.
    #[arg(long, env = "RELAY_SESSION_COOKIE")]
    session_cookie: Option<String>,

    /// Name of the query parameter carrying a device's secret.
    #[arg(long, env = "RELAY_DEVICE_PARAM")]
    device_param: Option<String>,

    /// Frames that may queue per connection before routes to it fail.
    #[arg(long, env = "RELAY_OUTBOUND_BUFFER")]
    outbound_buffer: Option<usize>,

    /// Keepalive ping interval in seconds; 0 disables pings.
    #[arg(long, env = "RELAY_PING_INTERVAL")]
    ping_interval: Option<u64>,

    /// Seconds a pinged connection may stay silent before it is closed.
    #[arg(long, env = "RELAY_PING_TIMEOUT")]
    ping_timeout: Option<u64>,

    /// Log filter used when `RUST_LOG` is not set (e.g. `debug`).
    #[arg(long, env = "RELAY_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Builds the final [`RelayConfig`]: defaults, then the config file, then
    /// flags and environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed, or if
    /// the merged settings fail validation.
    fn into_relay_config(self) -> anyhow::Result<RelayConfig> {
        let file = match &self.config {
            Some(path) => load_config_file(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => FileConfig::default(),
        };

        let config = self.apply_to(file.apply_to(RelayConfig::default()));
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Overlays the flags that were given onto `base`.
    fn apply_to(self, mut base: RelayConfig) -> RelayConfig {
        if let Some(ip) = self.bind {
            base.bind_addr.set_ip(ip);
        }
        if let Some(port) = self.port {
            base.bind_addr.set_port(port);
        }
        if let Some(path) = self.path {
            base.path = path;
        }
        if self.device_secret.is_some() {
            base.device_secret = self.device_secret;
        }
        if let Some(cookie) = self.session_cookie {
            base.session_cookie = cookie;
        }
        if let Some(param) = self.device_param {
            base.device_param = param;
        }
        if let Some(depth) = self.outbound_buffer {
            base.outbound_buffer = depth;
        }
        if let Some(secs) = self.ping_interval {
            base.ping_interval = RelayConfig::ping_interval_from_secs(secs);
        }
        if let Some(secs) = self.ping_timeout {
            base.ping_timeout = Duration::from_secs(secs);
        }
        if let Some(level) = self.log_level {
            base.log_level = level;
        }
        base
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and merged with the config file into a
///    [`RelayConfig`].
/// 2. `tracing_subscriber` is initialised.  `RUST_LOG` wins; otherwise the
///    configured log level is used.
/// 3. A Ctrl+C handler is spawned; it clears a shared `AtomicBool`.
/// 4. [`run_server`] binds the listener and serves connections until the flag
///    is cleared.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_relay_config()?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "signal relay starting: bind={}, path={}",
        config.bind_addr, config.path
    );
    // `RelayConfig`'s Debug impl redacts the secret and session tokens.
    tracing::debug!("effective configuration: {config:?}");

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; initiating graceful shutdown");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    // ── Main server loop ───────────────────────────────────────────────────────
    run_server(config, running).await?;

    info!("signal relay stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
