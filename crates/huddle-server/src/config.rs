//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`huddle.toml`, `/etc/huddle/huddle.toml`,
//!   `~/.config/huddle/huddle.toml`)
//! - Environment variables (`HUDDLE_PORT`, `HUDDLE_LIMITS__MAX_CONNECTIONS`, ...)
//!   which take precedence over the file

use anyhow::{Context, Result};
use huddle_core::{HubConfig, RepeatIdentify};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Config file locations, in search order.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "HUDDLE";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Hub behavior.
    #[serde(default)]
    pub hub: HubSection,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for the WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of open connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound event size in bytes.
    #[serde(default = "default_max_event_size")]
    pub max_event_size: usize,

    /// Events buffered per connection before deliveries are dropped.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Ping interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Close a connection after this long without any inbound frame.
    #[serde(default = "default_heartbeat_timeout")]
    pub timeout_ms: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Hub behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubSection {
    /// What a repeated `init` for the already-bound user does.
    #[serde(default)]
    pub repeat_identify: RepeatIdentify,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/api/messages/ws".to_string()
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_event_size() -> usize {
    huddle_protocol::MAX_EVENT_SIZE
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_heartbeat_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_heartbeat_timeout() -> u64 {
    60_000 // 60 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            metrics: MetricsConfig::default(),
            hub: HubSection::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_event_size: default_max_event_size(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            timeout_ms: default_heartbeat_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from the first config file found, with
    /// `HUDDLE_*` environment overrides applied on top.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override has the wrong type.
    pub fn load() -> Result<Self> {
        let mut builder = ::config::Config::builder();

        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            let path = Path::new(expanded.as_ref());
            if path.exists() {
                builder = builder.add_source(::config::File::from(path));
                break;
            }
        }

        builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            repeat_identify: self.hub.repeat_identify,
            max_event_size: self.limits.max_event_size,
        }
    }

    /// Interval between server pings.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms.max(1))
    }

    /// How long a connection may stay silent before it is closed.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.timeout_ms.max(1))
    }
}
