//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file (`--config`, or the first of the search paths)
//! - Environment variables (`HUDDLE_PORT`, `HUDDLE_ROOMS__MAX_ROOMS`, ...)

use anyhow::{Context, Result};
use huddle_core::{DuplicatePolicy, HubConfig, RegistryConfig, RelayConfig, RoomConfig};
use huddle_protocol::WireFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched when no path is given.
const CONFIG_PATHS: [&str; 3] = [
    "huddle.toml",
    "/etc/huddle/huddle.toml",
    "~/.config/huddle/huddle.toml",
];

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

    /// Room behavior.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// HTTP layer options.
    #[serde(default)]
    pub http: HttpConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Room configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomsConfig {
    /// Maximum number of rooms (0 = unlimited).
    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    /// Maximum members per room (0 = unlimited).
    #[serde(default)]
    pub max_members_per_room: usize,

    /// What happens when a member id joins a room it is already in.
    #[serde(default)]
    pub on_duplicate: DuplicatePolicy,

    /// How relayed messages and notices are rendered.
    #[serde(default)]
    pub wire_format: WireFormat,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Disconnect members silent for this long (0 = never).
    #[serde(default)]
    pub idle_timeout_ms: u64,

    /// Bound on each outgoing send in milliseconds (0 = unbounded).
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
}

/// HTTP configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Allow cross-origin requests from any origin.
    #[serde(default = "default_true")]
    pub cors: bool,
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

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_send_timeout() -> u64 {
    5_000 // 5 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            rooms: RoomsConfig::default(),
            limits: LimitsConfig::default(),
            http: HttpConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            max_rooms: default_max_rooms(),
            max_members_per_room: 0,
            on_duplicate: DuplicatePolicy::default(),
            wire_format: WireFormat::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            idle_timeout_ms: 0,
            send_timeout_ms: default_send_timeout(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { cors: true }
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
    /// Load configuration from `path`, or from the first search path that
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit path is missing, or a file or
    /// environment value cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::find_file(),
        };

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            tracing::info!("Loading configuration from {}", file.display());
            builder = builder.add_source(config::File::from(file.as_path()));
        }

        let merged = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        merged
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    fn find_file() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Core settings derived from this configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            registry: RegistryConfig {
                max_rooms: self.rooms.max_rooms,
                room: RoomConfig {
                    on_duplicate: self.rooms.on_duplicate,
                    wire_format: self.rooms.wire_format,
                    max_members: self.rooms.max_members_per_room,
                    send_timeout: millis(self.limits.send_timeout_ms),
                },
            },
            relay: RelayConfig {
                idle_timeout: millis(self.limits.idle_timeout_ms),
            },
        }
    }
}

/// Zero means "off".
fn millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.rooms.on_duplicate, DuplicatePolicy::Replace);
        assert_eq!(config.rooms.wire_format, WireFormat::Text);
        assert!(config.http.cors);
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        let addr = config.bind_addr().unwrap();
        assert_eq!(addr.port(), 8080);

        let bad = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            host = "0.0.0.0"
            port = 9000

            [rooms]
            max_members_per_room = 50
            on_duplicate = "reject"
            wire_format = "json"

            [limits]
            idle_timeout_ms = 30000
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.rooms.max_members_per_room, 50);
        assert_eq!(config.rooms.on_duplicate, DuplicatePolicy::Reject);
        assert_eq!(config.rooms.wire_format, WireFormat::Json);
        assert_eq!(config.rooms.max_rooms, 10_000);
        assert_eq!(config.limits.idle_timeout_ms, 30_000);
    }

    #[test]
    fn test_hub_config_mapping() {
        let mut config = Config::default();
        let hub = config.hub_config();
        assert!(hub.relay.idle_timeout.is_none());
        assert_eq!(
            hub.registry.room.send_timeout,
            Some(Duration::from_secs(5))
        );

        config.limits.idle_timeout_ms = 1_500;
        config.limits.send_timeout_ms = 0;
        let hub = config.hub_config();
        assert_eq!(hub.relay.idle_timeout, Some(Duration::from_millis(1_500)));
        assert!(hub.registry.room.send_timeout.is_none());
    }

    #[test]
    fn test_load_explicit_file() {
        let path = std::env::temp_dir().join(format!("huddle-test-{}.toml", std::process::id()));
        std::fs::write(&path, "port = 9123\n[http]\ncors = false\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.port, 9123);
        assert!(!config.http.cors);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("huddle-test-does-not-exist.toml");
        assert!(Config::load(Some(&path)).is_err());
    }
}
