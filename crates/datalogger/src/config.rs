//! Data logger configuration
//!
//! One typed [`LoggerConfig`] loaded from an optional TOML file and
//! `OBD_`-prefixed environment variables (`OBD_CONNECTION__KIND=wifi`).
//! Updates flow through [`ConfigStore`] only.

use crate::protocol::AdapterProtocol;
use config::{Config, Environment, File, FileFormat};
use obd_query::QuerySettings;
use obd_transport::{FramingConfig, RfcommBinding};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Adapter transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    #[default]
    Bluetooth,
    Wifi,
    Usb,
}

/// Adapter connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Transport to use (default: bluetooth)
    pub kind: ConnectionType,
    /// Bonded Bluetooth adapter, by name or address (default: empty, not configured)
    pub adapter_id: String,
    /// `rfcomm bind` ttys of bonded adapters (default: none)
    pub rfcomm_bindings: Vec<RfcommBinding>,
    /// Wi-Fi adapter host (default: 192.168.0.10)
    pub host: String,
    /// Wi-Fi adapter port (default: 35000)
    pub port: u16,
    /// TCP connect timeout in milliseconds (default: 2000)
    pub connect_timeout_ms: u64,
    /// Network the Wi-Fi adapter is expected on (default: empty, no check)
    pub target_ssid: String,
    /// USB-serial baud rate (default: 38400)
    pub baud_rate: u32,
    /// Delay between close and connect on reconnect (default: 500 ms)
    pub settle_delay_ms: u64,
    /// Read attempts per USB frame (default: 25)
    pub usb_read_attempts: usize,
    /// Timeout of each USB read attempt in milliseconds (default: 15)
    pub usb_read_timeout_ms: u64,
    /// USB frame buffer capacity in bytes (default: 96)
    pub usb_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: ConnectionType::Bluetooth,
            adapter_id: String::new(),
            rfcomm_bindings: Vec::new(),
            host: "192.168.0.10".to_string(),
            port: 35000,
            connect_timeout_ms: 2000,
            target_ssid: String::new(),
            baud_rate: 38400,
            settle_delay_ms: 500,
            usb_read_attempts: 25,
            usb_read_timeout_ms: 15,
            usb_buffer_size: 96,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Frame reader limits for the USB transport
    pub fn framing(&self) -> FramingConfig {
        FramingConfig {
            buffer_size: self.usb_buffer_size,
            read_attempts: self.usb_read_attempts,
            read_timeout: Duration::from_millis(self.usb_read_timeout_ms),
        }
    }
}

/// One header the adapter is configured with for a service mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSetting {
    /// Service mode, e.g. `"01"` or `"22"`
    pub mode: String,
    /// Header value sent with `ATSH`, e.g. `"7E0"`
    pub header: String,
}

/// Adapter initialization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Bus protocol (default: AUTO)
    pub protocol: AdapterProtocol,
    /// Pause after the init sequence in milliseconds (default: 0)
    pub delay_after_init_ms: u64,
    /// Per-mode headers (default: none)
    pub headers: Vec<HeaderSetting>,
    /// Read VIN and other device properties on connect (default: true)
    pub fetch_device_properties: bool,
    /// Read the supported PID bitmaps on connect (default: true)
    pub fetch_supported_pids: bool,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            protocol: AdapterProtocol::Auto,
            delay_after_init_ms: 0,
            headers: Vec::new(),
            fetch_device_properties: true,
            fetch_supported_pids: true,
        }
    }
}

/// Engine tuning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdjustmentsConfig {
    /// Query several PIDs per request (default: true)
    pub batch_enabled: bool,
    /// Persist formula results between sessions (default: false)
    pub cache_enabled: bool,
    /// Formula cache file (default: formula_cache.json)
    pub cache_location: PathBuf,
    /// Produce synthetic values instead of querying (default: false)
    pub generator_enabled: bool,
    /// Adapt the adapter response timeout to observed latency (default: true)
    pub adaptive_timeout_enabled: bool,
    /// How often the adaptive timeout is re-evaluated in milliseconds (default: 5000)
    pub adaptive_timeout_check_interval_ms: u64,
    /// Lower bound of the adaptive timeout in milliseconds (default: 20)
    pub min_timeout_ms: u64,
}

impl Default for AdjustmentsConfig {
    fn default() -> Self {
        Self {
            batch_enabled: true,
            cache_enabled: false,
            cache_location: PathBuf::from("formula_cache.json"),
            generator_enabled: false,
            adaptive_timeout_enabled: true,
            adaptive_timeout_check_interval_ms: 5000,
            min_timeout_ms: 20,
        }
    }
}

/// Auto-reconnect policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect after a session error (default: true)
    pub enabled: bool,
    /// Attempts before a terminal error is reported (default: 3)
    pub max_retries: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
        }
    }
}

/// Metrics collector settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Track readings for PIDs outside the current filter (default: false)
    pub force_append: bool,
    /// Capacity of the engine event channel (default: 1024)
    pub event_channel_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            force_append: false,
            event_channel_capacity: 1024,
        }
    }
}

/// Complete data logger configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub connection: ConnectionConfig,
    pub init: InitConfig,
    pub adjustments: AdjustmentsConfig,
    pub reconnect: ReconnectConfig,
    pub metrics: CollectorConfig,
    pub query: QuerySettings,
}

impl LoggerConfig {
    /// Load from an optional TOML file overlaid with `OBD_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }
        let config = builder
            .add_source(
                Environment::with_prefix("OBD")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }
}

/// Current configuration plus its single change-notification path
#[derive(Debug, Clone)]
pub struct ConfigStore {
    tx: Arc<watch::Sender<Arc<LoggerConfig>>>,
}

impl ConfigStore {
    pub fn new(config: LoggerConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(config));
        Self { tx: Arc::new(tx) }
    }

    /// Snapshot of the current configuration
    pub fn current(&self) -> Arc<LoggerConfig> {
        self.tx.borrow().clone()
    }

    /// Replace the configuration and notify subscribers
    pub fn publish(&self, config: LoggerConfig) {
        debug!("Publishing configuration update");
        self.tx.send_replace(Arc::new(config));
    }

    /// Receiver notified on every [`ConfigStore::publish`]
    pub fn subscribe(&self) -> watch::Receiver<Arc<LoggerConfig>> {
        self.tx.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = LoggerConfig::from_toml("").unwrap();
        assert_eq!(config, LoggerConfig::default());
        assert_eq!(config.connection.kind, ConnectionType::Bluetooth);
        assert_eq!(config.connection.port, 35000);
        assert_eq!(config.reconnect.max_retries, 3);
        assert_eq!(config.metrics.event_channel_capacity, 1024);
    }

    #[test]
    fn test_partial_sections() {
        let config = LoggerConfig::from_toml(
            r#"
            [connection]
            kind = "wifi"
            host = "192.0.0.2"
            port = 35007

            [init]
            protocol = "CAN_11B_500K"
            headers = [{ mode = "22", header = "DA10F1" }]

            [reconnect]
            max_retries = 0

            [query]
            individual_per_view = true
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.kind, ConnectionType::Wifi);
        assert_eq!(config.connection.host, "192.0.0.2");
        assert_eq!(config.connection.port, 35007);
        assert_eq!(config.connection.connect_timeout_ms, 2000);
        assert_eq!(config.init.protocol, AdapterProtocol::Can11Bit500);
        assert_eq!(config.init.headers[0].header, "DA10F1");
        assert!(config.init.fetch_supported_pids);
        assert!(config.reconnect.enabled);
        assert_eq!(config.reconnect.max_retries, 0);
        assert!(config.query.individual_per_view);
        assert_eq!(config.query.fast_pids, QuerySettings::default().fast_pids);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = std::env::temp_dir().join(format!("obd-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("logger.toml");
        std::fs::write(&path, "[connection]\nkind = \"usb\"\nbaud_rate = 9600\n").unwrap();

        std::env::set_var("OBD_CONNECTION__BAUD_RATE", "115200");
        let config = LoggerConfig::load(Some(&path)).unwrap();
        std::env::remove_var("OBD_CONNECTION__BAUD_RATE");

        assert_eq!(config.connection.kind, ConnectionType::Usb);
        assert_eq!(config.connection.baud_rate, 115200);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = LoggerConfig::load(Some(Path::new("/nonexistent/logger.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_framing_from_connection() {
        let framing = ConnectionConfig::default().framing();
        assert_eq!(framing.buffer_size, 96);
        assert_eq!(framing.read_attempts, 25);
        assert_eq!(framing.read_timeout, Duration::from_millis(15));
    }

    #[tokio::test]
    async fn test_store_notifies_subscribers() {
        let store = ConfigStore::default();
        let mut rx = store.subscribe();

        let mut updated = LoggerConfig::default();
        updated.reconnect.max_retries = 7;
        store.publish(updated);

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().reconnect.max_retries, 7);
        assert_eq!(store.current().reconnect.max_retries, 7);
    }
}
