//! Connection selection
//!
//! Maps the configured connection type to a transport and checks its
//! preconditions up front. Failures become exactly one [`Signal`] and no
//! connection, so the orchestrator never sees a half-built transport.

use crate::config::{ConnectionConfig, ConnectionType};
use crate::signal::{Signal, SignalBus};
use async_trait::async_trait;
use obd_transport::{
    AdapterConnection, BluetoothConnection, BluetoothRadio, SerialPortProber, UsbSerialConnection,
    WifiConnection,
};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Host network state
#[async_trait]
pub trait NetworkInfo: Send + Sync {
    /// SSID of the Wi-Fi network the host is joined to, if any
    async fn current_ssid(&self) -> Option<String>;
}

/// Reads the SSID with `iwgetid -r`
#[derive(Debug, Default, Clone, Copy)]
pub struct IwgetidNetworkInfo;

#[async_trait]
impl NetworkInfo for IwgetidNetworkInfo {
    async fn current_ssid(&self) -> Option<String> {
        let output = match Command::new("iwgetid").arg("-r").output().await {
            Ok(output) => output,
            Err(e) => {
                debug!("iwgetid unavailable: {}", e);
                return None;
            }
        };
        if !output.status.success() {
            return None;
        }
        let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!ssid.is_empty()).then_some(ssid)
    }
}

/// Chooses and validates the transport for a session
pub struct ConnectionManager {
    radio: Arc<dyn BluetoothRadio>,
    network: Arc<dyn NetworkInfo>,
    serial: Arc<dyn SerialPortProber>,
    signals: Arc<SignalBus>,
}

impl ConnectionManager {
    pub fn new(
        radio: Arc<dyn BluetoothRadio>,
        network: Arc<dyn NetworkInfo>,
        serial: Arc<dyn SerialPortProber>,
        signals: Arc<SignalBus>,
    ) -> Self {
        Self {
            radio,
            network,
            serial,
            signals,
        }
    }

    /// Resolve the configured transport, or emit one signal and return `None`
    pub async fn obtain(&self, config: &ConnectionConfig) -> Option<Box<dyn AdapterConnection>> {
        info!("Obtaining {:?} connection", config.kind);
        let connection = match config.kind {
            ConnectionType::Bluetooth => self.bluetooth(config),
            ConnectionType::Wifi => self.wifi(config).await,
            ConnectionType::Usb => self.usb(config),
        };
        match connection {
            Ok(connection) => {
                debug!("Selected adapter {}", connection.descriptor());
                Some(connection)
            }
            Err(signal) => {
                warn!("Adapter precondition failed: {:?}", signal);
                self.signals.emit(signal);
                None
            }
        }
    }

    fn bluetooth(&self, config: &ConnectionConfig) -> Result<Box<dyn AdapterConnection>, Signal> {
        if config.adapter_id.trim().is_empty() {
            return Err(Signal::AdapterNotConfigured {
                kind: ConnectionType::Bluetooth,
            });
        }
        let connection = BluetoothConnection::new(
            &config.adapter_id,
            self.radio.clone(),
            config.settle_delay(),
        );
        connection.resolve().map_err(|e| Signal::DeviceNotFound {
            reason: e.to_string(),
        })?;
        Ok(Box::new(connection))
    }

    async fn wifi(&self, config: &ConnectionConfig) -> Result<Box<dyn AdapterConnection>, Signal> {
        if config.host.trim().is_empty() {
            return Err(Signal::AdapterNotConfigured {
                kind: ConnectionType::Wifi,
            });
        }
        if !config.target_ssid.is_empty() {
            let actual = self.network.current_ssid().await;
            if actual.as_deref() != Some(config.target_ssid.as_str()) {
                return Err(Signal::WrongNetwork {
                    expected: config.target_ssid.clone(),
                    actual,
                });
            }
        }
        Ok(Box::new(WifiConnection::new(
            &config.host,
            config.port,
            config.connect_timeout(),
            config.settle_delay(),
        )))
    }

    fn usb(&self, config: &ConnectionConfig) -> Result<Box<dyn AdapterConnection>, Signal> {
        let connection = UsbSerialConnection::new(
            config.baud_rate,
            self.serial.clone(),
            config.framing(),
            config.settle_delay(),
        );
        connection.discover().map_err(|e| Signal::DeviceNotFound {
            reason: e.to_string(),
        })?;
        Ok(Box::new(connection))
    }
}
