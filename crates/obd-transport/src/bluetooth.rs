//! Bluetooth RFCOMM Transport

use crate::connection::{cancellable, AdapterConnection, BoxedStream, CloseHandle, StreamSlot};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};
use uuid::{uuid, Uuid};

/// Serial Port Profile service class used by ELM327 Bluetooth adapters
pub const SPP_UUID: Uuid = uuid!("00001101-0000-1000-8000-00805F9B34FB");

/// Baud rate for the RFCOMM tty; the radio link ignores it
const RFCOMM_TTY_BAUD: u32 = 115_200;

/// A bonded (paired) Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothDevice {
    pub name: String,
    pub address: String,
}

impl BluetoothDevice {
    /// Whether `id` names this device, by address or by name
    pub fn matches(&self, id: &str) -> bool {
        self.address.eq_ignore_ascii_case(id) || self.name == id
    }
}

/// Platform Bluetooth stack as seen by the transport
#[async_trait]
pub trait BluetoothRadio: Send + Sync {
    /// Whether the radio is powered
    fn is_enabled(&self) -> bool;

    /// Devices currently bonded with this host
    fn bonded_devices(&self) -> Vec<BluetoothDevice>;

    /// Open an RFCOMM channel to `device` for the given service
    async fn open_rfcomm(
        &self,
        device: &BluetoothDevice,
        service: Uuid,
    ) -> Result<BoxedStream, TransportError>;
}

/// One `rfcomm bind` entry: a bonded device reachable through a tty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfcommBinding {
    pub name: String,
    pub address: String,
    /// e.g. `/dev/rfcomm0`
    pub tty: PathBuf,
}

/// Linux radio backed by BlueZ `rfcomm bind` ttys.
///
/// A binding counts as bonded while its tty node exists.
pub struct RfcommTtyRadio {
    bindings: Vec<RfcommBinding>,
    sysfs_root: PathBuf,
}

impl RfcommTtyRadio {
    /// Create a radio from configured bindings
    pub fn new(bindings: Vec<RfcommBinding>) -> Self {
        Self {
            bindings,
            sysfs_root: PathBuf::from("/sys/class/bluetooth"),
        }
    }

    fn binding_for(&self, device: &BluetoothDevice) -> Option<&RfcommBinding> {
        self.bindings
            .iter()
            .find(|b| b.address.eq_ignore_ascii_case(&device.address))
    }
}

#[async_trait]
impl BluetoothRadio for RfcommTtyRadio {
    fn is_enabled(&self) -> bool {
        std::fs::read_dir(&self.sysfs_root)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    fn bonded_devices(&self) -> Vec<BluetoothDevice> {
        self.bindings
            .iter()
            .filter(|b| Path::new(&b.tty).exists())
            .map(|b| BluetoothDevice {
                name: b.name.clone(),
                address: b.address.clone(),
            })
            .collect()
    }

    async fn open_rfcomm(
        &self,
        device: &BluetoothDevice,
        service: Uuid,
    ) -> Result<BoxedStream, TransportError> {
        let binding = self
            .binding_for(device)
            .ok_or_else(|| TransportError::NotBonded(device.address.clone()))?;
        debug!(
            "Opening RFCOMM tty {} for {} (service {})",
            binding.tty.display(),
            device.address,
            service
        );
        let stream = tokio_serial::new(binding.tty.to_string_lossy(), RFCOMM_TTY_BAUD)
            .open_native_async()?;
        Ok(Box::new(stream))
    }
}

/// Connection to a paired Bluetooth adapter over RFCOMM
pub struct BluetoothConnection {
    /// Configured device name or address
    adapter_id: String,
    radio: Arc<dyn BluetoothRadio>,
    /// Device resolved by the last connect
    device: Option<BluetoothDevice>,
    settle_delay: Duration,
    slot: StreamSlot,
}

impl BluetoothConnection {
    /// Create an unconnected RFCOMM transport for `adapter_id`
    pub fn new(adapter_id: &str, radio: Arc<dyn BluetoothRadio>, settle_delay: Duration) -> Self {
        info!("Creating Bluetooth connection for device: {}", adapter_id);
        Self {
            adapter_id: adapter_id.to_string(),
            radio,
            device: None,
            settle_delay,
            slot: StreamSlot::default(),
        }
    }

    /// Find the configured adapter among bonded devices
    pub fn resolve(&self) -> Result<BluetoothDevice, TransportError> {
        if !self.radio.is_enabled() {
            return Err(TransportError::RadioDisabled);
        }
        self.radio
            .bonded_devices()
            .into_iter()
            .find(|d| d.matches(&self.adapter_id))
            .ok_or_else(|| TransportError::NotBonded(self.adapter_id.clone()))
    }
}

#[async_trait]
impl AdapterConnection for BluetoothConnection {
    fn descriptor(&self) -> String {
        match &self.device {
            Some(device) => format!("{} ({})", device.name, device.address),
            None => self.adapter_id.clone(),
        }
    }

    fn is_connected(&self) -> bool {
        self.slot.is_open()
    }

    fn close_handle(&self) -> CloseHandle {
        self.slot.closer()
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        let device = self.resolve().map_err(|e| {
            warn!("Bluetooth adapter {} unavailable: {}", self.adapter_id, e);
            e
        })?;
        let token = self.slot.closer().arm();
        let radio = Arc::clone(&self.radio);

        let stream = cancellable(&token, radio.open_rfcomm(&device, SPP_UUID)).await?;
        self.slot.install(stream);
        info!("Connected to Bluetooth adapter {}", device.address);
        self.device = Some(device);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.slot.read(buf).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.slot.write_all(data).await
    }

    fn close(&mut self) {
        if self.slot.is_open() {
            info!("Closing Bluetooth connection to {}", self.descriptor());
        }
        self.slot.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::AsyncWriteExt;

    struct FakeRadio {
        enabled: bool,
        devices: Vec<BluetoothDevice>,
        opened: AtomicUsize,
        /// Never complete `open_rfcomm`
        hang: bool,
    }

    #[async_trait]
    impl BluetoothRadio for FakeRadio {
        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn bonded_devices(&self) -> Vec<BluetoothDevice> {
            self.devices.clone()
        }

        async fn open_rfcomm(
            &self,
            _device: &BluetoothDevice,
            service: Uuid,
        ) -> Result<BoxedStream, TransportError> {
            assert_eq!(service, SPP_UUID);
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let (client, mut server) = tokio::io::duplex(64);
            tokio::spawn(async move {
                server.write_all(b"OK\r>").await.ok();
                tokio::time::sleep(Duration::from_secs(60)).await;
            });
            Ok(Box::new(client))
        }
    }

    fn obdlink() -> BluetoothDevice {
        BluetoothDevice {
            name: "OBDII".to_string(),
            address: "00:1D:A5:68:98:8A".to_string(),
        }
    }

    fn radio(enabled: bool, devices: Vec<BluetoothDevice>) -> Arc<FakeRadio> {
        Arc::new(FakeRadio {
            enabled,
            devices,
            opened: AtomicUsize::new(0),
            hang: false,
        })
    }

    #[tokio::test]
    async fn test_connect_by_address_case_insensitive() {
        let radio = radio(true, vec![obdlink()]);
        let mut conn = BluetoothConnection::new(
            "00:1d:a5:68:98:8a",
            radio.clone(),
            Duration::from_millis(10),
        );
        conn.connect().await.unwrap();
        assert!(conn.is_connected());
        assert_eq!(radio.opened.load(Ordering::SeqCst), 1);

        let mut buf = [0u8; 8];
        let n = conn.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"OK\r>");
        assert_eq!(conn.descriptor(), "OBDII (00:1D:A5:68:98:8A)");
    }

    #[tokio::test]
    async fn test_connect_fails_when_not_bonded() {
        let mut conn = BluetoothConnection::new(
            "OBDII",
            radio(true, Vec::new()),
            Duration::from_millis(10),
        );
        assert!(matches!(
            conn.connect().await,
            Err(TransportError::NotBonded(_))
        ));
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_connect_fails_when_radio_disabled() {
        let mut conn = BluetoothConnection::new(
            "OBDII",
            radio(false, vec![obdlink()]),
            Duration::from_millis(10),
        );
        assert!(matches!(
            conn.connect().await,
            Err(TransportError::RadioDisabled)
        ));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_connect() {
        let radio = Arc::new(FakeRadio {
            enabled: true,
            devices: vec![obdlink()],
            opened: AtomicUsize::new(0),
            hang: true,
        });
        let mut conn = BluetoothConnection::new("OBDII", radio.clone(), Duration::from_millis(10));
        let closer = conn.close_handle();

        let pending = tokio::spawn(async move { conn.connect().await });
        while radio.opened.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        closer.close();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("connect still blocked after close")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[test]
    fn test_tty_radio_without_ttys_has_no_bonded_devices() {
        let radio = RfcommTtyRadio::new(vec![RfcommBinding {
            name: "OBDII".to_string(),
            address: "00:1D:A5:68:98:8A".to_string(),
            tty: PathBuf::from("/nonexistent/rfcomm7"),
        }]);
        assert!(radio.bonded_devices().is_empty());
    }
}
