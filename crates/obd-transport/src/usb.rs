//! USB-Serial Transport
//!
//! Opens the first attached USB-serial adapter at 8N1 and serves replies
//! through a [`FramedReader`], since the serial driver hands out arbitrary
//! chunks with no message boundary.

use crate::connection::{cancellable, AdapterConnection, BoxedStream, CloseHandle};
use crate::error::TransportError;
use crate::frame::FramedReader;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialPortType, StopBits};
use tracing::{debug, info, warn};

/// Attached USB-serial device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortDescriptor {
    /// Device node, e.g. `/dev/ttyUSB0`
    pub path: String,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub product: Option<String>,
}

/// Enumerates and opens USB-serial drivers
pub trait SerialPortProber: Send + Sync {
    /// USB-serial devices with a bound driver, in discovery order
    fn usb_ports(&self) -> Result<Vec<SerialPortDescriptor>, TransportError>;

    /// Open `port` configured for 8N1 at `baud_rate`
    fn open(&self, port: &SerialPortDescriptor, baud_rate: u32) -> Result<BoxedStream, TransportError>;
}

/// Prober backed by `tokio-serial` / `serialport` enumeration
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialProber;

impl SerialPortProber for TokioSerialProber {
    fn usb_ports(&self) -> Result<Vec<SerialPortDescriptor>, TransportError> {
        let ports = tokio_serial::available_ports()?;
        Ok(ports
            .into_iter()
            .filter_map(|port| match port.port_type {
                SerialPortType::UsbPort(info) => Some(SerialPortDescriptor {
                    path: port.port_name,
                    vendor_id: Some(info.vid),
                    product_id: Some(info.pid),
                    product: info.product,
                }),
                _ => None,
            })
            .collect())
    }

    fn open(&self, port: &SerialPortDescriptor, baud_rate: u32) -> Result<BoxedStream, TransportError> {
        let stream = tokio_serial::new(port.path.as_str(), baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;
        Ok(Box::new(stream))
    }
}

/// Buffering limits for the serial frame reader
#[derive(Debug, Clone, Copy)]
pub struct FramingConfig {
    /// Frame buffer capacity in bytes
    pub buffer_size: usize,
    /// Read attempts per frame before giving up on a terminator
    pub read_attempts: usize,
    /// Timeout of each read attempt
    pub read_timeout: Duration,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            buffer_size: 96,
            read_attempts: 25,
            read_timeout: Duration::from_millis(15),
        }
    }
}

/// Connection to the first attached USB-serial adapter
pub struct UsbSerialConnection {
    baud_rate: u32,
    prober: Arc<dyn SerialPortProber>,
    framing: FramingConfig,
    settle_delay: Duration,
    /// Device opened by the last connect
    port: Option<SerialPortDescriptor>,
    reader: Option<FramedReader<BoxedStream>>,
    closer: CloseHandle,
}

impl UsbSerialConnection {
    /// Create an unconnected USB-serial transport
    pub fn new(
        baud_rate: u32,
        prober: Arc<dyn SerialPortProber>,
        framing: FramingConfig,
        settle_delay: Duration,
    ) -> Self {
        info!("Creating USB serial connection at {} baud", baud_rate);
        Self {
            baud_rate,
            prober,
            framing,
            settle_delay,
            port: None,
            reader: None,
            closer: CloseHandle::new(),
        }
    }

    /// First discovered USB-serial device, if any
    pub fn discover(&self) -> Result<SerialPortDescriptor, TransportError> {
        self.prober
            .usb_ports()?
            .into_iter()
            .next()
            .ok_or(TransportError::NoUsbDriver)
    }
}

#[async_trait]
impl AdapterConnection for UsbSerialConnection {
    fn descriptor(&self) -> String {
        match &self.port {
            Some(port) => port.path.clone(),
            None => format!("usb@{}", self.baud_rate),
        }
    }

    fn is_connected(&self) -> bool {
        self.reader.is_some() && !self.closer.is_closed()
    }

    fn close_handle(&self) -> CloseHandle {
        self.closer.clone()
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    async fn connect(&mut self) -> Result<(), TransportError> {
        self.closer.arm();
        let port = self.discover()?;
        debug!(
            "Opening USB serial device {} (vid {:?}, pid {:?})",
            port.path, port.vendor_id, port.product_id
        );

        let stream = self.prober.open(&port, self.baud_rate).map_err(|e| {
            warn!("Failed to open {}: {}", port.path, e);
            e
        })?;
        self.reader = Some(FramedReader::new(
            stream,
            self.framing.buffer_size,
            self.framing.read_attempts,
            self.framing.read_timeout,
        ));
        info!("Connected to USB serial adapter {}", port.path);
        self.port = Some(port);
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let token = self.closer.current();
        let reader = self.reader.as_mut().ok_or(TransportError::NotConnected)?;
        cancellable(&token, reader.read(buf)).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let token = self.closer.current();
        let reader = self.reader.as_mut().ok_or(TransportError::NotConnected)?;
        let stream = reader.get_mut();
        cancellable(&token, async {
            stream.write_all(data).await?;
            stream.flush().await?;
            Ok::<(), TransportError>(())
        })
        .await
    }

    fn close(&mut self) {
        if self.reader.is_some() {
            info!("Closing USB serial connection {}", self.descriptor());
        }
        self.closer.close();
        self.reader = None;
    }
}
