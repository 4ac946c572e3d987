//! OBD-II Adapter Transports
//!
//! This crate provides the byte channels used to talk to ELM327-compatible
//! OBD-II adapters. Three interchangeable variants share one contract
//! ([`AdapterConnection`]): Bluetooth RFCOMM, TCP (Wi-Fi/STN adapters) and
//! USB-serial with application-level `>` framing.

mod bluetooth;
mod connection;
mod error;
mod frame;
mod usb;
mod wifi;

pub use bluetooth::{
    BluetoothConnection, BluetoothDevice, BluetoothRadio, RfcommBinding, RfcommTtyRadio, SPP_UUID,
};
pub use connection::{AdapterConnection, AdapterStream, BoxedStream, CloseHandle};
pub use error::TransportError;
pub use frame::{FillStatus, Frame, FrameBuffer, FramedReader, TERMINATOR};
pub use usb::{
    FramingConfig, SerialPortDescriptor, SerialPortProber, TokioSerialProber, UsbSerialConnection,
};
pub use wifi::WifiConnection;
