//! Transport Error Types

use thiserror::Error;

/// Errors raised while opening or using an adapter connection
#[derive(Debug, Error)]
pub enum TransportError {
    /// Stream used before `connect()` succeeded or after `close()`
    #[error("Adapter connection is not open")]
    NotConnected,

    /// Operation was interrupted by `close()`
    #[error("Adapter connection was closed")]
    Closed,

    /// Bluetooth radio is switched off or absent
    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    /// Requested adapter is not among the bonded devices
    #[error("Bluetooth device {0} is not paired")]
    NotBonded(String),

    /// No USB-serial driver matched any attached device
    #[error("No USB serial device found")]
    NoUsbDriver,

    /// Peer actively refused the connection
    #[error("Connection refused by {0}")]
    ConnectionRefused(String),

    /// Connect did not complete in time
    #[error("Timeout connecting to adapter after {0}ms")]
    Timeout(u64),

    /// Serial driver error
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Underlying socket or tty error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tokio_serial::Error> for TransportError {
    fn from(err: tokio_serial::Error) -> Self {
        TransportError::Serial(err.to_string())
    }
}

impl TransportError {
    /// Whether retrying the same connection may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectionRefused(_)
                | TransportError::Timeout(_)
                | TransportError::Io(_)
                | TransportError::Serial(_)
        )
    }
}
