//! Lifecycle and data signals published to UI layers

use crate::config::ConnectionType;
use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info};

const SIGNAL_CAPACITY: usize = 64;

/// Externally observable state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    Connecting,
    Connected,
    /// Terminal session error, after reconnects were exhausted
    Error { message: String },
    Stopping,
    Stopped,
    /// Adapter id or host is empty
    AdapterNotConfigured { kind: ConnectionType },
    /// Host is on a different network than the configured adapter
    WrongNetwork {
        expected: String,
        actual: Option<String>,
    },
    /// Adapter not bonded, radio off or no USB device attached
    DeviceNotFound { reason: String },
    /// First reading of the session arrived
    DataReady,
}

impl Signal {
    /// Whether this signal ends the session attempt
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Signal::Error { .. }
                | Signal::AdapterNotConfigured { .. }
                | Signal::WrongNetwork { .. }
                | Signal::DeviceNotFound { .. }
        )
    }
}

/// Fan-out of [`Signal`]s to any number of subscribers
#[derive(Debug)]
pub struct SignalBus {
    tx: broadcast::Sender<Signal>,
    last: Mutex<Option<Signal>>,
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            tx,
            last: Mutex::new(None),
        }
    }

    /// Publish a signal; having no subscriber is not an error
    pub fn emit(&self, signal: Signal) {
        if signal.is_terminal() {
            info!("Signal: {:?}", signal);
        } else {
            debug!("Signal: {:?}", signal);
        }
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(signal.clone());
        let _ = self.tx.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.tx.subscribe()
    }

    /// Most recently emitted signal
    pub fn last(&self) -> Option<Signal> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
