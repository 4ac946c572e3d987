//! Query engine contract
//!
//! The engine owns the OBD-II command encoding and PID decoding. It receives
//! a connected-on-demand transport plus the query set, runs the session on
//! its own task, and reports back through an [`EngineSink`]: lifecycle
//! transitions and readings travel as [`EngineEvent`]s over one channel.

use crate::config::{AdjustmentsConfig, HeaderSetting, InitConfig};
use crate::protocol::AdapterProtocol;
use async_trait::async_trait;
use obd_metrics::{PidId, Reading};
use obd_transport::{AdapterConnection, TransportError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Engine failure: {0}")]
    Failed(String),
}

impl EngineError {
    /// Whether a reconnect may get past this error. Adapter misconfiguration
    /// (radio off, device not paired) is not retried.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Transport(e) => e.is_transient(),
            EngineError::AlreadyRunning | EngineError::Failed(_) => true,
        }
    }
}

/// What the adapter reported about itself on connect
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCapabilities {
    /// Device properties such as VIN or adapter firmware
    pub properties: BTreeMap<String, String>,
    /// PIDs the vehicle answered as supported
    pub supported_pids: BTreeSet<PidId>,
    /// Protocol negotiated on the bus
    pub protocol: Option<String>,
}

/// Session lifecycle transitions reported by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Connecting,
    Running(DeviceCapabilities),
    Error {
        message: String,
        cause: Option<String>,
    },
    Stopping,
    Stopped,
}

/// Everything the engine reports back
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Lifecycle(LifecycleEvent),
    Reading(Reading),
}

/// Engine event tagged with the session that produced it
#[derive(Debug, Clone)]
pub(crate) struct SessionEvent {
    pub session: u64,
    pub event: EngineEvent,
}

/// Reporting end handed to the engine for one session
#[derive(Debug, Clone)]
pub struct EngineSink {
    session: u64,
    tx: mpsc::Sender<SessionEvent>,
}

impl EngineSink {
    pub(crate) fn new(session: u64, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { session, tx }
    }

    /// Sink plus the receiving end, for driving an engine directly
    pub fn channel(capacity: usize) -> (Self, EngineEvents) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(0, tx), EngineEvents { rx })
    }

    /// Deliver an event in order. Returns false once the receiver is gone.
    pub async fn send(&self, event: EngineEvent) -> bool {
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .await
            .is_ok()
    }

    pub async fn lifecycle(&self, event: LifecycleEvent) -> bool {
        self.send(EngineEvent::Lifecycle(event)).await
    }

    pub async fn reading(&self, reading: Reading) -> bool {
        self.send(EngineEvent::Reading(reading)).await
    }

    /// Report a session error
    pub async fn error(&self, message: impl Into<String>, cause: Option<String>) -> bool {
        self.lifecycle(LifecycleEvent::Error {
            message: message.into(),
            cause,
        })
        .await
    }
}

/// Receiving end of [`EngineSink::channel`]
#[derive(Debug)]
pub struct EngineEvents {
    rx: mpsc::Receiver<SessionEvent>,
}

impl EngineEvents {
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await.map(|e| e.event)
    }
}

/// Adapter initialization parameters
#[derive(Debug, Clone, PartialEq)]
pub struct InitParams {
    pub protocol: AdapterProtocol,
    pub headers: Vec<HeaderSetting>,
    pub delay_after_init: Duration,
    pub fetch_device_properties: bool,
    pub fetch_supported_pids: bool,
}

impl InitParams {
    pub fn from_config(config: &InitConfig) -> Self {
        Self {
            protocol: config.protocol,
            headers: config.headers.clone(),
            delay_after_init: Duration::from_millis(config.delay_after_init_ms),
            fetch_device_properties: config.fetch_device_properties,
            fetch_supported_pids: config.fetch_supported_pids,
        }
    }

    /// AT command sequence sent after reset: echo and linefeeds off, then the
    /// protocol, then headers when the protocol takes them
    pub fn init_sequence(&self) -> Vec<String> {
        let mut commands = vec![
            "ATZ".to_string(),
            "ATE0".to_string(),
            "ATL0".to_string(),
            self.protocol.to_elm_command(),
        ];
        if self.protocol.accepts_can_headers() {
            commands.extend(self.headers.iter().map(|h| format!("ATSH{}", h.header)));
        } else if !self.headers.is_empty() {
            debug!(
                "Skipping {} CAN headers on {}",
                self.headers.len(),
                self.protocol
            );
        }
        commands
    }
}

/// Formula-result cache policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub enabled: bool,
    pub location: PathBuf,
}

/// Adaptive adapter-timeout policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveTimeoutPolicy {
    pub enabled: bool,
    pub check_interval: Duration,
    pub min_timeout: Duration,
}

/// Engine tuning parameters
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentParams {
    pub batch_enabled: bool,
    pub cache: CachePolicy,
    pub generator_enabled: bool,
    pub adaptive_timeout: AdaptiveTimeoutPolicy,
}

impl AdjustmentParams {
    pub fn from_config(config: &AdjustmentsConfig) -> Self {
        Self {
            batch_enabled: config.batch_enabled,
            cache: CachePolicy {
                enabled: config.cache_enabled,
                location: config.cache_location.clone(),
            },
            generator_enabled: config.generator_enabled,
            adaptive_timeout: AdaptiveTimeoutPolicy {
                enabled: config.adaptive_timeout_enabled,
                check_interval: Duration::from_millis(config.adaptive_timeout_check_interval_ms),
                min_timeout: Duration::from_millis(config.min_timeout_ms),
            },
        }
    }
}

/// Inputs of one engine session
pub struct EngineSession {
    /// Unconnected transport; the engine connects it on its own task
    pub connection: Box<dyn AdapterConnection>,
    pub query: BTreeSet<PidId>,
    pub init: InitParams,
    pub adjustments: AdjustmentParams,
    pub sink: EngineSink,
}

/// External query engine driving one adapter session at a time
#[async_trait]
pub trait Engine: Send + Sync {
    /// Begin a session. Must not block on the transport connect; progress is
    /// reported through `session.sink`.
    async fn start(&self, session: EngineSession) -> Result<(), EngineError>;

    /// Request the running session to stop. Idempotent.
    async fn stop(&self);

    /// Replace the query set of the running session
    async fn update_query(&self, query: BTreeSet<PidId>);
}
