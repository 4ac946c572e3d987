//! Session Lifecycle Orchestrator
//!
//! [`DataLogger`] owns the engine handle and the single active connection.
//! Session state only changes in response to engine lifecycle events, except
//! for auto-reconnect (Error -> Connecting), which is bounded by the
//! configured retry count.

use crate::config::ConfigStore;
use crate::connection_manager::ConnectionManager;
use crate::engine::{
    AdjustmentParams, DeviceCapabilities, Engine, EngineError, EngineEvent, EngineSession,
    EngineSink, InitParams, LifecycleEvent, SessionEvent,
};
use crate::signal::{Signal, SignalBus};
use metrics::{counter, gauge};
use obd_metrics::{MetricsCollector, PidId, Reading};
use obd_query::Query;
use obd_transport::CloseHandle;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Engine session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Stopped,
    Connecting,
    Running,
    Stopping,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Connecting => "connecting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Error => "error",
        }
    }

    /// Value exported on the `obd_session_state` gauge
    pub fn gauge_value(&self) -> f64 {
        match self {
            SessionState::Stopped => 0.0,
            SessionState::Connecting => 1.0,
            SessionState::Running => 2.0,
            SessionState::Stopping => 3.0,
            SessionState::Error => 4.0,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of handing a connection to the engine
enum Launch {
    Started,
    /// No connection; the connection manager already signalled why
    Unavailable,
    /// `stop()` arrived while the connection was being obtained
    Cancelled,
    Failed(EngineError),
}

struct Inner {
    engine: Arc<dyn Engine>,
    connections: ConnectionManager,
    collector: Arc<MetricsCollector>,
    query: Arc<Query>,
    config: ConfigStore,
    signals: Arc<SignalBus>,
    tx: mpsc::Sender<SessionEvent>,
    state: Mutex<SessionState>,
    /// Id of the newest session; events from older ones are dropped
    session: AtomicU64,
    reconnect_attempts: AtomicU32,
    capabilities: RwLock<Option<DeviceCapabilities>>,
    /// Close handle of the connection owned by the running session
    close_handle: Mutex<Option<CloseHandle>>,
    /// Set by `stop()`, cleared only by `start()`
    stop_requested: AtomicBool,
    /// Held across obtain + engine start; one launch at a time
    launching: tokio::sync::Mutex<()>,
    data_ready: AtomicBool,
    shutdown: CancellationToken,
}

impl Inner {
    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            state,
        );
        if previous != state {
            debug!("Session state {} -> {}", previous, state);
        }
        gauge!("obd_session_state").set(state.gauge_value());
    }

    fn hold_connection(&self, handle: CloseHandle) {
        *self.close_handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn take_connection(&self) -> Option<CloseHandle> {
        self.close_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn release_connection(&self) {
        if let Some(handle) = self.take_connection() {
            handle.close();
        }
    }

    fn has_connection(&self) -> bool {
        self.close_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Obtain a connection and hand it to the engine. Callers hold `launching`.
    async fn launch(&self) -> Launch {
        let config = self.config.current();
        let Some(mut connection) = self.connections.obtain(&config.connection).await else {
            return Launch::Unavailable;
        };
        if self.stop_requested() {
            debug!("Stop requested, discarding {}", connection.descriptor());
            connection.close();
            return Launch::Cancelled;
        }

        let session = self.session.fetch_add(1, Ordering::SeqCst) + 1;
        self.hold_connection(connection.close_handle());

        let query = self.query.get_ids();
        info!(
            "Starting engine session {} on {} with {} PIDs",
            session,
            connection.descriptor(),
            query.len()
        );
        counter!("obd_engine_starts_total").increment(1);

        let request = EngineSession {
            connection,
            query,
            init: InitParams::from_config(&config.init),
            adjustments: AdjustmentParams::from_config(&config.adjustments),
            sink: EngineSink::new(session, self.tx.clone()),
        };
        match self.engine.start(request).await {
            Ok(()) => Launch::Started,
            Err(e) => {
                self.release_connection();
                Launch::Failed(e)
            }
        }
    }

    async fn handle(&self, event: SessionEvent) {
        let current = self.session.load(Ordering::SeqCst);
        if event.session != current {
            debug!(
                "Dropping event of stale session {} (current {})",
                event.session, current
            );
            return;
        }
        match event.event {
            EngineEvent::Reading(reading) => self.on_reading(reading),
            EngineEvent::Lifecycle(lifecycle) => self.on_lifecycle(lifecycle).await,
        }
    }

    async fn on_lifecycle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Connecting => {
                self.set_state(SessionState::Connecting);
                self.signals.emit(Signal::Connecting);
            }
            LifecycleEvent::Running(capabilities) => {
                info!(
                    "Session running ({} supported PIDs, protocol {:?})",
                    capabilities.supported_pids.len(),
                    capabilities.protocol
                );
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                *self
                    .capabilities
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Some(capabilities);
                self.set_state(SessionState::Running);
                self.signals.emit(Signal::Connected);
            }
            LifecycleEvent::Error { message, cause } => self.on_error(message, cause, true).await,
            LifecycleEvent::Stopping => {
                self.set_state(SessionState::Stopping);
                self.signals.emit(Signal::Stopping);
            }
            LifecycleEvent::Stopped => {
                self.set_state(SessionState::Stopped);
                self.release_connection();
                self.collector.reset_session();
                self.data_ready.store(false, Ordering::SeqCst);
                self.signals.emit(Signal::Stopped);
            }
        }
    }

    /// Stop the failed session, then reconnect within the retry budget or
    /// report one terminal error. A non-retryable error skips the budget.
    async fn on_error(&self, message: String, cause: Option<String>, retryable: bool) {
        error!("Session error: {} (cause: {:?})", message, cause);
        counter!("obd_session_errors_total").increment(1);
        self.set_state(SessionState::Error);
        self.engine.stop().await;
        self.release_connection();

        if self.stop_requested() {
            debug!("Stop was requested, not reconnecting");
            return;
        }

        let mut message = message;
        let mut retryable = retryable;
        loop {
            let policy = self.config.current().reconnect;
            let attempts = self.reconnect_attempts.load(Ordering::SeqCst);
            if !retryable || !policy.enabled || attempts >= policy.max_retries {
                warn!(
                    "Giving up after {} reconnect attempts: {}",
                    attempts, message
                );
                self.reconnect_attempts.store(0, Ordering::SeqCst);
                self.set_state(SessionState::Error);
                self.signals.emit(Signal::Error { message });
                return;
            }

            let _launching = self.launching.lock().await;
            if self.stop_requested() {
                self.abandon_launch();
                return;
            }
            if self.has_connection() {
                debug!("A session was started meanwhile, not reconnecting");
                return;
            }

            let attempt = attempts + 1;
            self.reconnect_attempts.store(attempt, Ordering::SeqCst);
            counter!("obd_reconnect_attempts_total").increment(1);
            info!("Reconnecting (attempt {}/{})", attempt, policy.max_retries);
            self.set_state(SessionState::Connecting);

            match self.launch().await {
                Launch::Started => return,
                Launch::Unavailable => {
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    self.set_state(SessionState::Stopped);
                    return;
                }
                Launch::Cancelled => {
                    self.abandon_launch();
                    return;
                }
                Launch::Failed(e) => {
                    warn!("Engine rejected reconnect: {}", e);
                    counter!("obd_session_errors_total").increment(1);
                    retryable = e.is_transient();
                    message = e.to_string();
                }
            }
        }
    }

    /// Launch abandoned on `stop()`. Events still queued by the failed
    /// session are dropped and Stopped is reported here instead.
    fn abandon_launch(&self) {
        info!("Launch cancelled by stop request");
        self.session.fetch_add(1, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(SessionState::Stopped);
        self.signals.emit(Signal::Stopped);
    }

    fn on_reading(&self, reading: Reading) {
        counter!("obd_readings_total").increment(1);
        let force_append = self.config.current().metrics.force_append;
        if self.collector.append(reading, force_append) && !self.data_ready.swap(true, Ordering::SeqCst)
        {
            self.signals.emit(Signal::DataReady);
        }
    }
}

async fn run(inner: Arc<Inner>, mut rx: mpsc::Receiver<SessionEvent>) {
    debug!("Engine event loop started");
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => inner.handle(event).await,
                None => break,
            },
        }
    }
    debug!("Engine event loop stopped");
}

/// Drives engine sessions and republishes their outcome as signals and metrics
pub struct DataLogger {
    inner: Arc<Inner>,
    task: JoinHandle<()>,
}

impl DataLogger {
    /// Create the orchestrator and spawn its event loop on the current Tokio runtime
    pub fn new(
        engine: Arc<dyn Engine>,
        connections: ConnectionManager,
        collector: Arc<MetricsCollector>,
        query: Arc<Query>,
        config: ConfigStore,
        signals: Arc<SignalBus>,
    ) -> Self {
        let capacity = config.current().metrics.event_channel_capacity.max(1);
        info!("Creating data logger (event capacity {})", capacity);
        let (tx, rx) = mpsc::channel(capacity);
        let inner = Arc::new(Inner {
            engine,
            connections,
            collector,
            query,
            config,
            signals,
            tx,
            state: Mutex::new(SessionState::Stopped),
            session: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            capabilities: RwLock::new(None),
            close_handle: Mutex::new(None),
            stop_requested: AtomicBool::new(false),
            launching: tokio::sync::Mutex::new(()),
            data_ready: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        let task = tokio::spawn(run(inner.clone(), rx));
        Self { inner, task }
    }

    /// Resolve a connection and hand it to the engine with the active query.
    ///
    /// Returns whether the engine accepted the session. Without a usable
    /// connection the engine is not invoked; an engine rejection goes
    /// through the reconnect policy like any session error.
    /// A start while a session or a reconnect is in progress is ignored.
    pub async fn start(&self) -> bool {
        let outcome = {
            let Ok(_launching) = self.inner.launching.try_lock() else {
                warn!("Reconnect in progress, ignoring start");
                return false;
            };
            if self.inner.has_connection() {
                warn!("Session already active, ignoring start");
                return false;
            }
            self.inner.stop_requested.store(false, Ordering::SeqCst);
            self.inner.data_ready.store(false, Ordering::SeqCst);
            self.inner.launch().await
        };
        match outcome {
            Launch::Started => true,
            Launch::Unavailable => false,
            Launch::Cancelled => {
                self.inner.abandon_launch();
                false
            }
            Launch::Failed(e) => {
                let retryable = e.is_transient();
                self.inner.on_error(e.to_string(), None, retryable).await;
                false
            }
        }
    }

    /// Ask the engine to stop and release the connection. Idempotent. Also
    /// cancels a reconnect that has not reached the engine yet.
    pub async fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        let Some(handle) = self.inner.take_connection() else {
            debug!("No active session to stop");
            return;
        };
        info!("Stopping session");
        self.inner.engine.stop().await;
        handle.close();
    }

    /// Push the active query set to a running engine; returns the set
    pub async fn update_query(&self) -> BTreeSet<PidId> {
        let ids = self.inner.query.get_ids();
        if self.inner.state() == SessionState::Running {
            debug!("Updating running query to {} PIDs", ids.len());
            self.inner.engine.update_query(ids.clone()).await;
        }
        ids
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Capabilities reported by the last session that reached Running
    pub fn capabilities(&self) -> Option<DeviceCapabilities> {
        self.inner
            .capabilities
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reconnect attempts since the last Running or terminal error
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Whether a connection is currently owned by a session
    pub fn is_active(&self) -> bool {
        self.inner.has_connection()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.inner.signals.subscribe()
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.inner.collector
    }

    pub fn query(&self) -> &Arc<Query> {
        &self.inner.query
    }

    /// Stop the event loop; no further engine events are processed
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Drop for DataLogger {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.release_connection();
        self.task.abort();
    }
}
