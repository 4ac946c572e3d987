//! Shared fixtures for data logger integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use datalogger::{
    ConnectionType, DataLoggerContext, DeviceCapabilities, Engine, EngineError, EngineSession,
    EngineSink, LifecycleEvent, LoggerConfig, NetworkInfo, Signal,
};
use obd_transport::TransportError;
use obd_metrics::{
    Diagnostics, HistogramStats, PidDefinition, PidId, Reading, StaticPidRegistry, ValueType,
};
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Request the probing engine sends to read supported PIDs
pub const PROBE_REQUEST: &str = "01 15 0B 04 11 0F 05";

/// What the scripted engine does for one `start()`
#[derive(Debug, Clone)]
pub enum Script {
    /// Reject the session synchronously
    Reject,
    /// Reject the session because the adapter radio is off
    RadioOff,
    /// Report Connecting, then a connection error
    Fail,
    /// Report Running, then deliver the readings
    Run(DeviceCapabilities, Vec<Reading>),
    /// Connect the transport, send the probe request and report what came back
    Probe,
}

/// Engine that follows a script, one entry per start
pub struct ScriptedEngine {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    starts: AtomicU32,
    stops: AtomicU32,
    queries: Mutex<Vec<BTreeSet<PidId>>>,
    updates: Mutex<Vec<BTreeSet<PidId>>>,
    sink: Mutex<Option<EngineSink>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedEngine {
    pub fn new(scripts: Vec<Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            queries: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Engine that fails every session
    pub fn failing() -> Arc<Self> {
        Self::new(Vec::new(), Script::Fail)
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Query sets passed to `start()`
    pub fn queries(&self) -> Vec<BTreeSet<PidId>> {
        self.queries.lock().unwrap().clone()
    }

    /// Query sets passed to `update_query()`
    pub fn updates(&self) -> Vec<BTreeSet<PidId>> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn start(&self, session: EngineSession) -> Result<(), EngineError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(session.query.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        let sink = session.sink.clone();
        *self.sink.lock().unwrap() = Some(sink.clone());

        let task = match script {
            Script::Reject => return Err(EngineError::Failed("adapter busy".to_string())),
            Script::RadioOff => return Err(EngineError::Transport(TransportError::RadioDisabled)),
            Script::Fail => tokio::spawn(async move {
                sink.lifecycle(LifecycleEvent::Connecting).await;
                sink.error("Connection refused", Some("socket".to_string()))
                    .await;
            }),
            Script::Run(capabilities, readings) => tokio::spawn(async move {
                sink.lifecycle(LifecycleEvent::Connecting).await;
                sink.lifecycle(LifecycleEvent::Running(capabilities)).await;
                for reading in readings {
                    sink.reading(reading).await;
                }
            }),
            Script::Probe => tokio::spawn(probe(session, sink)),
        };
        *self.task.lock().unwrap() = Some(task);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
        if let Some(sink) = self.sink.lock().unwrap().take() {
            tokio::spawn(async move {
                sink.lifecycle(LifecycleEvent::Stopping).await;
                sink.lifecycle(LifecycleEvent::Stopped).await;
            });
        }
    }

    async fn update_query(&self, query: BTreeSet<PidId>) {
        self.updates.lock().unwrap().push(query);
    }
}

async fn probe(session: EngineSession, sink: EngineSink) {
    let mut connection = session.connection;
    sink.lifecycle(LifecycleEvent::Connecting).await;
    if let Err(e) = connection.connect().await {
        sink.error(e.to_string(), None).await;
        return;
    }
    if let Err(e) = connection
        .write_all(format!("{}\r", PROBE_REQUEST).as_bytes())
        .await
    {
        sink.error(e.to_string(), None).await;
        return;
    }

    let mut response = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match connection.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                response.extend_from_slice(&buf[..n]);
                if response.contains(&b'>') {
                    break;
                }
            }
            Err(e) => {
                sink.error(e.to_string(), None).await;
                return;
            }
        }
    }

    let text: String = String::from_utf8_lossy(&response)
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let supported_pids = if text.contains("NODATA") {
        BTreeSet::new()
    } else {
        session.query.clone()
    };
    let capabilities = DeviceCapabilities {
        supported_pids,
        protocol: Some(session.init.protocol.to_elm_command()),
        ..Default::default()
    };
    sink.lifecycle(LifecycleEvent::Running(capabilities)).await;

    // keep the connection open until stopped
    std::future::pending::<()>().await;
    drop(connection);
}

/// Diagnostics supplier with fixed statistics for every PID
pub struct FixedDiagnostics;

impl Diagnostics for FixedDiagnostics {
    fn histogram(&self, _pid: PidId) -> Option<HistogramStats> {
        Some(HistogramStats {
            min: 800.0,
            max: 3200.0,
            mean: 1500.0,
            latest: None,
        })
    }

    fn rate(&self, _pid: PidId) -> Option<f64> {
        Some(5.0)
    }
}

pub fn registry() -> StaticPidRegistry {
    StaticPidRegistry::new([0x05, 0x0C, 0x0D, 0x0F, 0x10].map(|id| PidDefinition {
        id,
        description: format!("PID {:02X}", id),
        units: String::new(),
        value_type: ValueType::Double,
        min: 0.0,
        max: 16383.75,
        alert_lower: None,
        alert_upper: None,
    }))
}

pub fn reading(pid: PidId, value: f64) -> Reading {
    Reading {
        pid,
        value: Some(value),
        timestamp_ms: 1_700_000_000_000,
        raw_response: format!("41 {:02X} 00", pid),
    }
}

/// Wi-Fi configuration that never needs a reachable adapter to be obtained
pub fn wifi_config(max_retries: u32) -> LoggerConfig {
    let mut config = LoggerConfig::default();
    config.connection.kind = ConnectionType::Wifi;
    config.connection.host = "127.0.0.1".to_string();
    config.connection.port = 35000;
    config.reconnect.max_retries = max_retries;
    config
}

pub fn context(config: LoggerConfig, engine: Arc<ScriptedEngine>) -> DataLoggerContext {
    DataLoggerContext::builder(
        config,
        engine,
        Arc::new(registry()),
        Arc::new(FixedDiagnostics),
    )
    .build()
}

/// Host joined to `ssid`, reported only after `delay`
pub struct SlowNetwork {
    pub ssid: String,
    pub delay: Duration,
}

#[async_trait]
impl NetworkInfo for SlowNetwork {
    async fn current_ssid(&self) -> Option<String> {
        tokio::time::sleep(self.delay).await;
        Some(self.ssid.clone())
    }
}

/// Wi-Fi context whose every connection lookup takes `delay`
pub fn slow_wifi_context(
    max_retries: u32,
    delay: Duration,
    engine: Arc<ScriptedEngine>,
) -> DataLoggerContext {
    let mut config = wifi_config(max_retries);
    config.connection.target_ssid = "WiFi_OBDII".to_string();
    DataLoggerContext::builder(
        config,
        engine,
        Arc::new(registry()),
        Arc::new(FixedDiagnostics),
    )
    .network(Arc::new(SlowNetwork {
        ssid: "WiFi_OBDII".to_string(),
        delay,
    }))
    .build()
}

/// Collect signals until one matches `done`; the match is the last element
pub async fn signals_until(
    rx: &mut broadcast::Receiver<Signal>,
    done: impl Fn(&Signal) -> bool,
) -> Vec<Signal> {
    let mut seen = Vec::new();
    loop {
        let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for signal")
            .expect("signal bus closed");
        let finished = done(&signal);
        seen.push(signal);
        if finished {
            return seen;
        }
    }
}

/// Signals emitted within `window` after the call
pub async fn signals_within(rx: &mut broadcast::Receiver<Signal>, window: Duration) -> Vec<Signal> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(signal)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        seen.push(signal);
    }
    seen
}

pub fn error_count(signals: &[Signal]) -> usize {
    signals
        .iter()
        .filter(|s| matches!(s, Signal::Error { .. }))
        .count()
}
