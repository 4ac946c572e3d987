//! OBD-II Data Logger
//!
//! Connection selection and session lifecycle for the data-acquisition
//! pipeline. [`ConnectionManager`] turns configuration into a transport,
//! [`DataLogger`] hands it to the external query [`Engine`] and reacts to
//! the lifecycle events it reports, feeding readings into the shared
//! [`obd_metrics::MetricsCollector`].

mod config;
mod connection_manager;
mod context;
mod engine;
pub mod logging;
mod orchestrator;
mod protocol;
mod signal;

pub use self::config::{
    AdjustmentsConfig, CollectorConfig, ConfigError, ConfigStore, ConnectionConfig,
    ConnectionType, HeaderSetting, InitConfig, LoggerConfig, ReconnectConfig,
};
pub use connection_manager::{ConnectionManager, IwgetidNetworkInfo, NetworkInfo};
pub use context::{ContextBuilder, DataLoggerContext};
pub use engine::{
    AdaptiveTimeoutPolicy, AdjustmentParams, CachePolicy, DeviceCapabilities, Engine,
    EngineError, EngineEvent, EngineEvents, EngineSession, EngineSink, InitParams,
    LifecycleEvent,
};
pub use orchestrator::{DataLogger, SessionState};
pub use protocol::AdapterProtocol;
pub use signal::{Signal, SignalBus};
